//! A small fixed pool of [`Database`] handles on one SQLite file.
//!
//! `rusqlite` is blocking, so every call runs on tokio's blocking pool. A
//! handle is picked round-robin; if it is busy the next free one is used, and
//! only when all are busy does the caller wait on a lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use parlor_store::{Database, StoreError};

use crate::error::Result;

#[derive(Clone)]
pub struct DbPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    handles: Vec<Mutex<Database>>,
    next: AtomicUsize,
    path: PathBuf,
}

impl DbPool {
    /// Open `size` handles on the database at `path`. The first open runs
    /// migrations; the rest find the schema already current.
    pub fn open(path: &Path, size: usize) -> Result<Self> {
        let size = size.max(1);
        let mut handles = Vec::with_capacity(size);
        for _ in 0..size {
            handles.push(Mutex::new(Database::open_at(path)?));
        }

        tracing::info!(path = %path.display(), size, "database pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                handles,
                next: AtomicUsize::new(0),
                path: path.to_path_buf(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn size(&self) -> usize {
        self.inner.handles.len()
    }

    /// Run `f` against a pooled handle on the blocking thread pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let out = tokio::task::spawn_blocking(move || {
            let mut db = inner.acquire();
            f(&mut db)
        })
        .await??;
        Ok(out)
    }
}

impl PoolInner {
    fn acquire(&self) -> MutexGuard<'_, Database> {
        let n = self.handles.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);

        for i in 0..n {
            match self.handles[(start + i) % n].try_lock() {
                Ok(guard) => return guard,
                // A panic mid-call leaves the connection itself usable; any
                // open transaction was rolled back when it dropped.
                Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            }
        }

        self.handles[start % n]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
