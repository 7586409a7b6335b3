/// Application name
pub const APP_NAME: &str = "Parlor";

/// Messages returned per page when scrolling back through a room
pub const MESSAGE_PAGE_SIZE: u32 = 20;

/// Messages returned when a room is first opened
pub const FIRST_PAGE_SIZE: u32 = 50;

/// Messages loaded on each side of a jump target
pub const AROUND_WINDOW: u32 = 20;

/// Upper bound on a translation round-trip before falling back to the original text
pub const DEFAULT_TRANSLATION_TIMEOUT_MS: u64 = 1_000;

/// Recipients processed in parallel by one fan-out
pub const DEFAULT_FANOUT_CONCURRENCY: usize = 16;

/// Buffered events per hub topic before slow subscribers start lagging
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// Pooled SQLite connections
pub const DEFAULT_DB_POOL_SIZE: usize = 4;

/// Maximum text message size in bytes (16 KiB)
pub const MAX_TEXT_LENGTH: usize = 16 * 1024;

/// Maximum group room name length in characters
pub const MAX_ROOM_NAME_LENGTH: usize = 100;

/// Lifetime of a signed media upload URL
pub const DEFAULT_UPLOAD_TTL_SECS: u64 = 15 * 60;

/// Prefix of every chat media storage key
pub const MEDIA_KEY_PREFIX: &str = "chats";

/// Notification snippets for media messages
pub const IMAGE_SNIPPET: &str = "sent a photo";
pub const VIDEO_SNIPPET: &str = "sent a video";

/// Room name shown when the 1:1 peer has no profile
pub const UNKNOWN_USER_NAME: &str = "(unknown user)";

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
