//! Server-sent event streams over the engine's hub topics.
//!
//! Each connection registers the user with the presence registry for as long
//! as the stream is alive.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use parlor_shared::protocol::topic;
use parlor_shared::types::RoomId;

use crate::api::{actor, AppState};
use crate::error::ServerError;

type Frame = Result<serde_json::Value, BroadcastStreamRecvError>;

/// Turn a hub payload into an SSE event named after its `type` field, or
/// `default` for untagged payloads.
fn to_event(default: &'static str) -> impl FnMut(Frame) -> Result<Event, Infallible> {
    move |frame| match frame {
        Ok(value) => {
            let name = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or(default);
            Ok(Event::default().event(name).data(value.to_string()))
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::debug!(skipped, "event stream lagged");
            Ok(Event::default().event("lagged").data("{}"))
        }
    }
}

/// Room list updates for the calling user.
pub async fn room_list_stream(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let user = actor(&headers)?;
    let session = state.service.presence().connect(user);
    let rx = state.service.hub().subscribe(&topic::room_list(user)).await;
    tracing::debug!(user = %user, "room list stream opened");

    let stream = BroadcastStream::new(rx)
        .map(to_event("summary"))
        .map(move |event| {
            let _ = &session;
            event
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.sse_keep_alive)))
}

/// Everything a participant sees live in one room: their own message views,
/// unread count batches, deletions and typing.
pub async fn room_stream(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let user = actor(&headers)?;
    state.service.membership(room_id, user).await?;

    let session = state.service.presence().connect(user);
    let hub = state.service.hub();
    let messages = hub.subscribe(&topic::room_messages(user, room_id)).await;
    let counts = hub.subscribe(&topic::read_counts(room_id)).await;
    let events = hub.subscribe(&topic::room_events(room_id)).await;
    tracing::debug!(user = %user, room = %room_id, "room stream opened");

    let stream = BroadcastStream::new(messages)
        .map(to_event("message"))
        .merge(BroadcastStream::new(counts).map(to_event("read-counts")))
        .merge(BroadcastStream::new(events).map(to_event("event")))
        .map(move |event| {
            let _ = &session;
            event
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.sse_keep_alive)))
}
