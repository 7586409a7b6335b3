use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parlor_engine::collaborators::UploadTicket;
use parlor_engine::{
    ChatService, DeleteOutcome, GroupView, NewGroup, ParticipantView, ReadReceipt,
};
use parlor_shared::constants::MESSAGE_PAGE_SIZE;
use parlor_shared::protocol::{MessageView, RoomSummary};
use parlor_shared::types::{MessageId, MessageKind, RoomId, UserId};
use parlor_store::{Participant, Room, Transition};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::sse;

/// Header carrying the authenticated user id, set by the gateway in front of
/// this service.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub service: ChatService,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // rooms
        .route("/rooms", get(list_rooms))
        .route("/rooms/search", get(search_my_rooms))
        .route("/rooms/direct", post(create_direct))
        .route("/rooms/:room_id", get(room_summary))
        .route("/rooms/:room_id/is-group", get(is_group))
        .route("/rooms/:room_id/join", post(join_group))
        .route("/rooms/:room_id/leave", post(leave_room))
        .route("/rooms/:room_id/participants", get(participants))
        .route("/rooms/:room_id/translation", put(set_translation))
        .route("/rooms/:room_id/notifications", put(set_notifications))
        // groups
        .route("/groups", post(create_group))
        .route("/groups/search", get(search_groups))
        .route("/groups/latest", get(latest_groups))
        .route("/groups/popular", get(popular_groups))
        // messages
        .route("/rooms/:room_id/messages", get(list_messages).post(send_text))
        .route("/rooms/:room_id/messages/first", get(first_messages))
        .route("/rooms/:room_id/messages/search", get(search_messages))
        .route("/rooms/:room_id/messages/around/:message_id", get(messages_around))
        .route("/rooms/:room_id/media", post(send_media))
        .route("/rooms/:room_id/upload-url", post(upload_url))
        .route("/messages/:message_id", delete(delete_message))
        // reads and ephemeral
        .route("/rooms/:room_id/read", post(mark_read))
        .route("/rooms/:room_id/read-all", post(mark_all_read))
        .route("/rooms/:room_id/typing", post(typing))
        // live streams
        .route("/streams/rooms", get(sse::room_list_stream))
        .route("/streams/rooms/:room_id", get(sse::room_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The acting user, taken from [`USER_HEADER`].
pub(crate) fn actor(headers: &HeaderMap) -> Result<UserId, ServerError> {
    let raw = headers
        .get(USER_HEADER)
        .ok_or_else(|| ServerError::Unauthorized(format!("missing {USER_HEADER} header")))?
        .to_str()
        .map_err(|_| ServerError::Unauthorized(format!("unreadable {USER_HEADER} header")))?;

    raw.trim()
        .parse::<i64>()
        .map(UserId)
        .map_err(|_| ServerError::Unauthorized(format!("invalid {USER_HEADER}: {raw:?}")))
}

const MAX_LISTING_LIMIT: u32 = 100;

fn listing_limit(requested: Option<u32>) -> Result<u32, ServerError> {
    match requested {
        None => Ok(MESSAGE_PAGE_SIZE),
        Some(n) if (1..=MAX_LISTING_LIMIT).contains(&n) => Ok(n),
        Some(n) => Err(ServerError::BadRequest(format!(
            "limit must be between 1 and {MAX_LISTING_LIMIT}, got {n}"
        ))),
    }
}

// =============================================================================
// Request / response bodies
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectRoomRequest {
    peer_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    name: String,
    description: Option<String>,
    image_url: Option<String>,
}

#[derive(Deserialize)]
struct KeywordQuery {
    keyword: String,
}

#[derive(Deserialize)]
struct LatestGroupsQuery {
    before: Option<RoomId>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct PageQuery {
    before: Option<MessageId>,
}

#[derive(Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

#[derive(Deserialize)]
struct SendTextRequest {
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMediaRequest {
    key: String,
    message_type: MessageKind,
}

#[derive(Deserialize)]
struct UploadUrlRequest {
    filename: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadRequest {
    message_id: MessageId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingRequest {
    is_typing: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IsGroupResponse {
    is_group: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransitionResponse {
    transitions: Vec<Transition>,
    room_deleted: bool,
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_rooms(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<RoomSummary>>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.list_rooms(user).await?))
}

async fn search_my_rooms(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(q): Query<KeywordQuery>,
) -> Result<Json<Vec<RoomSummary>>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.search_my_rooms(user, &q.keyword).await?))
}

async fn create_direct(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<DirectRoomRequest>,
) -> Result<Json<Room>, ServerError> {
    let user = actor(&headers)?;
    let room = state.service.create_one_to_one(user, req.peer_id).await?;
    info!(room = %room.id, requester = %user, peer = %req.peer_id, "direct room ready");
    Ok(Json(room))
}

async fn room_summary(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<RoomSummary>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.room_summary(room_id, user).await?))
}

async fn is_group(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<IsGroupResponse>, ServerError> {
    let is_group = state.service.is_group(room_id).await?;
    Ok(Json(IsGroupResponse { is_group }))
}

async fn join_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<TransitionResponse>, ServerError> {
    let user = actor(&headers)?;
    let transition = state.service.join_group(room_id, user).await?;
    Ok(Json(TransitionResponse {
        transitions: vec![transition],
        room_deleted: false,
    }))
}

async fn leave_room(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<TransitionResponse>, ServerError> {
    let user = actor(&headers)?;
    let departure = state.service.leave(room_id, user).await?;
    Ok(Json(TransitionResponse {
        transitions: departure.transitions,
        room_deleted: departure.room_deleted,
    }))
}

async fn participants(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Vec<ParticipantView>>, ServerError> {
    Ok(Json(state.service.room_participants(room_id).await?))
}

async fn set_translation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<Participant>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.toggle_translation(room_id, user, req.enabled).await?))
}

async fn set_notifications(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<Participant>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(
        state
            .service
            .toggle_notifications(room_id, user, req.enabled)
            .await?,
    ))
}

async fn create_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<Room>, ServerError> {
    let user = actor(&headers)?;
    let room = state
        .service
        .create_group(
            user,
            NewGroup {
                name: req.name,
                description: req.description,
                image_url: req.image_url,
            },
        )
        .await?;
    info!(room = %room.id, owner = %user, "group created");
    Ok(Json(room))
}

async fn search_groups(
    State(state): State<AppState>,
    Query(q): Query<KeywordQuery>,
) -> Result<Json<Vec<GroupView>>, ServerError> {
    Ok(Json(state.service.search_groups(&q.keyword).await?))
}

async fn latest_groups(
    State(state): State<AppState>,
    Query(q): Query<LatestGroupsQuery>,
) -> Result<Json<Vec<GroupView>>, ServerError> {
    let limit = listing_limit(q.limit)?;
    Ok(Json(state.service.latest_groups(q.before, limit).await?))
}

async fn popular_groups(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<GroupView>>, ServerError> {
    let limit = listing_limit(q.limit)?;
    Ok(Json(state.service.popular_groups(limit).await?))
}

async fn list_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.list_messages(room_id, user, q.before).await?))
}

async fn first_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.first_messages(room_id, user).await?))
}

async fn search_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Query(q): Query<KeywordQuery>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.search_keyword(room_id, user, &q.keyword).await?))
}

async fn messages_around(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(RoomId, MessageId)>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.messages_around(room_id, user, message_id).await?))
}

async fn send_text(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<SendTextRequest>,
) -> Result<Json<MessageView>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.send_text(room_id, user, &req.content).await?))
}

async fn send_media(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<SendMediaRequest>,
) -> Result<Json<MessageView>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(
        state
            .service
            .send_media(room_id, user, &req.key, req.message_type)
            .await?,
    ))
}

async fn upload_url(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<UploadUrlRequest>,
) -> Result<Json<UploadTicket>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(
        state
            .service
            .media_upload_url(room_id, user, &req.filename)
            .await?,
    ))
}

async fn delete_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
) -> Result<Json<DeleteOutcome>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.delete_message(message_id, user).await?))
}

async fn mark_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<ReadReceipt>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.mark_read(room_id, user, req.message_id).await?))
}

async fn mark_all_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<ReadReceipt>, ServerError> {
    let user = actor(&headers)?;
    Ok(Json(state.service.mark_all_read(room_id, user).await?))
}

async fn typing(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<TypingRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = actor(&headers)?;
    state.service.typing(room_id, user, req.is_typing).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use parlor_engine::collaborators::{
        Blake3UploadSigner, Collaborators, LogNotifier, MemoryBlockList, MemoryDirectory,
        NoopTranslator,
    };
    use parlor_engine::DbPool;

    fn app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::open(&dir.path().join("api.db"), 2).unwrap();
        let config = ServerConfig::default();
        let collab = Collaborators {
            translator: Arc::new(NoopTranslator),
            notifier: Arc::new(LogNotifier),
            blocks: Arc::new(MemoryBlockList::new()),
            directory: Arc::new(MemoryDirectory::new()),
            uploads: Arc::new(Blake3UploadSigner::new(
                config.upload_base_url.clone(),
                [7u8; 32],
                Duration::from_secs(60),
            )),
        };
        let service = ChatService::new(pool, config.engine_config(), collab);
        let state = AppState {
            service,
            config: Arc::new(config),
        };
        (build_router(state), dir)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header(USER_HEADER, user.to_string());
        }
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_needs_no_user() {
        let (app, _dir) = app();
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_user_header_is_unauthorized() {
        let (app, _dir) = app();
        let (status, body) = call(&app, "GET", "/rooms", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains(USER_HEADER));
    }

    #[tokio::test]
    async fn direct_chat_round_trip() {
        let (app, _dir) = app();
        let (status, room) = call(
            &app,
            "POST",
            "/rooms/direct",
            Some(1),
            Some(serde_json::json!({ "peerId": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let room_id = room["id"].as_i64().unwrap();

        let (status, sent) = call(
            &app,
            "POST",
            &format!("/rooms/{room_id}/messages"),
            Some(1),
            Some(serde_json::json!({ "content": "hi there" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sent["originContent"], "hi there");
        assert_eq!(sent["messageType"], "TEXT");

        let (status, page) =
            call(&app, "GET", &format!("/rooms/{room_id}/messages"), Some(2), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page.as_array().unwrap().len(), 1);

        let (status, rooms) = call(&app, "GET", "/rooms", Some(2), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rooms[0]["unreadCount"], 1);

        let message_id = sent["id"].as_i64().unwrap();
        let (status, receipt) = call(
            &app,
            "POST",
            &format!("/rooms/{room_id}/read"),
            Some(2),
            Some(serde_json::json!({ "messageId": message_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["lastReadMessageId"], message_id);

        let (status, _) =
            call(&app, "DELETE", &format!("/messages/{message_id}"), Some(2), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, outcome) =
            call(&app, "DELETE", &format!("/messages/{message_id}"), Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["deleted"], true);
    }

    #[tokio::test]
    async fn outsiders_cannot_read_history() {
        let (app, _dir) = app();
        let (_, room) = call(
            &app,
            "POST",
            "/groups",
            Some(1),
            Some(serde_json::json!({ "name": "Book club" })),
        )
        .await;
        let room_id = room["id"].as_i64().unwrap();

        let (status, body) =
            call(&app, "GET", &format!("/rooms/{room_id}/messages"), Some(9), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let (status, _) = call(&app, "GET", "/rooms/4242/messages", Some(1), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn group_lifecycle() {
        let (app, _dir) = app();
        let (_, room) = call(
            &app,
            "POST",
            "/groups",
            Some(1),
            Some(serde_json::json!({ "name": "Night owls", "description": "late chats" })),
        )
        .await;
        let room_id = room["id"].as_i64().unwrap();

        let (status, joined) =
            call(&app, "POST", &format!("/rooms/{room_id}/join"), Some(2), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined["roomDeleted"], false);

        let (_, found) = call(&app, "GET", "/groups/search?keyword=owl", Some(3), None).await;
        assert_eq!(found[0]["participantCount"], 2);
        let (status, _) = call(&app, "GET", "/groups/popular?limit=0", Some(3), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, left) =
            call(&app, "POST", &format!("/rooms/{room_id}/leave"), Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(left["roomDeleted"], false);

        let (_, people) =
            call(&app, "GET", &format!("/rooms/{room_id}/participants"), Some(2), None).await;
        assert_eq!(people[0]["userId"], 2);
        assert_eq!(people[0]["isHost"], true);

        let (_, left) =
            call(&app, "POST", &format!("/rooms/{room_id}/leave"), Some(2), None).await;
        assert_eq!(left["roomDeleted"], true);
        let (status, _) =
            call(&app, "GET", &format!("/rooms/{room_id}/is-group"), Some(2), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn media_flow() {
        let (app, _dir) = app();
        let (_, room) = call(
            &app,
            "POST",
            "/rooms/direct",
            Some(1),
            Some(serde_json::json!({ "peerId": 2 })),
        )
        .await;
        let room_id = room["id"].as_i64().unwrap();

        let (status, ticket) = call(
            &app,
            "POST",
            &format!("/rooms/{room_id}/upload-url"),
            Some(1),
            Some(serde_json::json!({ "filename": "cat.png" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let key = ticket["key"].as_str().unwrap().to_string();
        assert!(key.starts_with(&format!("chats/{room_id}/")));

        let (status, sent) = call(
            &app,
            "POST",
            &format!("/rooms/{room_id}/media"),
            Some(1),
            Some(serde_json::json!({ "key": key, "messageType": "IMAGE" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(sent["originContent"].as_str().unwrap().ends_with(&key));

        let (status, _) = call(
            &app,
            "POST",
            &format!("/rooms/{room_id}/media"),
            Some(1),
            Some(serde_json::json!({ "key": "elsewhere/x.png", "messageType": "IMAGE" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn room_stream_requires_membership() {
        let (app, _dir) = app();
        let (_, room) = call(
            &app,
            "POST",
            "/rooms/direct",
            Some(1),
            Some(serde_json::json!({ "peerId": 2 })),
        )
        .await;
        let room_id = room["id"].as_i64().unwrap();

        let (status, _) =
            call(&app, "GET", &format!("/streams/rooms/{room_id}"), Some(3), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let req = Request::builder()
            .uri(format!("/streams/rooms/{room_id}"))
            .header(USER_HEADER, "2")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
    }
}
