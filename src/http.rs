//! # HTTP Front-End
//!
//! The parent process's only externally visible surface: one `axum` router
//! translating the eight endpoints of spec.md §4.6/§6 into IPC exchanges
//! with worker processes. Every handler follows the same shape — open this
//! thread's reply channel, send one request to the target session, block
//! for the reply, shape a JSON body — per spec.md's per-exchange protocol.
//!
//! Handlers run the blocking IPC round-trip inside [`tokio::task::spawn_blocking`]
//! so the async runtime's worker threads are never occupied by a socket
//! `accept()`/`connect()` loop (SPEC_FULL.md §5).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::Method;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::channel::{send_frame, ChannelReceiver};
use crate::framing::{decode_release_output, Frame, MessageKind, Payload, FORK_BUSY_SENTINEL};
use crate::registry::{HandlerIds, SessionRegistry};

/// Shared parent-process state, cloned (via `Arc`) into every request.
pub struct AppState {
    pub runtime_dir: PathBuf,
    pub connect_timeout: Duration,
    pub registry: SessionRegistry,
    pub handler_ids: HandlerIds,
}

impl AppState {
    pub fn new(runtime_dir: PathBuf, connect_timeout: Duration) -> Self {
        Self { runtime_dir, connect_timeout, registry: SessionRegistry::new(), handler_ids: HandlerIds::new() }
    }
}

/// Builds the full router: eight routes, permissive CORS, and a panic
/// backstop producing the minimal HTML 500 body spec.md requires.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chats", get(get_chats))
        .route("/init", post(post_init))
        .route("/fork/:id", post(post_fork))
        .route("/delete/:id", post(post_delete))
        .route("/send/:id", post(post_send))
        .route("/stop/:id", post(post_stop))
        .route("/update/:id", get(get_update))
        .route("/interact/:id", post(post_interact))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods([Method::GET, Method::POST]))
        .with_state(state)
}

/// One request/reply exchange with `target_id`, run on the calling
/// (blocking) thread: bind this thread's handler channel, send, block on
/// recv, and decode the reply frame. `decode_fork_response` selects
/// `Frame::decode_value` when the reply is shaped as a fixed `i32` (the
/// fork response) rather than a blob.
fn exchange(state: &AppState, target_id: i32, kind: MessageKind, payload: Payload) -> anyhow::Result<Frame> {
    let handler_id = state.handler_ids.id_for_current_thread();
    let receiver = ChannelReceiver::bind(&state.runtime_dir, handler_id)?;
    let request = Frame { sender_id: handler_id, kind, payload };
    send_frame(&state.runtime_dir, target_id, &request, state.connect_timeout)?;
    let bytes = receiver.recv_blocking()?;
    decode_reply(&bytes)
}

/// Peeks the reply's message kind to pick the right decoder — only the
/// fork response is value-shaped, everything else is empty or blob.
fn decode_reply(bytes: &[u8]) -> anyhow::Result<Frame> {
    if bytes.len() >= 8 {
        let kind_raw = i32::from_ne_bytes(bytes[4..8].try_into().unwrap());
        if kind_raw == MessageKind::ForkResponse as i32 {
            return Frame::decode_value(bytes);
        }
    }
    Frame::decode(bytes)
}

fn parse_session_id(raw: &str) -> Result<i32, Value> {
    raw.parse::<i32>().map_err(|e| json!({ "error": format!("invalid session id '{raw}': {e}") }))
}

fn require_known(state: &AppState, id: i32) -> Result<(), Value> {
    if state.registry.contains(id) {
        Ok(())
    } else {
        Err(json!({ "error": "Chat not found" }))
    }
}

fn reply_text(frame: &Frame) -> String {
    String::from_utf8_lossy(frame.blob_bytes()).into_owned()
}

fn ipc_failure(target_id: i32, e: anyhow::Error) -> Value {
    warn!(session = target_id, error = %e, "IPC exchange failed");
    json!({ "error": format!("session {target_id} is unreachable: {e}") })
}

async fn get_chats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "ids": state.registry.ascending_ids() }))
}

async fn post_init(State(state): State<Arc<AppState>>, body: String) -> Json<Value> {
    let result = tokio::task::spawn_blocking(move || -> Value {
        let fork_reply = match exchange(&state, 0, MessageKind::ForkRequest, Payload::Empty) {
            Ok(frame) => frame,
            Err(e) => return ipc_failure(0, e),
        };
        let child_id = match fork_reply.value_i32() {
            Some(FORK_BUSY_SENTINEL) | None => {
                return json!({ "error": "Fork failed, model might be busy" });
            }
            Some(id) => id,
        };

        // Inserted regardless of the Init step's outcome (spec.md §4.6,
        // §9's recorded open question).
        state.registry.insert(child_id);

        let init_reply =
            match exchange(&state, child_id, MessageKind::InitRequest, Payload::Blob(body.into_bytes())) {
                Ok(frame) => frame,
                Err(e) => return ipc_failure(child_id, e),
            };
        let text = reply_text(&init_reply);
        if text == "Success" {
            json!({ "id": child_id })
        } else {
            json!({ "error": text })
        }
    })
    .await;

    Json(match result {
        Ok(value) => value,
        Err(e) => json!({ "error": format!("init task panicked: {e}") }),
    })
}

async fn post_fork(State(state): State<Arc<AppState>>, Path(raw_id): Path<String>) -> Json<Value> {
    Json(match parse_session_id(&raw_id) {
        Err(e) => e,
        Ok(id) => {
            if let Err(e) = require_known(&state, id) {
                e
            } else {
                let blocking_state = Arc::clone(&state);
                let result = tokio::task::spawn_blocking(move || {
                    exchange(&blocking_state, id, MessageKind::ForkRequest, Payload::Empty)
                })
                .await;
                match result {
                    Ok(Ok(frame)) => match frame.value_i32() {
                        Some(FORK_BUSY_SENTINEL) | None => json!({ "error": "Fork failed, model might be busy" }),
                        Some(child_id) => {
                            state.registry.insert(child_id);
                            json!({ "id": child_id })
                        }
                    },
                    Ok(Err(e)) => ipc_failure(id, e),
                    Err(e) => json!({ "error": format!("fork task panicked: {e}") }),
                }
            }
        }
    })
}

async fn post_delete(State(state): State<Arc<AppState>>, Path(raw_id): Path<String>) -> Json<Value> {
    Json(match parse_session_id(&raw_id) {
        Err(e) => e,
        Ok(id) => {
            if let Err(e) = require_known(&state, id) {
                e
            } else {
                let blocking_state = Arc::clone(&state);
                let result = tokio::task::spawn_blocking(move || {
                    exchange(&blocking_state, id, MessageKind::KillRequest, Payload::Empty)
                })
                .await;
                match result {
                    Ok(Ok(_)) => {
                        state.registry.remove(id);
                        json!({ "deleted": id })
                    }
                    Ok(Err(e)) => ipc_failure(id, e),
                    Err(e) => json!({ "error": format!("delete task panicked: {e}") }),
                }
            }
        }
    })
}

async fn post_send(State(state): State<Arc<AppState>>, Path(raw_id): Path<String>, body: String) -> Json<Value> {
    Json(match parse_session_id(&raw_id) {
        Err(e) => e,
        Ok(id) => {
            if let Err(e) = require_known(&state, id) {
                e
            } else {
                let result = tokio::task::spawn_blocking(move || {
                    exchange(&state, id, MessageKind::SubmitInputRequest, Payload::Blob(body.into_bytes()))
                })
                .await;
                match result {
                    Ok(Ok(frame)) => {
                        let text = reply_text(&frame);
                        if text == "Success" {
                            json!({ "sent": id })
                        } else {
                            json!({ "error": text })
                        }
                    }
                    Ok(Err(e)) => ipc_failure(id, e),
                    Err(e) => json!({ "error": format!("send task panicked: {e}") }),
                }
            }
        }
    })
}

async fn post_stop(State(state): State<Arc<AppState>>, Path(raw_id): Path<String>) -> Json<Value> {
    Json(match parse_session_id(&raw_id) {
        Err(e) => e,
        Ok(id) => {
            if let Err(e) = require_known(&state, id) {
                e
            } else {
                let result =
                    tokio::task::spawn_blocking(move || exchange(&state, id, MessageKind::StopRequest, Payload::Empty))
                        .await;
                match result {
                    Ok(Ok(_)) => json!({ "stopped": id }),
                    Ok(Err(e)) => ipc_failure(id, e),
                    Err(e) => json!({ "error": format!("stop task panicked: {e}") }),
                }
            }
        }
    })
}

async fn get_update(State(state): State<Arc<AppState>>, Path(raw_id): Path<String>) -> Json<Value> {
    Json(match parse_session_id(&raw_id) {
        Err(e) => e,
        Ok(id) => {
            if let Err(e) = require_known(&state, id) {
                e
            } else {
                let result = tokio::task::spawn_blocking(move || {
                    exchange(&state, id, MessageKind::ReleaseOutputRequest, Payload::Empty)
                })
                .await;
                match result {
                    Ok(Ok(frame)) => match decode_release_output(&frame) {
                        Ok((has_more, data)) => {
                            json!({ "update": String::from_utf8_lossy(data), "finished": !has_more })
                        }
                        Err(e) => json!({ "error": format!("malformed release-output reply: {e}") }),
                    },
                    Ok(Err(e)) => ipc_failure(id, e),
                    Err(e) => json!({ "error": format!("update task panicked: {e}") }),
                }
            }
        }
    })
}

async fn post_interact(State(state): State<Arc<AppState>>, Path(raw_id): Path<String>, body: String) -> Json<Value> {
    Json(match parse_session_id(&raw_id) {
        Err(e) => e,
        Ok(id) => {
            if let Err(e) = require_known(&state, id) {
                e
            } else {
                let result = tokio::task::spawn_blocking(move || -> anyhow::Result<Value> {
                    let submit_reply =
                        exchange(&state, id, MessageKind::SubmitInputRequest, Payload::Blob(body.into_bytes()))?;
                    let submit_text = reply_text(&submit_reply);
                    if submit_text != "Success" {
                        return Ok(json!({ "error": submit_text }));
                    }

                    exchange(&state, id, MessageKind::NotifyWhenReadyRequest, Payload::Empty)?;

                    let release_reply = exchange(&state, id, MessageKind::ReleaseOutputRequest, Payload::Empty)?;
                    let (_, data) = decode_release_output(&release_reply)?;
                    Ok(json!({ "reply": String::from_utf8_lossy(data) }))
                })
                .await;
                match result {
                    Ok(Ok(value)) => value,
                    Ok(Err(e)) => ipc_failure(id, e),
                    Err(e) => json!({ "error": format!("interact task panicked: {e}") }),
                }
            }
        }
    })
}
