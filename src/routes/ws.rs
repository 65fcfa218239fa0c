//! WebSocket handler — the synchronization coordinator.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Broadcast frames from room peers → forward to client
//!
//! Handler functions are pure business logic — they attribute the event,
//! mutate state, and return an `Outcome`. The dispatch layer owns all
//! outbound concerns: reply to sender and broadcast to room peers.
//!
//! ORDERING
//! ========
//! Room-scoped events (join, strokes, undo/redo) run under a per-room mutex
//! held across the store mutation *and* the broadcast fan-out, so every
//! participant observes one global event order per room. Cursor relays skip
//! the lock — they store nothing and carry no delivery guarantee.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `connection_id`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (reply / broadcast / both / nothing)
//! 4. Close → broadcast `room:participant-left` + fresh list → cleanup

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::room;
use crate::state::{AppState, Participant, Tool};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers only send frames directly for the
/// join fan-out, which emits several distinct notifications.
enum Outcome {
    /// Done+data to sender, request-copy with the same syscall+data to all
    /// room peers. Net effect: the entire room including the sender observes
    /// the event. Used for undo/redo, which mutate shared history that the
    /// sender's own view must reconcile against.
    Broadcast(Data),
    /// Request-copy to all room peers EXCLUDING sender, no reply. Used for
    /// stroke extend/end and cursor moves — the origin client has already
    /// rendered its own input locally.
    BroadcastExcludeSender(Data),
    /// Done+reply to sender, request-copy of `broadcast` to peers. Used for
    /// stroke begin: the sender gets the canonical operation back so a local
    /// echo reconciles by identity.
    ReplyAndBroadcast { reply: Data, broadcast: Data },
    /// Prepared frames for the sender only, in order.
    Replies(Vec<Frame>),
    /// Empty done to sender. Reports a no-op (empty-log undo/redo) without
    /// broadcasting — broadcasting a no-op would desynchronize clients.
    Done,
    /// Nothing at all. Unregistered senders and benign stroke races.
    Silent,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();

    // Per-connection channel for receiving broadcast frames from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);
    state.clients.write().await.insert(connection_id, client_tx);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("connection_id", connection_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        state.clients.write().await.remove(&connection_id);
        return;
    }

    info!(%connection_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, connection_id, text.as_str()).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(&state, connection_id).await;
    info!(%connection_id, "ws: client disconnected");
}

/// Tear down a connection: drop its sender, unregister its participant, and
/// notify the room it left.
pub(crate) async fn disconnect(state: &AppState, connection_id: Uuid) {
    // Remove the sender first so no further broadcast reaches this connection.
    state.clients.write().await.remove(&connection_id);

    let Some(participant) = state.registry.lookup(connection_id).await else {
        return;
    };

    let lock = state.room_lock(&participant.room_id).await;
    let _guard = lock.lock().await;

    let Some(participant) = state.registry.unregister(connection_id).await else {
        return;
    };

    let mut data = Data::new();
    data.insert("participant_id".into(), serde_json::json!(participant.id));
    data.insert("name".into(), serde_json::json!(participant.name));
    let left = Frame::request("room:participant-left", data).with_room_id(&participant.room_id);
    room::broadcast(state, &participant.room_id, &left, Some(connection_id)).await;
    room::broadcast_participant_list(state, &participant.room_id).await;
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the
/// sender. Broadcasts to peers happen inside, under the room lock for
/// room-scoped events.
pub(crate) async fn process_inbound_text(
    state: &AppState,
    connection_id: Uuid,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Attribute the event to the sender's participant, if registered.
    let participant = state.registry.lookup(connection_id).await;
    if let Some(p) = &participant {
        req.from = Some(p.id.to_string());
    }

    let prefix = req.prefix().to_owned();
    let is_cursor = prefix == "cursor";
    if !is_cursor {
        info!(%connection_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }

    if is_cursor {
        // Ephemeral relay: nothing stored, no ordering guarantee, no lock.
        let room_id = participant.as_ref().map(|p| p.room_id.clone());
        let result = handle_cursor(participant.as_ref(), &req);
        return apply_outcome(state, &req, connection_id, room_id.as_deref(), result).await;
    }

    let room_id = if prefix == "room" {
        requested_room_id(&req)
    } else {
        match &participant {
            Some(p) => p.room_id.clone(),
            // Connection-lifecycle race: the event arrived before a join or
            // after a disconnect. Dropped, not an error.
            None => return Vec::new(),
        }
    };

    // Serialize store mutation + broadcast: one global event order per room.
    let lock = state.room_lock(&room_id).await;
    let _guard = lock.lock().await;

    let result = match prefix.as_str() {
        "room" => handle_room(state, connection_id, &room_id, &req).await,
        "stroke" => handle_stroke(state, participant.as_ref(), &req).await,
        "history" => handle_history(state, participant.as_ref(), &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    apply_outcome(state, &req, connection_id, Some(&room_id), result).await
}

/// Apply an outcome — the dispatch layer owns all outbound logic.
async fn apply_outcome(
    state: &AppState,
    req: &Frame,
    connection_id: Uuid,
    room_id: Option<&str>,
    result: Result<Outcome, Frame>,
) -> Vec<Frame> {
    match result {
        Ok(Outcome::Broadcast(data)) => {
            let sender_frame = req.done_with(data.clone());
            if let Some(room_id) = room_id {
                let mut peer_frame = Frame::request(&req.syscall, data).with_room_id(room_id);
                peer_frame.from = req.from.clone();
                room::broadcast(state, room_id, &peer_frame, Some(connection_id)).await;
            }
            vec![sender_frame]
        }
        Ok(Outcome::BroadcastExcludeSender(data)) => {
            if let Some(room_id) = room_id {
                let mut frame = Frame::request(&req.syscall, data).with_room_id(room_id);
                frame.from = req.from.clone();
                room::broadcast(state, room_id, &frame, Some(connection_id)).await;
            }
            Vec::new()
        }
        Ok(Outcome::ReplyAndBroadcast { reply, broadcast }) => {
            let sender_frame = req.done_with(reply);
            if let Some(room_id) = room_id {
                let mut frame = Frame::request(&req.syscall, broadcast).with_room_id(room_id);
                frame.from = req.from.clone();
                room::broadcast(state, room_id, &frame, Some(connection_id)).await;
            }
            vec![sender_frame]
        }
        Ok(Outcome::Replies(frames)) => frames,
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Silent) => Vec::new(),
        Err(err_frame) => vec![err_frame],
    }
}

/// Room id a join targets: the frame envelope wins, then `data.room_id`.
/// Absent/empty maps to the empty-string room bucket, a room of its own.
fn requested_room_id(req: &Frame) -> String {
    if let Some(room_id) = &req.room_id {
        return room_id.clone();
    }
    req.data
        .get("room_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned()
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(
    state: &AppState,
    connection_id: Uuid,
    room_id: &str,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            // One room per connection: a re-join moves the participant, so
            // the previous room is notified of the departure first.
            if let Some(previous) = state.registry.unregister(connection_id).await {
                let mut data = Data::new();
                data.insert("participant_id".into(), serde_json::json!(previous.id));
                data.insert("name".into(), serde_json::json!(previous.name));
                let left = Frame::request("room:participant-left", data)
                    .with_room_id(&previous.room_id);
                room::broadcast(state, &previous.room_id, &left, Some(connection_id)).await;
                room::broadcast_participant_list(state, &previous.room_id).await;
            }

            let name = req.data.get("name").and_then(|v| v.as_str());
            let participant = state.registry.register(connection_id, room_id, name).await;
            let snapshot = state.store.snapshot(room_id).await;

            // Others learn about the newcomer; everyone (sender included,
            // via its broadcast channel) gets the fresh membership list.
            let joined_note =
                Frame::request("room:participant-joined", room::participant_data(&participant))
                    .with_room_id(room_id);
            room::broadcast(state, room_id, &joined_note, Some(connection_id)).await;
            room::broadcast_participant_list(state, room_id).await;

            let mut joined = room::participant_data(&participant);
            joined.insert("room_id".into(), serde_json::json!(room_id));

            let mut canvas = Data::new();
            canvas.insert(
                "operations".into(),
                serde_json::to_value(&snapshot).unwrap_or_default(),
            );

            Ok(Outcome::Replies(vec![
                Frame::request("room:joined", joined).with_room_id(room_id),
                Frame::request("room:canvas-state", canvas).with_room_id(room_id),
                req.done(),
            ]))
        }
        "resync" => {
            // Reconnection catch-up: operations started after the client's
            // last known timestamp, instead of a full snapshot.
            let registered_here = state
                .registry
                .lookup(connection_id)
                .await
                .is_some_and(|p| p.room_id == room_id);
            if !registered_here {
                return Ok(Outcome::Silent);
            }
            let since = req
                .data
                .get("since")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0);
            let delta = state.store.operations_since(room_id, since).await;

            let mut data = Data::new();
            data.insert("operations".into(), serde_json::to_value(&delta).unwrap_or_default());
            Ok(Outcome::Replies(vec![req.done_with(data)]))
        }
        op => Err(req.error(format!("unknown room op: {op}"))),
    }
}

// =============================================================================
// STROKE HANDLERS
// =============================================================================

async fn handle_stroke(
    state: &AppState,
    participant: Option<&Participant>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let Some(participant) = participant else {
        return Ok(Outcome::Silent);
    };
    let room_id = participant.room_id.as_str();

    match req.op() {
        "begin" => {
            let x = req.data.get("x").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            let y = req.data.get("y").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            let color = req
                .data
                .get("color")
                .and_then(|v| v.as_str())
                .unwrap_or("#000000");
            let stroke_width = req
                .data
                .get("stroke_width")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(2.0);
            let tool = match req.data.get("tool").and_then(|v| v.as_str()) {
                Some("eraser") => Tool::Eraser,
                _ => Tool::Brush,
            };
            let client_op_id = req.data.get("operation_id").and_then(|v| v.as_str());

            let operation = state
                .store
                .begin_operation(room_id, participant.id, x, y, tool, color, stroke_width, client_op_id)
                .await;

            let mut data = Data::new();
            data.insert(
                "operation".into(),
                serde_json::to_value(&operation).unwrap_or_default(),
            );
            data.insert("author_name".into(), serde_json::json!(participant.name));
            data.insert("author_color".into(), serde_json::json!(participant.color));

            Ok(Outcome::ReplyAndBroadcast { reply: data.clone(), broadcast: data })
        }
        "extend" => {
            let Some(operation_id) = req.data.get("operation_id").and_then(|v| v.as_str()) else {
                return Err(req.error("operation_id required"));
            };
            let x = req.data.get("x").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            let y = req.data.get("y").and_then(serde_json::Value::as_f64).unwrap_or(0.0);

            match state.store.append_point(room_id, operation_id, x, y).await {
                Some(point) => {
                    let mut data = Data::new();
                    data.insert("operation_id".into(), serde_json::json!(operation_id));
                    data.insert("point".into(), serde_json::to_value(point).unwrap_or_default());
                    Ok(Outcome::BroadcastExcludeSender(data))
                }
                // Benign race: the operation was undone (or never existed).
                None => Ok(Outcome::Silent),
            }
        }
        "end" => {
            let Some(operation_id) = req.data.get("operation_id").and_then(|v| v.as_str()) else {
                return Err(req.error("operation_id required"));
            };

            match state.store.finish_operation(room_id, operation_id).await {
                Some(_) => {
                    let mut data = Data::new();
                    data.insert("operation_id".into(), serde_json::json!(operation_id));
                    Ok(Outcome::BroadcastExcludeSender(data))
                }
                None => Ok(Outcome::Silent),
            }
        }
        op => Err(req.error(format!("unknown stroke op: {op}"))),
    }
}

// =============================================================================
// HISTORY HANDLERS
// =============================================================================

async fn handle_history(
    state: &AppState,
    participant: Option<&Participant>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let Some(participant) = participant else {
        return Ok(Outcome::Silent);
    };
    let room_id = participant.room_id.as_str();

    match req.op() {
        "undo" => match state.store.undo(room_id).await {
            Some(operation) => {
                let mut data = Data::new();
                data.insert("operation_id".into(), serde_json::json!(operation.id));
                data.insert("actor_id".into(), serde_json::json!(participant.id));
                data.insert("actor_name".into(), serde_json::json!(participant.name));
                Ok(Outcome::Broadcast(data))
            }
            // Empty log: report the no-op to the caller, broadcast nothing.
            None => Ok(Outcome::Done),
        },
        "redo" => match state.store.redo(room_id).await {
            Some(operation) => {
                // Full operation payload: a participant who was not the
                // original author must still be able to render it.
                let mut data = Data::new();
                data.insert(
                    "operation".into(),
                    serde_json::to_value(&operation).unwrap_or_default(),
                );
                data.insert("actor_id".into(), serde_json::json!(participant.id));
                data.insert("actor_name".into(), serde_json::json!(participant.name));
                Ok(Outcome::Broadcast(data))
            }
            None => Ok(Outcome::Done),
        },
        op => Err(req.error(format!("unknown history op: {op}"))),
    }
}

// =============================================================================
// CURSOR HANDLER
// =============================================================================

fn handle_cursor(participant: Option<&Participant>, req: &Frame) -> Result<Outcome, Frame> {
    let Some(participant) = participant else {
        // Silently ignore cursor moves before joining.
        return Ok(Outcome::Silent);
    };

    let x = req.data.get("x").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
    let y = req.data.get("y").and_then(serde_json::Value::as_f64).unwrap_or(0.0);

    let mut data = Data::new();
    data.insert("participant_id".into(), serde_json::json!(participant.id));
    data.insert("name".into(), serde_json::json!(participant.name));
    data.insert("color".into(), serde_json::json!(participant.color));
    data.insert("x".into(), serde_json::json!(x));
    data.insert("y".into(), serde_json::json!(y));

    Ok(Outcome::BroadcastExcludeSender(data))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if !frame.syscall.starts_with("cursor:") {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
