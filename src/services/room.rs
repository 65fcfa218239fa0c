//! Room fan-out — delivering frames to a room's connected clients.
//!
//! DESIGN
//! ======
//! The broadcast set is computed from a fresh registry membership snapshot
//! and resolved to per-connection senders. Delivery is fire-and-forget:
//! `try_send` drops the frame when a client's channel is full. A dropped
//! stroke frame is visually self-correcting — rejoining replays the full
//! canvas snapshot.

use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::state::{AppState, Participant};

/// Broadcast a frame to every connected member of a room, optionally
/// excluding one connection (the event's originator).
pub async fn broadcast(state: &AppState, room_id: &str, frame: &Frame, exclude: Option<Uuid>) {
    let members = state.registry.members_of(room_id).await;
    let clients = state.clients.read().await;

    for member in &members {
        if exclude == Some(member.connection_id) {
            continue;
        }
        let Some(tx) = clients.get(&member.connection_id) else {
            continue;
        };
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(frame.clone());
    }
}

/// Send the current participant list to the whole room (membership changes
/// are always followed by a fresh list, so snapshot staleness never lasts).
pub async fn broadcast_participant_list(state: &AppState, room_id: &str) {
    let members = state.registry.members_of(room_id).await;
    let frame = Frame::request("room:participant-list", participant_list_data(&members))
        .with_room_id(room_id);
    broadcast(state, room_id, &frame, None).await;
}

// =============================================================================
// WIRE PAYLOADS
// =============================================================================

/// Payload for `room:participant-list`.
#[must_use]
pub fn participant_list_data(members: &[Participant]) -> Data {
    let mut data = Data::new();
    data.insert(
        "participants".into(),
        serde_json::to_value(members).unwrap_or_default(),
    );
    data
}

/// Payload for `room:joined` and `room:participant-joined`.
#[must_use]
pub fn participant_data(participant: &Participant) -> Data {
    let mut data = Data::new();
    data.insert("participant_id".into(), serde_json::json!(participant.id));
    data.insert("name".into(), serde_json::json!(participant.name));
    data.insert("color".into(), serde_json::json!(participant.color));
    data
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
