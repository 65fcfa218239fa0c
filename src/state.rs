//! Shared application state and the drawing domain model.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! composes the three server-side components: the participant registry, the
//! drawing store (per-room operation log + undo history), and the map of
//! connected client senders used for broadcast fan-out. Rooms are implicit:
//! they come into being on first mutating reference and their canvases live
//! for the process lifetime (in-memory only, no persistence).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::frame::Frame;
use crate::services::drawing::DrawingStore;
use crate::services::registry::Registry;

// =============================================================================
// DOMAIN TYPES
// =============================================================================

/// Drawing tool for one stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Brush,
    Eraser,
}

/// One sampled position within a stroke. Immutable once appended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f64,
    pub y: f64,
    /// Capture time, milliseconds since Unix epoch.
    pub t: i64,
}

/// One continuous stroke from pointer-down to pointer-up.
///
/// Mutated only by appending points or setting `ended_at` once; its author
/// is the single writer for the duration of the stroke. The record outlives
/// the author's connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawOperation {
    /// Opaque id, unique within a room. Clients may mint their own so a
    /// local echo and the network-confirmed record reconcile by identity.
    pub id: String,
    pub author_id: Uuid,
    pub tool: Tool,
    pub color: String,
    pub stroke_width: f64,
    /// Append-only; holds at least one point from creation.
    pub points: Vec<StrokePoint>,
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

/// One room's drawing history.
///
/// Invariant: every created operation lives in exactly one of `operations`
/// or `undone`. `undone` is a stack — last undone is first to redo.
#[derive(Debug, Default)]
pub struct RoomCanvas {
    /// Insertion order is the room's causal/log order.
    pub operations: Vec<DrawOperation>,
    pub undone: Vec<DrawOperation>,
}

/// One connected user within a room. Owned by the registry for the lifetime
/// of one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    #[serde(skip)]
    pub connection_id: Uuid,
    #[serde(skip)]
    pub room_id: String,
    pub name: String,
    pub color: String,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    /// Participant registry: identity, display color, room membership.
    pub registry: Registry,
    /// Room state store: per-room operation log and undo history.
    pub store: DrawingStore,
    /// Connected clients: `connection_id` -> sender for outgoing frames.
    pub clients: Arc<RwLock<HashMap<Uuid, mpsc::Sender<Frame>>>>,
    /// Per-room event locks. Held across store mutation + broadcast so every
    /// participant observes one global event order per room.
    room_locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            store: DrawingStore::new(),
            clients: Arc::new(RwLock::new(HashMap::new())),
            room_locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get-or-create the serialization lock for a room.
    pub async fn room_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.room_locks.read().await;
            if let Some(lock) = locks.get(room_id) {
                return Arc::clone(lock);
            }
        }
        let mut locks = self.room_locks.write().await;
        Arc::clone(locks.entry(room_id.to_owned()).or_default())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::frame::now_ms;

    /// Create a dummy brush operation with one seed point.
    #[must_use]
    pub fn dummy_operation(author_id: Uuid) -> DrawOperation {
        DrawOperation {
            id: Uuid::new_v4().to_string(),
            author_id,
            tool: Tool::Brush,
            color: "#ff0000".into(),
            stroke_width: 5.0,
            points: vec![StrokePoint { x: 10.0, y: 10.0, t: now_ms() }],
            started_at: now_ms(),
            ended_at: None,
        }
    }

    /// Attach a client sender under a fresh connection id and return both.
    pub async fn attach_client(state: &AppState, capacity: usize) -> (Uuid, mpsc::Receiver<Frame>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity);
        state.clients.write().await.insert(connection_id, tx);
        (connection_id, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_canvas_default_is_empty() {
        let canvas = RoomCanvas::default();
        assert!(canvas.operations.is_empty());
        assert!(canvas.undone.is_empty());
    }

    #[test]
    fn draw_operation_serde_round_trip() {
        let op = test_helpers::dummy_operation(Uuid::new_v4());
        let json = serde_json::to_string(&op).unwrap();
        let restored: DrawOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, op.id);
        assert_eq!(restored.author_id, op.author_id);
        assert_eq!(restored.tool, Tool::Brush);
        assert_eq!(restored.points.len(), 1);
        assert!((restored.stroke_width - 5.0).abs() < f64::EPSILON);
        assert!(restored.ended_at.is_none());
    }

    #[test]
    fn tool_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Tool::Brush).unwrap(), "\"brush\"");
        assert_eq!(serde_json::to_string(&Tool::Eraser).unwrap(), "\"eraser\"");
    }

    #[test]
    fn participant_wire_shape_hides_connection_fields() {
        let p = Participant {
            id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
            room_id: "r1".into(),
            name: "ada".into(),
            color: "#667eea".into(),
        };
        let value = serde_json::to_value(&p).unwrap();
        assert!(value.get("id").is_some());
        assert!(value.get("name").is_some());
        assert!(value.get("color").is_some());
        assert!(value.get("connection_id").is_none());
        assert!(value.get("room_id").is_none());
    }

    #[tokio::test]
    async fn room_lock_is_stable_per_room() {
        let state = AppState::new();
        let a = state.room_lock("r1").await;
        let b = state.room_lock("r1").await;
        let c = state.room_lock("r2").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
