//! Room state store — per-room operation log and undo/redo history.
//!
//! DESIGN
//! ======
//! All drawing state is keyed by room id with get-or-create semantics on
//! mutation: rooms are implicit, there is no create-room operation. A room's
//! canvas lives for the process lifetime once created. Undo/redo is global
//! per room, not per author: any participant's undo removes the room's most
//! recent stroke regardless of who drew it. Redo reinserts at the current
//! log tail, which can reorder history relative to strokes drawn in between
//! on another interleaving — a preserved limitation of the single-branch
//! history model.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here fails terminally. Unknown operation ids and empty-log
//! underflows return `None` — they arise from legitimate concurrent
//! undo/draw interleavings and callers drop the event without broadcasting.
//!
//! Per-room `operations` growth is unbounded (no compaction, no room
//! expiry). That is an operational risk for the surrounding system, not
//! something this store mitigates.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::frame::now_ms;
use crate::state::{DrawOperation, RoomCanvas, StrokePoint, Tool};

/// Cloneable handle to all room canvases.
#[derive(Clone, Default)]
pub struct DrawingStore {
    rooms: Arc<RwLock<HashMap<String, RoomCanvas>>>,
}

impl DrawingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new operation at the room's log tail, seeded with one point.
    ///
    /// Clears the room's undone stack: once new drawing happens, previously
    /// undone strokes are no longer redoable against the new log. A
    /// client-supplied id is used verbatim so the author's local echo and
    /// the confirmed record reconcile by identity.
    pub async fn begin_operation(
        &self,
        room_id: &str,
        author_id: Uuid,
        x: f64,
        y: f64,
        tool: Tool,
        color: &str,
        stroke_width: f64,
        client_op_id: Option<&str>,
    ) -> DrawOperation {
        let mut rooms = self.rooms.write().await;
        let canvas = rooms.entry(room_id.to_owned()).or_default();

        canvas.undone.clear();

        let now = now_ms();
        let operation = DrawOperation {
            id: client_op_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_owned),
            author_id,
            tool,
            color: color.to_owned(),
            stroke_width,
            points: vec![StrokePoint { x, y, t: now }],
            started_at: now,
            ended_at: None,
        };

        canvas.operations.push(operation.clone());
        debug!(room_id, operation_id = %operation.id, log_len = canvas.operations.len(), "operation begun");
        operation
    }

    /// Append a point to a live operation and return it for echo.
    ///
    /// Searches the live log only — an operation that was already undone
    /// cannot receive new points. `None` is a benign race, not an error.
    pub async fn append_point(
        &self,
        room_id: &str,
        operation_id: &str,
        x: f64,
        y: f64,
    ) -> Option<StrokePoint> {
        let mut rooms = self.rooms.write().await;
        let canvas = rooms.get_mut(room_id)?;
        let operation = canvas.operations.iter_mut().find(|op| op.id == operation_id)?;

        let point = StrokePoint { x, y, t: now_ms() };
        operation.points.push(point);
        Some(point)
    }

    /// Mark an operation finished. Sets `ended_at` exactly once; a repeat
    /// call returns the operation without moving the timestamp.
    pub async fn finish_operation(&self, room_id: &str, operation_id: &str) -> Option<DrawOperation> {
        let mut rooms = self.rooms.write().await;
        let canvas = rooms.get_mut(room_id)?;
        let operation = canvas.operations.iter_mut().find(|op| op.id == operation_id)?;

        if operation.ended_at.is_none() {
            operation.ended_at = Some(now_ms());
        }
        Some(operation.clone())
    }

    /// Pop the room's most recent operation onto the undone stack.
    ///
    /// Strict LIFO over the entire room's log — not per author. `None` on
    /// an empty log; the caller must not broadcast in that case.
    pub async fn undo(&self, room_id: &str) -> Option<DrawOperation> {
        let mut rooms = self.rooms.write().await;
        let canvas = rooms.get_mut(room_id)?;
        let operation = canvas.operations.pop()?;
        canvas.undone.push(operation.clone());
        debug!(room_id, operation_id = %operation.id, "operation undone");
        Some(operation)
    }

    /// Restore the most recently undone operation to the current log tail.
    ///
    /// `None` when nothing is undone; the caller must not broadcast.
    pub async fn redo(&self, room_id: &str) -> Option<DrawOperation> {
        let mut rooms = self.rooms.write().await;
        let canvas = rooms.get_mut(room_id)?;
        let operation = canvas.undone.pop()?;
        canvas.operations.push(operation.clone());
        debug!(room_id, operation_id = %operation.id, "operation redone");
        Some(operation)
    }

    /// Point-in-time copy of a room's live operation log, used to replay
    /// full state to a newly joined participant. An unknown room yields an
    /// empty list without allocating a canvas.
    pub async fn snapshot(&self, room_id: &str) -> Vec<DrawOperation> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map_or_else(Vec::new, |canvas| canvas.operations.clone())
    }

    /// Live operations started strictly after `since_ms`. Reconnection
    /// catch-up helper: a client that kept its local state can ask for the
    /// delta instead of a full snapshot.
    pub async fn operations_since(&self, room_id: &str, since_ms: i64) -> Vec<DrawOperation> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map_or_else(Vec::new, |canvas| {
            canvas
                .operations
                .iter()
                .filter(|op| op.started_at > since_ms)
                .cloned()
                .collect()
        })
    }

    /// Count of operations on the undone stack. Test/diagnostic accessor.
    #[cfg(test)]
    pub async fn undone_len(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map_or(0, |canvas| canvas.undone.len())
    }
}

#[cfg(test)]
#[path = "drawing_test.rs"]
mod tests;
