//! sketchroom — room-scoped realtime collaborative drawing server.
//!
//! Multiple participants draw on a shared canvas; each sees the others'
//! strokes and cursors live, and any participant can undo/redo the shared
//! per-room history. State is in-memory only and globally ordered per room;
//! concurrent edits resolve last-writer, not CRDT-style.

pub mod frame;
pub mod routes;
pub mod services;
pub mod state;
