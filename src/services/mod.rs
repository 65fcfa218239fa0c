//! Server-side components: participant registry, room state store, and
//! room broadcast fan-out.

pub mod drawing;
pub mod registry;
pub mod room;
