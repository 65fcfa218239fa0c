//! Participant registry — identity, display color, room membership.
//!
//! DESIGN
//! ======
//! The registry owns every `Participant` for the lifetime of its connection.
//! Registration never fails: a missing name gets a generated placeholder and
//! a color is assigned round-robin from a fixed palette via a process-wide
//! cursor (collisions after the palette wraps are fine). `members_of` hands
//! out snapshots — callers accept immediate staleness because a fresh
//! participant-list broadcast follows every membership change.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::state::Participant;

/// Display colors handed out round-robin to new participants.
const PARTICIPANT_COLORS: [&str; 16] = [
    "#667eea", "#f093fb", "#4facfe", "#43e97b",
    "#fa709a", "#30cfd0", "#a8edea", "#ff9a9e",
    "#ffecd2", "#ff6b6b", "#c471ed", "#12c2e9",
    "#764ba2", "#f5576c", "#00f2fe", "#38f9d7",
];

#[derive(Default)]
struct RegistryInner {
    /// Participants keyed by connection id.
    participants: HashMap<Uuid, Participant>,
    /// Connection ids per room. The entry itself is removed when the last
    /// member leaves; the room's canvas is untouched.
    room_members: HashMap<String, HashSet<Uuid>>,
    /// Round-robin cursor into `PARTICIPANT_COLORS`.
    color_cursor: usize,
}

/// Cloneable handle to the registry state.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection into a room. Never fails; an empty requested
    /// name is replaced by a generated placeholder.
    pub async fn register(
        &self,
        connection_id: Uuid,
        room_id: &str,
        requested_name: Option<&str>,
    ) -> Participant {
        let mut inner = self.inner.write().await;

        let id = Uuid::new_v4();
        let color = PARTICIPANT_COLORS[inner.color_cursor % PARTICIPANT_COLORS.len()].to_owned();
        inner.color_cursor += 1;

        let name = match requested_name {
            Some(name) if !name.trim().is_empty() => name.to_owned(),
            _ => format!("User {}", &id.to_string()[..8]),
        };

        let participant = Participant {
            id,
            connection_id,
            room_id: room_id.to_owned(),
            name,
            color,
        };

        inner.participants.insert(connection_id, participant.clone());
        inner
            .room_members
            .entry(room_id.to_owned())
            .or_default()
            .insert(connection_id);

        info!(participant_id = %participant.id, room_id, name = %participant.name, "participant registered");
        participant
    }

    /// Look up the participant behind a connection. Used to attribute every
    /// inbound event; `None` means the event should be dropped.
    pub async fn lookup(&self, connection_id: Uuid) -> Option<Participant> {
        self.inner.read().await.participants.get(&connection_id).cloned()
    }

    /// Remove a connection's participant and its room membership. Removes
    /// the room-membership entry when it empties.
    pub async fn unregister(&self, connection_id: Uuid) -> Option<Participant> {
        let mut inner = self.inner.write().await;
        let participant = inner.participants.remove(&connection_id)?;

        if let Some(members) = inner.room_members.get_mut(&participant.room_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                inner.room_members.remove(&participant.room_id);
            }
        }

        info!(participant_id = %participant.id, room_id = %participant.room_id, "participant unregistered");
        Some(participant)
    }

    /// Snapshot of a room's current members. Stale the moment it is
    /// returned; never a live view.
    pub async fn members_of(&self, room_id: &str) -> Vec<Participant> {
        let inner = self.inner.read().await;
        let Some(members) = inner.room_members.get(room_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|connection_id| inner.participants.get(connection_id).cloned())
            .collect()
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
