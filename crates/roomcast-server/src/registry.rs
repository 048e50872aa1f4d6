//! RoomRegistry: room key → session id → session handle.
//!
//! The registry holds non-owning lookups: removing an entry never closes the
//! session. Uses parking_lot::RwLock (sync) so lookups can happen from both
//! sync and async contexts; the lock is never held across an await or while
//! delivering frames.

use std::collections::HashMap;

use parking_lot::RwLock;
use roomcast_protocol::{BroadcastOptions, CloseCode};
use serde::Serialize;
use tracing::debug;

use crate::context::Frame;
use crate::session::SessionHandle;

/// Snapshot of registry occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub sessions: usize,
    pub rooms: usize,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, HashMap<String, SessionHandle>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session into a room.
    pub fn join(&self, room_key: &str, session_id: &str, session: SessionHandle) {
        let mut rooms = self.rooms.write();
        rooms
            .entry(room_key.to_string())
            .or_default()
            .insert(session_id.to_string(), session);
        debug!("Session {session_id} joined {room_key}");
    }

    /// Remove a session from a room. Absent sessions are a no-op; empty
    /// rooms are pruned.
    pub fn leave(&self, room_key: &str, session_id: &str) -> bool {
        let mut rooms = self.rooms.write();
        let Some(members) = rooms.get_mut(room_key) else {
            return false;
        };
        let removed = members.remove(session_id).is_some();
        if members.is_empty() {
            rooms.remove(room_key);
        }
        if removed {
            debug!("Session {session_id} left {room_key}");
        }
        removed
    }

    /// Consistent snapshot of a room's members.
    pub fn members_of(&self, room_key: &str) -> Vec<SessionHandle> {
        self.rooms
            .read()
            .get(room_key)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, room_key: &str, session_id: &str) -> bool {
        self.rooms
            .read()
            .get(room_key)
            .is_some_and(|members| members.contains_key(session_id))
    }

    /// Deliver a text payload to every open member of a room, skipping the
    /// sender when `ignore_self` is set. Returns the number of deliveries.
    ///
    /// This is the only delivery path: local broadcasts and relay
    /// subscribers both end up here.
    pub fn deliver(
        &self,
        room_key: &str,
        data: &str,
        sender_id: &str,
        options: BroadcastOptions,
    ) -> usize {
        let mut delivered = 0;
        for member in self.members_of(room_key) {
            if options.ignore_self && member.id() == sender_id {
                continue;
            }
            // Members closed after the snapshot are skipped here or by send().
            if !member.is_ready() {
                continue;
            }
            if member.send(Frame::Text(data.to_string())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Every registered session across all rooms.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.rooms
            .read()
            .values()
            .flat_map(|members| members.values().cloned())
            .collect()
    }

    /// Close every registered session. Returns how many were closed.
    pub fn close_all(&self, code: CloseCode, reason: &str) -> usize {
        self.sessions()
            .into_iter()
            .filter(|session| session.close(code, reason))
            .count()
    }

    pub fn len(&self) -> usize {
        self.rooms.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.read().is_empty()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn stats(&self) -> RegistryStats {
        let rooms = self.rooms.read();
        RegistryStats {
            sessions: rooms.values().map(HashMap::len).sum(),
            rooms: rooms.len(),
        }
    }
}
