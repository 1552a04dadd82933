//! Registry of live WebSocket sessions on this server instance.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use actix::Addr;
use iris_client_api_proto::{RoomId, UserId};

use crate::api::client::session::WsSession;

/// Two-level mapping of the sessions attached to this instance, keyed by
/// room and user.
///
/// Directed signaling frames are routed through it: a lookup resolves the
/// recipient's session, and the frame goes into that session's mailbox.
/// Lookups take the read lock, attach/detach the write lock, and no
/// socket I/O ever happens under either. Writes reach the socket through
/// the owning session's mailbox after the guard is gone, so a recipient
/// that died in between simply drops the message.
#[derive(Clone, Default)]
pub struct RoomRegistry(
    Arc<RwLock<HashMap<RoomId, HashMap<UserId, Addr<WsSession>>>>>,
);

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `session` as the connection of `(room, user)` on this
    /// instance, returning the displaced previous session, if any.
    ///
    /// At most one session per `(room, user)` is registered at any
    /// observable instant: the caller closes whatever this returns.
    pub fn attach(
        &self,
        room: &RoomId,
        user: &UserId,
        session: Addr<WsSession>,
    ) -> Option<Addr<WsSession>> {
        self.0
            .write()
            .unwrap()
            .entry(room.clone())
            .or_default()
            .insert(user.clone(), session)
    }

    /// Removes the `(room, user)` entry if it still maps to `session`.
    ///
    /// A late detach of an already displaced session is a no-op, so a
    /// superseded connection cleaning up after itself cannot evict its
    /// successor. Rooms with no remaining sessions are pruned.
    pub fn detach(
        &self,
        room: &RoomId,
        user: &UserId,
        session: &Addr<WsSession>,
    ) {
        let mut rooms = self.0.write().unwrap();
        if let Some(members) = rooms.get_mut(room) {
            if members.get(user) == Some(session) {
                members.remove(user);
            }
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Returns the live session of `(room, user)` on this instance, if
    /// any.
    #[must_use]
    pub fn lookup(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Option<Addr<WsSession>> {
        self.0
            .read()
            .unwrap()
            .get(room)
            .and_then(|members| members.get(user))
            .cloned()
    }
}
