//! Session registry (spec §4.2): the authoritative roster and the
//! datagram-endpoint binding rules shared by every media plane.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::RwLock;

use crate::errors::{ServerError, ServerResult};
use crate::ids::{ClientId, IdAllocator};
use crate::model::{Participant, Plane, RosterEntry};

/// Default rebind grace interval (spec §4.2): a previously-bound datagram
/// endpoint must be silent this long before a different source address for
/// the same id is allowed to take over.
pub const DEFAULT_REBIND_GRACE: Duration = Duration::from_secs(5);

pub struct Registry {
    ids: IdAllocator,
    max_users: usize,
    rebind_grace: Duration,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    participants: HashMap<ClientId, Participant>,
    by_video_addr: HashMap<SocketAddr, ClientId>,
    by_audio_addr: HashMap<SocketAddr, ClientId>,
    by_screen_addr: HashMap<SocketAddr, ClientId>,
}

impl Inner {
    fn addr_map_mut(&mut self, plane: Plane) -> &mut HashMap<SocketAddr, ClientId> {
        match plane {
            Plane::Video => &mut self.by_video_addr,
            Plane::Audio => &mut self.by_audio_addr,
            Plane::Screen => &mut self.by_screen_addr,
        }
    }

    fn addr_map(&self, plane: Plane) -> &HashMap<SocketAddr, ClientId> {
        match plane {
            Plane::Video => &self.by_video_addr,
            Plane::Audio => &self.by_audio_addr,
            Plane::Screen => &self.by_screen_addr,
        }
    }
}

impl Registry {
    pub fn new(max_users: usize) -> Self {
        Self::with_rebind_grace(max_users, DEFAULT_REBIND_GRACE)
    }

    pub fn with_rebind_grace(max_users: usize, rebind_grace: Duration) -> Self {
        Self {
            ids: IdAllocator::new(),
            max_users,
            rebind_grace,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Admits a new participant, assigning it the next client id.
    pub fn add(&self, username: String) -> ServerResult<ClientId> {
        let mut inner = self.inner.write();
        if inner.participants.len() >= self.max_users {
            return Err(ServerError::CapacityError("server full"));
        }
        let id = self.ids.next_client_id();
        inner.participants.insert(id, Participant::new(id, username));
        Ok(id)
    }

    /// Removes a participant and all endpoint bindings it accumulated.
    /// Idempotent: removing an id twice is a no-op the second time.
    pub fn remove(&self, id: ClientId) {
        let mut inner = self.inner.write();
        if let Some(p) = inner.participants.remove(&id) {
            for plane in [Plane::Video, Plane::Audio, Plane::Screen] {
                if let Some(addr) = p.endpoint(plane) {
                    inner.addr_map_mut(plane).remove(&addr);
                }
            }
        }
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.inner.read().participants.contains_key(&id)
    }

    pub fn username(&self, id: ClientId) -> Option<String> {
        self.inner.read().participants.get(&id).map(|p| p.username.clone())
    }

    /// Applies the datagram binding rule from spec §4.2. Returns `true` if
    /// the endpoint is now associated with `id` on `plane` (whether newly
    /// learned, reconfirmed, or rebound); `false` if the packet should be
    /// dropped because a live, still-fresh binding belongs to someone else.
    pub fn bind_datagram(&self, id: ClientId, plane: Plane, addr: SocketAddr) -> bool {
        let mut inner = self.inner.write();

        if let Some(owner) = inner.addr_map(plane).get(&addr).copied() {
            if owner != id {
                // Address currently attributed to someone else; only a
                // stale binding may be stolen, and only by its own id
                // reappearing elsewhere is handled below, not by a
                // different id claiming this address.
                return false;
            }
        }

        let Some(participant) = inner.participants.get_mut(&id) else {
            return false;
        };
        let ok = participant.try_bind(plane, addr, self.rebind_grace);
        if ok {
            if let Some(old_owner) = inner
                .addr_map(plane)
                .iter()
                .find(|(a, owner)| **owner == id && **a != addr)
                .map(|(a, _)| *a)
            {
                inner.addr_map_mut(plane).remove(&old_owner);
            }
            inner.addr_map_mut(plane).insert(addr, id);
        }
        ok
    }

    /// O(1) lookup from a learned datagram source address back to the
    /// owning participant id.
    pub fn resolve_by_datagram(&self, plane: Plane, addr: SocketAddr) -> Option<ClientId> {
        self.inner.read().addr_map(plane).get(&addr).copied()
    }

    /// Refreshes the liveness timestamp of an already-bound endpoint
    /// without changing ownership; called on every accepted datagram.
    pub fn touch(&self, id: ClientId, plane: Plane) {
        if let Some(p) = self.inner.write().participants.get_mut(&id) {
            p.touch(plane);
        }
    }

    pub fn endpoint(&self, id: ClientId, plane: Plane) -> Option<SocketAddr> {
        self.inner.read().participants.get(&id).and_then(|p| p.endpoint(plane))
    }

    /// Deterministic, id-ordered snapshot of the live roster (spec §3).
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        let inner = self.inner.read();
        let mut out: Vec<RosterEntry> = inner
            .participants
            .values()
            .map(|p| RosterEntry { id: p.id.0, username: p.username.clone() })
            .collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Snapshot of live ids only, ordered, used by fan-out loops that need
    /// to iterate recipients without holding the registry lock during I/O
    /// (spec §5, §9 "Broadcast snapshots").
    pub fn live_ids(&self) -> Vec<ClientId> {
        let inner = self.inner.read();
        let mut ids: Vec<ClientId> = inner.participants.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_users(&self) -> usize {
        self.max_users
    }

    /// Assigns the next file id; delegated here so the catalog and the
    /// registry share a single `IdAllocator` the way spec §4.8 describes a
    /// single Clock & Identifier service.
    pub fn next_file_id(&self) -> crate::ids::FileId {
        self.ids.next_file_id()
    }

    pub fn next_seq(&self) -> u64 {
        self.ids.next_seq().0
    }
}
