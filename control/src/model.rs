//! Data model (spec §3).

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ClientId;

/// The three datagram planes a participant may lazily bind an endpoint on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Plane {
    Video,
    Audio,
    Screen,
}

impl Plane {
    pub fn as_str(self) -> &'static str {
        match self {
            Plane::Video => "video",
            Plane::Audio => "audio",
            Plane::Screen => "screen",
        }
    }
}

/// A live participant. Datagram endpoints start absent and are learned on
/// first observed packet carrying this id (spec §3, §4.2).
#[derive(Clone, Debug)]
pub struct Participant {
    pub id: ClientId,
    pub username: String,
    pub joined_at: DateTime<Utc>,
    pub video_addr: Option<BoundEndpoint>,
    pub audio_addr: Option<BoundEndpoint>,
    pub screen_addr: Option<BoundEndpoint>,
}

impl Participant {
    pub fn new(id: ClientId, username: String) -> Self {
        Self {
            id,
            username,
            joined_at: Utc::now(),
            video_addr: None,
            audio_addr: None,
            screen_addr: None,
        }
    }

    pub fn endpoint(&self, plane: Plane) -> Option<SocketAddr> {
        match plane {
            Plane::Video => self.video_addr.as_ref().map(|b| b.addr),
            Plane::Audio => self.audio_addr.as_ref().map(|b| b.addr),
            Plane::Screen => self.screen_addr.as_ref().map(|b| b.addr),
        }
    }

    fn bound_mut(&mut self, plane: Plane) -> &mut Option<BoundEndpoint> {
        match plane {
            Plane::Video => &mut self.video_addr,
            Plane::Audio => &mut self.audio_addr,
            Plane::Screen => &mut self.screen_addr,
        }
    }

    /// Applies the datagram binding rule from spec §4.2: learn on first
    /// sight; otherwise rebind only if the previous endpoint has gone quiet
    /// for longer than `grace`.
    pub fn try_bind(&mut self, plane: Plane, addr: SocketAddr, grace: std::time::Duration) -> bool {
        let now = std::time::Instant::now();
        let slot = self.bound_mut(plane);
        match slot {
            None => {
                *slot = Some(BoundEndpoint { addr, last_seen: now });
                true
            }
            Some(bound) if bound.addr == addr => {
                bound.last_seen = now;
                true
            }
            Some(bound) if now.duration_since(bound.last_seen) >= grace => {
                *slot = Some(BoundEndpoint { addr, last_seen: now });
                true
            }
            Some(_) => false,
        }
    }

    pub fn touch(&mut self, plane: Plane) {
        if let Some(bound) = self.bound_mut(plane) {
            bound.last_seen = std::time::Instant::now();
        }
    }
}

/// A learned datagram endpoint plus the instant it last produced traffic,
/// used to enforce the rebind grace interval (spec §4.2).
#[derive(Clone, Copy, Debug)]
pub struct BoundEndpoint {
    pub addr: SocketAddr,
    pub last_seen: std::time::Instant,
}

/// Roster snapshot entry (spec §3): `[id, username]`, ordered by id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: u32,
    pub username: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Group,
    Private,
    System,
}

/// A chat or system event (spec §3). `sender_id` is absent for system
/// messages; `recipients` holds the full roster for group messages, the
/// explicit subset for private messages, and the full roster for system
/// events.
#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub seq: u64,
    pub kind: ChatKind,
    pub sender_id: Option<ClientId>,
    pub sender_name: Option<String>,
    pub recipients: Vec<ClientId>,
    pub body: String,
    pub timestamp: String,
}
