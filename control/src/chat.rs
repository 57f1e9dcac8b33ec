//! Chat & notification router (spec §4.3): reliable delivery of chat and
//! system events over each participant's control connection.
//!
//! Transport-agnostic: callers register an unbounded line sink per
//! participant id (the control-connection writer task owns the actual
//! socket) and this router only ever produces and fans out rendered wire
//! lines (spec §6.2).

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::ids::ClientId;
use crate::model::{ChatKind, ChatMessage};
use crate::registry::Registry;

/// A single outbound wire line, queued to a participant's control-writer
/// task. The line includes the trailing `\n`.
pub type LineTx = mpsc::UnboundedSender<String>;

/// System-originated notifications (spec §4.3's `emit_system` kinds).
/// `Join`/`Leave` render as a generic `SYSTEM:` line; the others use their
/// own dedicated wire formats (spec §6.2).
#[derive(Clone, Debug)]
pub enum SystemEvent {
    Join { id: ClientId, username: String },
    Leave { id: ClientId, username: String },
    RosterUpdate(String),
    PresenterChange(Option<ClientId>),
    FileOffer { file_id: u32, filename: String, size: u64, uploader_name: String, uploader_id: u32 },
    FileDeleted { file_id: u32 },
}

impl SystemEvent {
    pub fn render(&self) -> String {
        match self {
            SystemEvent::Join { username, .. } => format!("SYSTEM:{username} has joined\n"),
            SystemEvent::Leave { username, .. } => format!("SYSTEM:{username} has left\n"),
            SystemEvent::RosterUpdate(encoded) => format!("ROSTER:{encoded}\n"),
            SystemEvent::PresenterChange(Some(id)) => format!("PRESENTER:{id}\n"),
            SystemEvent::PresenterChange(None) => "PRESENTER:NONE\n".to_string(),
            SystemEvent::FileOffer { file_id, filename, size, uploader_name, uploader_id } => {
                format!("FILE_OFFER:{file_id}:{filename}:{size}:{uploader_name}:{uploader_id}\n")
            }
            SystemEvent::FileDeleted { file_id } => format!("FILE_DELETED:{file_id}\n"),
        }
    }
}

pub struct ChatRouter {
    push: RwLock<HashMap<ClientId, LineTx>>,
    history: RwLock<Vec<ChatMessage>>,
}

impl Default for ChatRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatRouter {
    pub fn new() -> Self {
        Self { push: RwLock::new(HashMap::new()), history: RwLock::new(Vec::new()) }
    }

    pub fn register(&self, id: ClientId, tx: LineTx) {
        self.push.write().insert(id, tx);
    }

    pub fn unregister(&self, id: ClientId) {
        self.push.write().remove(&id);
    }

    /// Best-effort send to a single recipient. A full/closed channel is
    /// treated as `PeerGone` upstream (the writer task that owns the
    /// socket will observe the closure and trigger removal); this call
    /// never blocks and never panics on a dead peer.
    fn send_line(&self, id: ClientId, line: String) {
        if let Some(tx) = self.push.read().get(&id) {
            let _ = tx.send(line);
        }
    }

    /// Iterates a short-lived snapshot of recipients rather than holding
    /// the push-map lock during fan-out (spec §9 "Broadcast snapshots").
    fn fan_out(&self, recipients: &[ClientId], line: &str) {
        let targets: Vec<ClientId> = {
            let push = self.push.read();
            recipients.iter().copied().filter(|id| push.contains_key(id)).collect()
        };
        for id in targets {
            self.send_line(id, line.to_string());
        }
    }

    /// `broadcast_group` (spec §4.3): delivered to all current participants
    /// including the sender; appended to history.
    pub fn broadcast_group(&self, registry: &Registry, sender_id: ClientId, body: String) {
        let Some(username) = registry.username(sender_id) else { return };
        let seq = registry.next_seq();
        let ts = crate::ids::wall_clock_hms();
        let recipients = registry.live_ids();

        let line = format!("CHAT:{sender_id}:{username}:{ts}:{body}\n");
        self.history.write().push(ChatMessage {
            seq,
            kind: ChatKind::Group,
            sender_id: Some(sender_id),
            sender_name: Some(username),
            recipients: recipients.clone(),
            body,
            timestamp: ts,
        });
        self.fan_out(&recipients, &line);
    }

    /// `send_private` (spec §4.3): delivered to every named recipient and
    /// also to the sender; rendered form includes resolved recipient
    /// usernames. Unknown recipient ids are ignored. Not added to history
    /// (history replay on admission must not leak prior private
    /// conversations to a newly-joined third party — see DESIGN.md).
    pub fn send_private(&self, registry: &Registry, sender_id: ClientId, recipient_ids: &[ClientId], body: String) {
        let Some(username) = registry.username(sender_id) else { return };
        let ts = crate::ids::wall_clock_hms();

        let mut known: Vec<ClientId> = recipient_ids.iter().copied().filter(|id| registry.contains(*id)).collect();
        let names: Vec<String> = known.iter().filter_map(|id| registry.username(*id)).collect();
        let recipient_names = names.join(",");

        let line = format!("PRIVATE:{sender_id}:{username}:{ts}:{recipient_names}:{body}\n");

        if !known.contains(&sender_id) {
            known.push(sender_id);
        }
        self.fan_out(&known, &line);
    }

    /// `emit_system` (spec §4.3): delivered to all current participants.
    pub fn emit_system(&self, registry: &Registry, event: &SystemEvent) {
        let recipients = registry.live_ids();
        let line = event.render();
        self.fan_out(&recipients, &line);
    }

    /// `send_history` (spec §4.3): on admission, streams the retained group
    /// chat and join/leave notices bracketed by `HISTORY_BEGIN`/`HISTORY_END`.
    pub fn send_history(&self, id: ClientId) {
        let lines: Vec<String> = {
            let history = self.history.read();
            history
                .iter()
                .filter(|m| m.kind == ChatKind::Group)
                .map(|m| {
                    format!(
                        "CHAT:{}:{}:{}:{}\n",
                        m.sender_id.map(|s| s.0).unwrap_or(0),
                        m.sender_name.clone().unwrap_or_default(),
                        m.timestamp,
                        m.body
                    )
                })
                .collect()
        };

        self.send_line(id, "HISTORY_BEGIN\n".to_string());
        for line in lines {
            self.send_line(id, line);
        }
        self.send_line(id, "HISTORY_END\n".to_string());
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}
