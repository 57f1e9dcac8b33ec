//! Clock & Identifier service (spec §4.8): monotonic id allocation and
//! wall-clock / monotonic timestamps used by chat history and staleness
//! eviction.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A participant id, assigned at registration and never reused within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A catalog entry id, assigned only once an upload fully completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chat message sequence number, monotonic for the life of the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Seq(pub u64);

/// Monotonic counters backing `next_client_id` / `next_file_id` (spec §4.8).
/// Never wraps within a realistic server run.
#[derive(Default)]
pub struct IdAllocator {
    next_client: AtomicU32,
    next_file: AtomicU32,
    next_seq: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_client_id(&self) -> ClientId {
        ClientId(self.next_client.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_file_id(&self) -> FileId {
        FileId(self.next_file.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_seq(&self) -> Seq {
        Seq(self.next_seq.fetch_add(1, Ordering::Relaxed))
    }
}

/// Wall-clock timestamp formatted as `HH:MM:SS`, used for chat rendering.
pub fn wall_clock_hms() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

/// Monotonic instant, used for staleness eviction (audio buckets, datagram
/// endpoint rebind grace windows).
pub type Monotonic = Instant;

pub fn now_monotonic() -> Monotonic {
    Instant::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let alloc = IdAllocator::new();
        let a = alloc.next_client_id();
        let b = alloc.next_client_id();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn file_and_client_ids_are_independent_sequences() {
        let alloc = IdAllocator::new();
        let c0 = alloc.next_client_id();
        let f0 = alloc.next_file_id();
        assert_eq!(c0.0, 0);
        assert_eq!(f0.0, 0);
    }
}
