//! Audio mixing (spec §4.5). Each publisher's most recent fixed-size PCM
//! bucket is retained; on every tick the mixer produces, for each live
//! participant, the sum of every *other* publisher's bucket (widened to
//! avoid overflow, divided by the contributing count, clamped back to
//! `i16`). A participant with no other publishers to hear gets no tick at
//! all rather than a silent one.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use control::{ClientId, Registry};
use parking_lot::RwLock;

/// One recipient's mixed-down samples for a single tick.
pub struct MixTick {
    pub recipient: ClientId,
    pub samples: Vec<i16>,
}

struct Bucket {
    samples: Vec<i16>,
    last_update: Instant,
}

pub struct AudioMixer {
    samples_per_tick: usize,
    max_age: Duration,
    buckets: RwLock<HashMap<ClientId, Bucket>>,
}

impl AudioMixer {
    pub fn new(samples_per_tick: usize, max_age: Duration) -> Self {
        Self { samples_per_tick, max_age, buckets: RwLock::new(HashMap::new()) }
    }

    /// Stores a publisher's latest bucket, padding/truncating to the fixed
    /// tick size so every bucket mixes cleanly regardless of how much audio
    /// a sender happened to produce this interval.
    pub fn submit(&self, publisher_id: ClientId, mut samples: Vec<i16>) {
        samples.resize(self.samples_per_tick, 0);
        self.buckets.write().insert(publisher_id, Bucket { samples, last_update: Instant::now() });
    }

    /// Drops buckets from publishers that have gone quiet for longer than
    /// `max_age`, so a departed or stalled sender doesn't keep contributing
    /// stale audio to every mix.
    pub fn evict_stale(&self) {
        let now = Instant::now();
        self.buckets.write().retain(|_, b| now.duration_since(b.last_update) < self.max_age);
    }

    /// Drops a publisher's bucket immediately, for use on participant
    /// destruction (spec §3) rather than waiting out `max_age`.
    pub fn remove(&self, publisher_id: ClientId) {
        self.buckets.write().remove(&publisher_id);
    }

    /// Produces one tick's worth of mixes, one per live participant that has
    /// at least one other live publisher to hear.
    pub fn tick(&self, registry: &Registry) -> Vec<MixTick> {
        self.evict_stale();

        let buckets = self.buckets.read();
        let live = registry.live_ids();

        live.into_iter()
            .filter_map(|recipient| {
                let others: Vec<&Bucket> =
                    buckets.iter().filter(|(id, _)| **id != recipient).map(|(_, b)| b).collect();
                if others.is_empty() {
                    return None;
                }
                let count = others.len() as i32;
                let mut mixed = vec![0i16; self.samples_per_tick];
                for (i, out) in mixed.iter_mut().enumerate() {
                    let sum: i32 = others.iter().map(|b| b.samples[i] as i32).sum();
                    *out = (sum / count).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                }
                Some(MixTick { recipient, samples: mixed })
            })
            .collect()
    }
}
