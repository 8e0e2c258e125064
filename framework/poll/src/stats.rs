//! Optional rolling statistics window (§4.8 "Statistics (optional)"):
//! per-key elapsed-microsecond samples over a 10 second window, with
//! average/peak accessors for a diagnostic CLI.

use std::collections::VecDeque;

const WINDOW_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Frame,
    Poll,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatsKey {
    pub kind: EntryKind,
    pub bus: u32,
    /// `frame_id` for `Frame`, `poll_source` for `Poll`, the command's
    /// discriminant for `Command`.
    pub id: u32,
}

struct Sample {
    key: StatsKey,
    at_ms: u64,
    elapsed_us: u32,
}

/// Fixed-capacity ring of timing samples; oldest entries older than the
/// window are dropped lazily on the next `record`/query.
pub struct StatsWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl StatsWindow {
    pub fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    fn prune(&mut self, now_ms: u64) {
        while let Some(front) = self.samples.front() {
            if now_ms.saturating_sub(front.at_ms) > WINDOW_MS {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record(&mut self, key: StatsKey, elapsed_us: u32, now_ms: u64) {
        self.prune(now_ms);
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { key, at_ms: now_ms, elapsed_us });
    }

    pub fn average(&self, key: StatsKey) -> Option<u32> {
        let matching: Vec<u32> = self.samples.iter().filter(|s| s.key == key).map(|s| s.elapsed_us).collect();
        if matching.is_empty() {
            return None;
        }
        Some((matching.iter().map(|v| *v as u64).sum::<u64>() / matching.len() as u64) as u32)
    }

    pub fn peak(&self, key: StatsKey) -> Option<u32> {
        self.samples.iter().filter(|s| s.key == key).map(|s| s.elapsed_us).max()
    }
}
