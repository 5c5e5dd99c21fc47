//! Per-subscriber sequence tracking: duplicate and gap detection.

/// How an incoming event relates to what the subscriber already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The next expected event; apply it.
    Fresh,
    /// Already applied (redelivery or covered by a snapshot); discard it.
    Duplicate,
    /// Events between `expected` and `got` were missed; resynchronize.
    Gap { expected: u64, got: u64 },
}

/// Tracks the last applied sequence number of one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceTracker {
    last_seq: u64,
}

impl SequenceTracker {
    /// Start after `last_seq` (a snapshot's `as_of_seq`, or 0 for an empty room).
    pub fn starting_at(last_seq: u64) -> Self {
        Self { last_seq }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Classify `seq` and advance on `Fresh`. A gap does not advance; the
    /// caller is expected to reset from a new snapshot.
    pub fn observe(&mut self, seq: u64) -> Observation {
        let expected = self.last_seq + 1;
        if seq == expected {
            self.last_seq = seq;
            Observation::Fresh
        } else if seq < expected {
            Observation::Duplicate
        } else {
            Observation::Gap { expected, got: seq }
        }
    }

    pub fn reset(&mut self, last_seq: u64) {
        self.last_seq = last_seq;
    }
}
