use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use super::protocol::sequence_greater_than;

#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub sequence: u32,
    pub send_time: Instant,
}

/// Round-trip estimation over acknowledged sequences.
///
/// Only first transmissions are tracked, so a resent packet never produces an
/// ambiguous sample.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
        }
    }

    pub fn track_packet(&mut self, sequence: u32, now: Instant) {
        while self.pending.len() >= self.max_pending {
            self.pending.pop_front();
        }

        self.pending.push_back(PendingPacket {
            sequence,
            send_time: now,
        });
    }

    /// Forget a sequence without sampling it (it was retransmitted).
    pub fn forget(&mut self, sequence: u32) {
        self.pending.retain(|p| p.sequence != sequence);
    }

    pub fn process_ack(&mut self, sequence: u32, now: Instant) -> Option<f32> {
        let position = self.pending.iter().position(|p| p.sequence == sequence)?;
        let pending = self.pending.remove(position)?;

        let rtt = now.duration_since(pending.send_time).as_secs_f32() * 1000.0;
        self.update_rtt(rtt);
        Some(rtt)
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    /// Retransmission timeout, `srtt + 4 * rttvar` clamped to the given bounds.
    pub fn rto(&self, min: Duration, max: Duration) -> Duration {
        let ms = (self.srtt + 4.0 * self.rtt_var).max(0.0);
        Duration::from_secs_f32(ms / 1000.0).clamp(min, max)
    }
}

/// Puts sequenced payloads back in order before they are handed upward.
#[derive(Debug)]
pub struct OrderedReceiver<T> {
    next_expected: u32,
    buffered: BTreeMap<u32, T>,
    window: u32,
}

impl<T> OrderedReceiver<T> {
    pub fn new(window: u32) -> Self {
        Self {
            next_expected: 0,
            buffered: BTreeMap::new(),
            window,
        }
    }

    /// Returns `false` for duplicates and sequences outside the window.
    pub fn insert(&mut self, sequence: u32, item: T) -> bool {
        if sequence != self.next_expected && !sequence_greater_than(sequence, self.next_expected)
        {
            return false;
        }
        if sequence.wrapping_sub(self.next_expected) >= self.window {
            return false;
        }
        if self.buffered.contains_key(&sequence) {
            return false;
        }
        self.buffered.insert(sequence, item);
        true
    }

    pub fn is_beyond_window(&self, sequence: u32) -> bool {
        sequence_greater_than(sequence, self.next_expected)
            && sequence.wrapping_sub(self.next_expected) >= self.window
    }

    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.buffered.remove(&self.next_expected)?;
        self.next_expected = self.next_expected.wrapping_add(1);
        Some(item)
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }
}
