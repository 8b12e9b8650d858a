//! Reliable, ordered frame delivery on top of unreliable datagrams.
//!
//! A [`ReliableLink`] is socket-agnostic: it consumes packets that arrived from
//! its remote and appends the packets it wants sent to an output buffer. Frames
//! are split into sequenced fragments, every fragment is acknowledged
//! individually, and unacknowledged fragments are resent once the estimated
//! retransmission timeout expires.

use std::collections::VecDeque;
use std::time::Instant;

use super::protocol::{MAX_FRAGMENT_SIZE, Packet, PacketHeader, PacketType};
use super::stats::LinkStats;
use super::tracking::{AckTracker, OrderedReceiver};
use crate::config::LinkConfig;

#[derive(Debug)]
struct InFlight {
    sequence: u32,
    payload: PacketType,
    last_sent: Instant,
    resent: bool,
}

#[derive(Debug)]
struct Fragment {
    index: u16,
    count: u16,
    data: Vec<u8>,
}

#[derive(Debug)]
pub struct ReliableLink {
    config: LinkConfig,
    window: u32,
    next_sequence: u32,
    in_flight: VecDeque<InFlight>,
    backlog: VecDeque<PacketType>,
    receiver: OrderedReceiver<Fragment>,
    partial: Vec<u8>,
    partial_next: u16,
    frames: VecDeque<Vec<u8>>,
    ack_tracker: AckTracker,
    stats: LinkStats,
    created: Instant,
    last_receive: Instant,
    last_send: Instant,
    corrupted: bool,
}

impl ReliableLink {
    pub fn new(config: LinkConfig, now: Instant) -> Self {
        let window = (config.max_in_flight.max(1) * 2) as u32;
        Self {
            ack_tracker: AckTracker::new(config.max_in_flight.max(1)),
            receiver: OrderedReceiver::new(window),
            window,
            config,
            next_sequence: 0,
            in_flight: VecDeque::new(),
            backlog: VecDeque::new(),
            partial: Vec::new(),
            partial_next: 0,
            frames: VecDeque::new(),
            stats: LinkStats::default(),
            created: now,
            last_receive: now,
            last_send: now,
            corrupted: false,
        }
    }

    /// Splits `frame` into fragments and queues them. Returns `false` if the
    /// frame needs more fragments than the wire can number.
    pub fn queue_frame(&mut self, frame: &[u8]) -> bool {
        let count = frame.len().div_ceil(MAX_FRAGMENT_SIZE).max(1);
        let Ok(count) = u16::try_from(count) else {
            log::warn!("Dropping frame of {} bytes: too many fragments", frame.len());
            return false;
        };

        if frame.is_empty() {
            self.backlog.push_back(PacketType::Fragment {
                index: 0,
                count: 1,
                data: Vec::new(),
            });
        } else {
            for (index, chunk) in frame.chunks(MAX_FRAGMENT_SIZE).enumerate() {
                self.backlog.push_back(PacketType::Fragment {
                    index: index as u16,
                    count,
                    data: chunk.to_vec(),
                });
            }
        }

        self.stats.frames_sent += 1;
        true
    }

    pub fn control(&self, payload: PacketType) -> Packet {
        Packet::new(PacketHeader::new(self.next_sequence), payload)
    }

    pub fn handle(&mut self, packet: Packet, now: Instant, out: &mut Vec<Packet>) {
        self.last_receive = now;

        match packet.payload {
            PacketType::Fragment { index, count, data } => {
                let sequence = packet.header.sequence;
                // Past the window: stay unacked so the sender resends it.
                if self.receiver.is_beyond_window(sequence) {
                    return;
                }
                self.emit(out, self.control(PacketType::Ack { sequence }), now);

                if self.receiver.insert(sequence, Fragment { index, count, data }) {
                    while let Some(fragment) = self.receiver.pop_ready() {
                        self.reassemble(fragment);
                    }
                }
            }
            PacketType::Ack { sequence } => self.acknowledge(sequence, now),
            PacketType::Ping { timestamp } => {
                self.emit(out, self.control(PacketType::Pong { timestamp }), now);
            }
            PacketType::Pong { .. } => {}
            other => {
                log::debug!("Link ignoring non-data packet {:?}", other);
            }
        }
    }

    fn acknowledge(&mut self, sequence: u32, now: Instant) {
        let Some(position) = self.in_flight.iter().position(|f| f.sequence == sequence) else {
            return;
        };
        let Some(entry) = self.in_flight.remove(position) else {
            return;
        };

        if !entry.resent && self.ack_tracker.process_ack(sequence, now).is_some() {
            self.stats.rtt_ms = self.ack_tracker.srtt();
            self.stats.rtt_variance = self.ack_tracker.rtt_var();
        }
    }

    fn reassemble(&mut self, fragment: Fragment) {
        if fragment.count == 0
            || fragment.index >= fragment.count
            || fragment.index != self.partial_next
        {
            log::warn!(
                "Out of order fragment {}/{} (expected {})",
                fragment.index,
                fragment.count,
                self.partial_next
            );
            self.corrupted = true;
            return;
        }

        self.partial.extend_from_slice(&fragment.data);
        self.partial_next += 1;

        if self.partial_next == fragment.count {
            self.frames.push_back(std::mem::take(&mut self.partial));
            self.partial_next = 0;
            self.stats.frames_received += 1;
        }
    }

    /// Resends expired fragments, moves queued fragments into the send window
    /// and pings an idle remote.
    pub fn poll(&mut self, now: Instant, out: &mut Vec<Packet>) {
        let rto = self
            .ack_tracker
            .rto(self.config.min_resend(), self.config.max_resend());

        for entry in &mut self.in_flight {
            if now.duration_since(entry.last_sent) < rto {
                continue;
            }
            out.push(Packet::new(
                PacketHeader::new(entry.sequence),
                entry.payload.clone(),
            ));
            entry.last_sent = now;
            if !entry.resent {
                self.ack_tracker.forget(entry.sequence);
                entry.resent = true;
            }
            self.stats.packets_resent += 1;
            self.last_send = now;
        }

        while self.in_flight.len() < self.config.max_in_flight && self.window_open() {
            let Some(payload) = self.backlog.pop_front() else {
                break;
            };
            let sequence = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);

            self.ack_tracker.track_packet(sequence, now);
            self.in_flight.push_back(InFlight {
                sequence,
                payload: payload.clone(),
                last_sent: now,
                resent: false,
            });
            self.emit(out, Packet::new(PacketHeader::new(sequence), payload), now);
        }

        if now.duration_since(self.last_send) >= self.config.ping_interval() {
            let timestamp = now.duration_since(self.created).as_millis() as u64;
            self.emit(out, self.control(PacketType::Ping { timestamp }), now);
        }
    }

    /// The remote buffers at most `window` sequences past its oldest gap.
    fn window_open(&self) -> bool {
        self.in_flight
            .front()
            .is_none_or(|oldest| self.next_sequence.wrapping_sub(oldest.sequence) < self.window)
    }

    fn emit(&mut self, out: &mut Vec<Packet>, packet: Packet, now: Instant) {
        out.push(packet);
        self.last_send = now;
    }

    pub fn take_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    pub fn has_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.duration_since(self.last_receive) > self.config.timeout()
    }

    /// Set once the remote broke fragment ordering; the link cannot recover.
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    pub fn unacked_count(&self) -> usize {
        self.in_flight.len() + self.backlog.len()
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.stats.packets_received += 1;
        self.stats.bytes_received += bytes as u64;
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }
}
