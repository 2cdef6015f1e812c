//! Per-peer reliability over datagrams
//!
//! Reliable packets carry a wrapping 16-bit nonce. The sender keeps the
//! framed bytes until the nonce is acked, resending on an exponential
//! backoff; the receiver acks everything and suppresses duplicates
//! through a bounded sliding window.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

/// First resend delay.
pub const RESEND_INITIAL: Duration = Duration::from_secs(1);
/// Backoff ceiling.
pub const RESEND_CAP: Duration = Duration::from_secs(2);
/// Send attempts (initial plus resends) before the peer is declared dead.
pub const MAX_SEND_ATTEMPTS: u32 = 5;
/// Outbound silence that triggers a keepalive ping.
pub const PING_AFTER: Duration = Duration::from_millis(1500);
/// Inbound silence after which the peer is dropped.
pub const DROP_AFTER: Duration = Duration::from_secs(6);
/// How long a disconnecting peer keeps acking in-flight packets.
pub const LAME_DUCK: Duration = Duration::from_millis(500);
/// Receive dedup window size.
const DEDUP_WINDOW: usize = 128;

/// Resolution of a reliable send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    Timeout,
}

/// What to do with an inbound reliable nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDisposition {
    /// First sighting: ack and deliver.
    Deliver,
    /// Already seen: ack again, do not deliver.
    Duplicate,
}

/// Wrap-aware "strictly newer" comparison for 16-bit nonces.
pub fn nonce_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

struct PendingPacket {
    bytes: Vec<u8>,
    first_sent: Instant,
    last_sent: Instant,
    attempts: u32,
    ack_tx: Option<oneshot::Sender<AckOutcome>>,
}

impl PendingPacket {
    fn next_resend_at(&self) -> Instant {
        // 1s after the first send, capped at 2s between later attempts.
        let backoff = if self.attempts <= 1 { RESEND_INITIAL } else { RESEND_CAP };
        self.last_sent + backoff
    }
}

/// Bounded set of recently seen inbound nonces.
struct DedupWindow {
    seen: HashSet<u16>,
    order: VecDeque<u16>,
}

impl DedupWindow {
    fn new() -> Self {
        Self {
            seen: HashSet::with_capacity(DEDUP_WINDOW),
            order: VecDeque::with_capacity(DEDUP_WINDOW),
        }
    }

    fn observe(&mut self, nonce: u16) -> InboundDisposition {
        if !self.seen.insert(nonce) {
            return InboundDisposition::Duplicate;
        }
        self.order.push_back(nonce);
        if self.order.len() > DEDUP_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        InboundDisposition::Deliver
    }
}

/// Everything the sweep decided for one peer.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Framed datagrams to put back on the wire.
    pub resends: Vec<Vec<u8>>,
    /// A packet ran out of attempts; the peer is dead.
    pub timed_out: bool,
    /// No outbound traffic lately; send a keepalive.
    pub wants_ping: bool,
    /// No inbound traffic for too long; drop the peer.
    pub silent: bool,
}

/// Transport state for one peer. Owned behind the connection's lock;
/// nothing in here suspends.
pub struct ReliabilityState {
    next_nonce: u16,
    unacked: BTreeMap<u16, PendingPacket>,
    dedup: DedupWindow,
    newest_inbound: Option<u16>,
    pub last_heard_from: Instant,
    pub last_sent_to: Instant,
    rtt_ms: f32,
}

impl ReliabilityState {
    pub fn new(now: Instant) -> Self {
        Self {
            next_nonce: 1,
            unacked: BTreeMap::new(),
            dedup: DedupWindow::new(),
            newest_inbound: None,
            last_heard_from: now,
            last_sent_to: now,
            rtt_ms: 100.0,
        }
    }

    pub fn allocate_nonce(&mut self) -> u16 {
        let nonce = self.next_nonce;
        self.next_nonce = self.next_nonce.wrapping_add(1);
        // Zero is reserved so a blank header never acks anything real.
        if self.next_nonce == 0 {
            self.next_nonce = 1;
        }
        nonce
    }

    /// Remember a freshly sent reliable datagram for retransmission.
    pub fn record_send(
        &mut self,
        nonce: u16,
        bytes: Vec<u8>,
        ack_tx: Option<oneshot::Sender<AckOutcome>>,
        now: Instant,
    ) {
        self.last_sent_to = now;
        self.unacked.insert(
            nonce,
            PendingPacket { bytes, first_sent: now, last_sent: now, attempts: 1, ack_tx },
        );
    }

    pub fn record_unreliable_send(&mut self, now: Instant) {
        self.last_sent_to = now;
    }

    /// Process an ack for a nonce. Updates the RTT estimate with the
    /// usual 7/8 EWMA when the nonce was still pending.
    pub fn handle_ack(&mut self, nonce: u16, now: Instant) {
        self.last_heard_from = now;
        if let Some(pending) = self.unacked.remove(&nonce) {
            // Only first-transmission acks give an unambiguous sample.
            if pending.attempts == 1 {
                let sample = now.duration_since(pending.first_sent).as_secs_f32() * 1000.0;
                self.rtt_ms = 0.875 * self.rtt_ms + 0.125 * sample;
            }
            if let Some(tx) = pending.ack_tx {
                let _ = tx.send(AckOutcome::Acked);
            }
        }
    }

    /// Classify an inbound reliable nonce. Callers ack either way.
    pub fn register_inbound(&mut self, nonce: u16, now: Instant) -> InboundDisposition {
        self.last_heard_from = now;
        let disposition = self.dedup.observe(nonce);
        if disposition == InboundDisposition::Deliver {
            match self.newest_inbound {
                Some(newest) if !nonce_newer(nonce, newest) => {}
                _ => self.newest_inbound = Some(nonce),
            }
        }
        disposition
    }

    pub fn note_inbound(&mut self, now: Instant) {
        self.last_heard_from = now;
    }

    pub fn rtt_ms(&self) -> u32 {
        self.rtt_ms.round() as u32
    }

    pub fn pending_count(&self) -> usize {
        self.unacked.len()
    }

    /// Drive retransmission and keepalive for this peer.
    pub fn sweep(&mut self, now: Instant) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        if now.duration_since(self.last_heard_from) > DROP_AFTER {
            outcome.silent = true;
            return outcome;
        }

        let mut exhausted = Vec::new();
        for (nonce, pending) in self.unacked.iter_mut() {
            if now < pending.next_resend_at() {
                continue;
            }
            if pending.attempts >= MAX_SEND_ATTEMPTS {
                exhausted.push(*nonce);
                continue;
            }
            pending.attempts += 1;
            pending.last_sent = now;
            outcome.resends.push(pending.bytes.clone());
        }

        if !exhausted.is_empty() {
            outcome.timed_out = true;
            for nonce in exhausted {
                if let Some(pending) = self.unacked.remove(&nonce) {
                    if let Some(tx) = pending.ack_tx {
                        let _ = tx.send(AckOutcome::Timeout);
                    }
                }
            }
        }

        if !outcome.resends.is_empty() {
            self.last_sent_to = now;
        } else if now.duration_since(self.last_sent_to) > PING_AFTER {
            outcome.wants_ping = true;
        }

        outcome
    }

    /// Fail every pending packet; used when the peer is torn down.
    pub fn abandon(&mut self) {
        for (_, pending) in std::mem::take(&mut self.unacked) {
            if let Some(tx) = pending.ack_tx {
                let _ = tx.send(AckOutcome::Timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (ReliabilityState, Instant) {
        let now = Instant::now();
        (ReliabilityState::new(now), now)
    }

    #[test]
    fn nonce_allocation_wraps_and_skips_zero() {
        let (mut s, _) = state();
        s.next_nonce = u16::MAX;
        assert_eq!(s.allocate_nonce(), u16::MAX);
        // Wrapped past zero straight to one.
        assert_eq!(s.allocate_nonce(), 1);
    }

    #[test]
    fn nonce_comparison_survives_wrap() {
        // B-law: ordering is preserved across the 2^16 boundary.
        assert!(nonce_newer(2, u16::MAX));
        assert!(nonce_newer(100, 65_530));
        assert!(!nonce_newer(65_530, 100));
        assert!(!nonce_newer(5, 5));
        assert!(nonce_newer(6, 5));
    }

    #[test]
    fn duplicate_nonces_are_suppressed() {
        let (mut s, now) = state();
        assert_eq!(s.register_inbound(7, now), InboundDisposition::Deliver);
        assert_eq!(s.register_inbound(7, now), InboundDisposition::Duplicate);
        assert_eq!(s.register_inbound(8, now), InboundDisposition::Deliver);
    }

    #[test]
    fn dedup_window_is_bounded() {
        let (mut s, now) = state();
        for nonce in 0..200u16 {
            assert_eq!(s.register_inbound(nonce, now), InboundDisposition::Deliver);
        }
        // Nonce 0 fell out of the window; it counts as new again.
        assert_eq!(s.register_inbound(0, now), InboundDisposition::Deliver);
        // Recent nonces are still suppressed.
        assert_eq!(s.register_inbound(199, now), InboundDisposition::Duplicate);
    }

    #[test]
    fn ack_resolves_pending_and_updates_rtt() {
        let (mut s, now) = state();
        let (tx, mut rx) = oneshot::channel();
        let nonce = s.allocate_nonce();
        s.record_send(nonce, vec![1, 2, 3], Some(tx), now);
        assert_eq!(s.pending_count(), 1);

        s.handle_ack(nonce, now + Duration::from_millis(60));
        assert_eq!(s.pending_count(), 0);
        assert_eq!(rx.try_recv().unwrap(), AckOutcome::Acked);
        // EWMA pulled the 100ms prior toward the 60ms sample.
        assert_eq!(s.rtt_ms(), 95);
    }

    #[test]
    fn ack_for_unknown_nonce_is_ignored() {
        let (mut s, now) = state();
        s.handle_ack(999, now);
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn sweep_resends_with_backoff() {
        let (mut s, now) = state();
        let nonce = s.allocate_nonce();
        s.record_send(nonce, vec![0xAB], None, now);

        // Not due yet.
        let outcome = s.sweep(now + Duration::from_millis(500));
        assert!(outcome.resends.is_empty());

        // First resend after one second.
        let outcome = s.sweep(now + Duration::from_millis(1100));
        assert_eq!(outcome.resends.len(), 1);

        // Second resend backs off to two seconds.
        let outcome = s.sweep(now + Duration::from_millis(2000));
        assert!(outcome.resends.is_empty());
        let outcome = s.sweep(now + Duration::from_millis(3200));
        assert_eq!(outcome.resends.len(), 1);
    }

    #[test]
    fn exhausted_attempts_time_the_peer_out() {
        let (mut s, now) = state();
        let (tx, mut rx) = oneshot::channel();
        let nonce = s.allocate_nonce();
        s.record_send(nonce, vec![0xAB], Some(tx), now);

        let mut when = now;
        let mut timed_out = false;
        for _ in 0..12 {
            when += RESEND_CAP + Duration::from_millis(100);
            // Keep the link non-silent so exhaustion is what kills it.
            s.note_inbound(when);
            let outcome = s.sweep(when);
            if outcome.timed_out {
                timed_out = true;
                break;
            }
        }
        assert!(timed_out);
        assert_eq!(rx.try_recv().unwrap(), AckOutcome::Timeout);
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn quiet_link_wants_ping_then_goes_silent() {
        let (mut s, now) = state();
        let outcome = s.sweep(now + Duration::from_millis(1600));
        assert!(outcome.wants_ping);
        assert!(!outcome.silent);

        let outcome = s.sweep(now + Duration::from_secs(7));
        assert!(outcome.silent);
    }

    #[test]
    fn abandon_fails_all_pending() {
        let (mut s, now) = state();
        let (tx, mut rx) = oneshot::channel();
        let nonce = s.allocate_nonce();
        s.record_send(nonce, vec![1], Some(tx), now);
        s.abandon();
        assert_eq!(rx.try_recv().unwrap(), AckOutcome::Timeout);
    }
}
