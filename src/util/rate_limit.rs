//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified events per second
pub fn create_limiter(per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Inbound packet limit per peer
pub const PACKET_RATE_LIMIT: u32 = 60;

/// Malformed packets tolerated per window before the peer is dropped
pub const MALFORMED_STRIKE_LIMIT: u32 = 10;

/// Per-peer limiter state
#[derive(Clone)]
pub struct PeerRateLimiter {
    packet_limiter: Arc<Limiter>,
    malformed_limiter: Arc<Limiter>,
}

impl PeerRateLimiter {
    pub fn new() -> Self {
        Self {
            packet_limiter: create_limiter(PACKET_RATE_LIMIT),
            // Strikes refill once a minute; burst up to the strike limit.
            malformed_limiter: Arc::new(RateLimiter::direct(
                Quota::per_minute(NonZeroU32::MIN).allow_burst(
                    NonZeroU32::new(MALFORMED_STRIKE_LIMIT).unwrap_or(NonZeroU32::MIN),
                ),
            )),
        }
    }

    /// Check whether another inbound packet is allowed
    pub fn check_packet(&self) -> bool {
        self.packet_limiter.check().is_ok()
    }

    /// Record a malformed packet. Returns false once the strike budget
    /// is spent and the peer should be disconnected.
    pub fn strike_malformed(&self) -> bool {
        self.malformed_limiter.check().is_ok()
    }
}

impl Default for PeerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strike_budget_is_finite() {
        let limiter = PeerRateLimiter::new();
        let mut allowed = 0;
        for _ in 0..(MALFORMED_STRIKE_LIMIT * 2) {
            if limiter.strike_malformed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, MALFORMED_STRIKE_LIMIT);
    }
}
