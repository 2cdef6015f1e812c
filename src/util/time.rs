//! Tick timing and the process clock

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Fixed tick rate for room updates
pub const ROOM_TPS: u32 = 20;
pub const TICK_DURATION: Duration = Duration::from_millis(1000 / ROOM_TPS as u64);

/// Delta time per fixed tick (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / ROOM_TPS as f32
}

/// Process epoch, pinned at boot. Room ages and the admin uptime
/// figure are measured against it so they agree with each other.
static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Pin the process epoch; the first caller wins, later calls are
/// no-ops.
pub fn init_server_time() {
    PROCESS_EPOCH.get_or_init(Instant::now);
}

/// Whole seconds since the process epoch. Zero when the epoch was
/// never pinned (tests, tooling).
pub fn uptime_secs() -> u64 {
    PROCESS_EPOCH.get().map_or(0, |epoch| epoch.elapsed().as_secs())
}
