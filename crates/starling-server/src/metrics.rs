//! Metric name constants and call-site helpers.
//!
//! All metric names live here so call sites never spell raw strings. The
//! session gauge collector is event-driven — it follows the hub's watch
//! channel rather than polling on a timer.

use metrics::{counter, gauge, histogram};
use tokio::sync::watch;

use crate::hub::HubStats;

// ---------------------------------------------------------------------------
// Stream traffic
// ---------------------------------------------------------------------------

/// Total binary snapshot frames sent to clients.
pub const FRAMES_SENT: &str = "starling_frames_sent_total";
/// Total bytes of sealed frames sent to clients.
pub const BYTES_SENT: &str = "starling_frame_bytes_sent_total";
/// Total binary frames received from clients.
pub const FRAMES_RECV: &str = "starling_frames_received_total";
/// Total frames rejected for a bad length.
pub const FRAMES_MALFORMED: &str = "starling_frames_malformed_total";
/// Total decodes in which at least one component was clamped or coerced.
pub const FRAMES_CLAMPED: &str = "starling_frames_clamped_total";

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Kernel tick duration in seconds (histogram).
pub const TICK_SECONDS: &str = "starling_tick_seconds";
/// Total nudges applied at tick boundaries.
pub const NUDGES_APPLIED: &str = "starling_nudges_applied_total";
/// Total nudges dropped for referencing an unknown slot.
pub const NUDGES_INVALID_SLOT: &str = "starling_nudges_invalid_slot_total";
/// Total nudges ignored inside a randomization acknowledgement window.
pub const NUDGES_HELD: &str = "starling_nudges_held_total";

// ---------------------------------------------------------------------------
// Hub / sessions
// ---------------------------------------------------------------------------

/// Current number of ready sessions (gauge).
pub const SESSIONS_READY: &str = "starling_sessions_ready";
/// Total snapshots dropped because a session's queue was saturated.
pub const SNAPSHOT_DROPS: &str = "starling_snapshot_drops_total";
/// Total sessions closed for sustained saturation.
pub const SESSIONS_EVICTED: &str = "starling_sessions_evicted_total";

// ---------------------------------------------------------------------------
// Call-site helpers
// ---------------------------------------------------------------------------

#[inline]
pub fn frame_sent(bytes: usize) {
    counter!(FRAMES_SENT).increment(1);
    counter!(BYTES_SENT).increment(bytes as u64);
}

#[inline]
pub fn frame_recv(clamped: bool) {
    counter!(FRAMES_RECV).increment(1);
    if clamped {
        counter!(FRAMES_CLAMPED).increment(1);
    }
}

#[inline]
pub fn frame_malformed() {
    counter!(FRAMES_MALFORMED).increment(1);
}

#[inline]
pub fn tick_duration(seconds: f64) {
    histogram!(TICK_SECONDS).record(seconds);
}

#[inline]
pub fn nudges_applied(n: u64) {
    counter!(NUDGES_APPLIED).increment(n);
}

#[inline]
pub fn nudge_invalid_slot() {
    counter!(NUDGES_INVALID_SLOT).increment(1);
}

#[inline]
pub fn nudge_held() {
    counter!(NUDGES_HELD).increment(1);
}

#[inline]
pub fn snapshot_dropped() {
    counter!(SNAPSHOT_DROPS).increment(1);
}

#[inline]
pub fn session_evicted() {
    counter!(SESSIONS_EVICTED).increment(1);
}

/// Follow the hub's stats watch channel and keep the session gauge fresh.
/// Exits when the hub is dropped.
pub async fn spawn_session_collector(mut rx: watch::Receiver<HubStats>) {
    loop {
        if rx.changed().await.is_err() {
            break;
        }
        let stats = *rx.borrow_and_update();
        gauge!(SESSIONS_READY).set(stats.ready as f64);
    }
}
