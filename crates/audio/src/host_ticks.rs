//! Process-wide monotonic tick source.
//!
//! Capture sources and the session coordinator must share one clock domain
//! for host ticks. Ticks are nanoseconds since an arbitrary process-local
//! anchor; `HOST_CLOCK_HZ` converts them to seconds.

use std::sync::OnceLock;
use std::time::Instant;

/// Tick frequency of [`now_ticks`].
pub const HOST_CLOCK_HZ: u64 = 1_000_000_000;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Current host tick. The first call fixes the anchor.
pub fn now_ticks() -> u64 {
    let anchor = *ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as u64
}
