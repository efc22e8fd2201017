//! Monotonic clock shared by the control thread (spec.md §8: all scenario
//! times are nanoseconds since an arbitrary `start`).

use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since this process's first call to `now_ns`.
pub fn now_ns() -> i64 {
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as i64
}
