// crates/steadycast-core/src/clock.rs
//
// Monotonic microsecond clock shared by the pacing loop, the inbound
// reader's liveness tracking, and the audio source machine.

use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Microseconds since the first call in this process. Monotonic — never
/// affected by wall-clock adjustments, safe to subtract.
pub fn now_us() -> i64 {
    START.get_or_init(Instant::now).elapsed().as_micros() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_us_is_monotonic() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
    }
}
