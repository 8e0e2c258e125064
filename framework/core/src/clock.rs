//! Monotonic time source shared by the bus watchdog and the polling engine.
//!
//! The teacher's network stack threads an `embedded_time::Clock` through
//! `PollContext` so the same interface code runs on a bare-metal timer or a
//! host clock. We keep that abstraction (and the crate) rather than hard-wire
//! `std::time::Instant`, but provide the one implementation this workspace
//! actually needs: a thread-safe wall clock backed by `std::time::Instant`.

use std::sync::OnceLock;
use std::time::Instant as StdInstant;

use embedded_time::clock::{Clock, Error};
use embedded_time::fraction::Fraction;
use embedded_time::Instant;

fn epoch() -> &'static StdInstant {
    static EPOCH: OnceLock<StdInstant> = OnceLock::new();
    EPOCH.get_or_init(StdInstant::now)
}

/// A `Clock` impl with millisecond resolution, monotonic for the lifetime of
/// the process. Used for bus watchdog deadlines and poll tick counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

    fn try_now(&self) -> Result<Instant<Self>, Error> {
        let elapsed = epoch().elapsed();
        Ok(Instant::new(elapsed.as_millis() as u64))
    }
}

impl SystemClock {
    pub fn now_ms(&self) -> u64 {
        epoch().elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
