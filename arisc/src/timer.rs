//! System tick timer.
//!
//! The OpenRISC tick timer is a 32-bit counter clocked by the CPUS clock. At
//! 300 MHz it wraps every 14 seconds, so [`Timer`] extends it to 64 bits by
//! counting the wrap-arounds it observes. This requires reading the timer at
//! least once per wrap period, which the main loop always does.

/// Tick timer frequency. The tick timer runs at the CPUS clock rate.
pub const TIMER_FREQUENCY: u32 = 300_000_000;

/// Tick timer frequency in MHz.
pub const TIMER_FREQUENCY_MHZ: u32 = TIMER_FREQUENCY / 1_000_000;

/// Converts a duration in nanoseconds to timer ticks.
pub const fn ns_to_ticks(ns: u32) -> u32 {
    (ns as u64 * TIMER_FREQUENCY_MHZ as u64 / 1000) as u32
}

/// A free-running 32-bit hardware counter.
pub trait Counter {
    /// Starts counting.
    fn start(&self);

    /// Stops counting. The current count is kept.
    fn stop(&self);

    /// Sets the current count.
    fn set_count(&self, cnt: u32);

    /// Returns the current count.
    fn count(&self) -> u32;
}

impl<C: Counter + ?Sized> Counter for &C {
    fn start(&self) {
        (**self).start()
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn set_count(&self, cnt: u32) {
        (**self).set_count(cnt)
    }

    fn count(&self) -> u32 {
        (**self).count()
    }
}

#[cfg(target_arch = "or1k")]
pub use tick::TickTimer;

#[cfg(target_arch = "or1k")]
mod tick {
    use super::Counter;
    use crate::spr::{mfspr, mtspr};

    /// Tick Timer Mode register (SPR group 10, register 0).
    const SPR_TTMR: u32 = 0x5000;

    /// Tick Timer Count register (SPR group 10, register 1).
    const SPR_TTCR: u32 = 0x5001;

    /// Continuous mode: the counter runs forever and never stops on match.
    const TTMR_CONTINUOUS: u32 = 0b11 << 30;

    /// The OR1K tick timer.
    #[derive(Debug, Copy, Clone, Default)]
    pub struct TickTimer;

    impl Counter for TickTimer {
        fn start(&self) {
            unsafe { mtspr(SPR_TTMR, TTMR_CONTINUOUS) };
        }

        fn stop(&self) {
            unsafe { mtspr(SPR_TTMR, 0) };
        }

        fn set_count(&self, cnt: u32) {
            unsafe { mtspr(SPR_TTCR, cnt) };
        }

        fn count(&self) -> u32 {
            unsafe { mfspr(SPR_TTCR) }
        }
    }
}

/// 64-bit system timer on top of a 32-bit [`Counter`].
pub struct Timer<C: Counter> {
    /// Hardware counter.
    counter: C,

    /// Last 32-bit reading.
    last: u32,

    /// Number of wrap-arounds seen.
    high: u32,
}

impl<C: Counter> Timer<C> {
    /// Returns a timer over `counter`. The counter is not started.
    pub fn new(counter: C) -> Timer<C> {
        let last = counter.count();
        Timer {
            counter,
            last,
            high: 0,
        }
    }

    /// Starts the timer.
    pub fn start(&self) {
        self.counter.start()
    }

    /// Stops the timer.
    pub fn stop(&self) {
        self.counter.stop()
    }

    /// Sets the 32-bit count. The upper half of the 64-bit count is reset.
    pub fn cnt_set(&mut self, cnt: u32) {
        self.counter.set_count(cnt);
        self.last = cnt;
        self.high = 0;
    }

    /// Returns the 32-bit count.
    pub fn cnt_get(&self) -> u32 {
        self.counter.count()
    }

    /// Returns the 64-bit count.
    pub fn cnt_get_64(&mut self) -> u64 {
        let cnt = self.counter.count();
        if cnt < self.last {
            self.high = self.high.wrapping_add(1);
        }
        self.last = cnt;

        (self.high as u64) << 32 | cnt as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCounter;

    #[test]
    fn ns_conversion() {
        assert_eq!(ns_to_ticks(0), 0);
        assert_eq!(ns_to_ticks(1000), 300);
        assert_eq!(ns_to_ticks(30_000), 9000);
        assert_eq!(ns_to_ticks(u32::MAX), 1_288_490_188);
    }

    #[test]
    fn start_stop() {
        let cnt = SimCounter::new();
        let timer = Timer::new(&cnt);

        cnt.advance(10);
        assert_eq!(timer.cnt_get(), 0);

        timer.start();
        cnt.advance(10);
        assert_eq!(timer.cnt_get(), 10);

        timer.stop();
        cnt.advance(10);
        assert_eq!(timer.cnt_get(), 10);
    }

    #[test]
    fn wrap_around() {
        let cnt = SimCounter::new();
        let mut timer = Timer::new(&cnt);
        timer.start();

        timer.cnt_set(u32::MAX - 5);
        assert_eq!(timer.cnt_get_64(), (u32::MAX - 5) as u64);

        cnt.advance(10);
        assert_eq!(timer.cnt_get_64(), (1 << 32) + 4);

        cnt.advance(u32::MAX);
        assert_eq!(timer.cnt_get_64(), (1 << 32) + 4 + u32::MAX as u64);

        cnt.advance(1);
        assert_eq!(timer.cnt_get_64(), (2 << 32) + 4);

        timer.cnt_set(7);
        assert_eq!(timer.cnt_get_64(), 7);
    }
}
