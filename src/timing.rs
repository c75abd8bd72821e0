//! Output Timing
//!
//! Derives the output delay from three counters:
//! - frames the pipeline handed over (`frames_written + queued_frames`)
//! - the device clock position, sampled by a position query
//! - the host monotonic counter, sampled together with the device clock and
//!   again when the estimate is computed
//!
//! All arithmetic is integer; positions are split into whole seconds and a
//! microsecond remainder before subtracting so large positions keep their
//! precision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Host monotonic counter
pub trait HostCounter: Send + Sync {
    /// Current counter value
    fn now(&self) -> u64;

    /// Counter ticks per second
    fn frequency(&self) -> u64;
}

/// Host counter backed by [`Instant`], in nanoseconds since creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicCounter {
    origin: Instant,
}

impl MonotonicCounter {
    /// Counter starting at zero now
    pub fn new() -> Self {
        MonotonicCounter {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCounter for MonotonicCounter {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn frequency(&self) -> u64 {
        1_000_000_000
    }
}

/// Host counter that only moves when told to
#[derive(Debug)]
pub struct ManualCounter {
    ticks: AtomicU64,
    frequency: u64,
}

impl ManualCounter {
    /// Counter at zero running at `frequency` ticks per second
    pub fn new(frequency: u64) -> Self {
        ManualCounter {
            ticks: AtomicU64::new(0),
            frequency,
        }
    }

    /// Jump to an absolute value
    pub fn set(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::Release);
    }

    /// Move forward by `ticks`
    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::AcqRel);
    }
}

impl HostCounter for ManualCounter {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    fn frequency(&self) -> u64 {
        self.frequency
    }
}

/// A position split into seconds and sub-second microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitPosition {
    /// Whole seconds
    pub seconds: u64,
    /// Remaining microseconds (always below one second)
    pub micros: u64,
}

impl SplitPosition {
    /// Split `ticks` of a clock running at `frequency` ticks per second
    ///
    /// A zero frequency yields a zero position.
    pub fn from_ticks(ticks: u64, frequency: u64) -> Self {
        if frequency == 0 {
            return SplitPosition::default();
        }
        SplitPosition {
            seconds: ticks / frequency,
            micros: ((ticks % frequency) as u128 * MICROS_PER_SECOND as u128 / frequency as u128)
                as u64,
        }
    }

    /// Total microseconds
    pub fn as_micros(&self) -> i64 {
        (self.seconds as i64) * (MICROS_PER_SECOND as i64) + self.micros as i64
    }
}

/// Device clock captured by one position query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// Device-consumed time
    pub device: SplitPosition,
    /// Host counter when the device clock was read
    pub host_counter: u64,
}

impl ClockSample {
    /// Build a sample from a raw device position
    pub fn new(device_position: u64, device_frequency: u64, host_counter: u64) -> Self {
        ClockSample {
            device: SplitPosition::from_ticks(device_position, device_frequency),
            host_counter,
        }
    }
}

/// Estimate the output delay in microseconds
///
/// `total_frames` is everything the pipeline handed over at `sample_rate`.
/// The estimate subtracts the time the device has consumed and the host time
/// that passed since the device clock was sampled. The host correction only
/// applies when the counter moved forward. The result can be negative when
/// the device ran ahead of the delivered frames.
pub fn estimate_delay(
    total_frames: u64,
    sample_rate: u32,
    sample: &ClockSample,
    counter_now: u64,
    counter_frequency: u64,
) -> i64 {
    let delivered = SplitPosition::from_ticks(total_frames, sample_rate as u64);

    let mut delay = (delivered.seconds as i64 - sample.device.seconds as i64)
        * MICROS_PER_SECOND as i64;
    delay += delivered.micros as i64;
    delay -= sample.device.micros as i64;

    if counter_now <= sample.host_counter || counter_frequency == 0 {
        return delay;
    }

    let elapsed = counter_now - sample.host_counter;
    let elapsed_micros =
        (elapsed as u128 * MICROS_PER_SECOND as u128 / counter_frequency as u128) as i64;

    delay - elapsed_micros
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_position() {
        let split = SplitPosition::from_ticks(150_000, 48_000);
        assert_eq!(split.seconds, 3);
        assert_eq!(split.micros, 125_000);
        assert_eq!(split.as_micros(), 3_125_000);
    }

    #[test]
    fn test_split_position_large_values() {
        // 10 MHz clock after about a year of uptime
        let ticks = 10_000_000u64 * 31_536_000 + 1;
        let split = SplitPosition::from_ticks(ticks, 10_000_000);
        assert_eq!(split.seconds, 31_536_000);
        assert_eq!(split.micros, 0);
    }

    #[test]
    fn test_split_position_zero_frequency() {
        assert_eq!(SplitPosition::from_ticks(1234, 0), SplitPosition::default());
    }

    #[test]
    fn test_delay_without_host_correction() {
        // 1.5 s delivered, device consumed 1.0 s
        let sample = ClockSample::new(48_000, 48_000, 500);
        let delay = estimate_delay(72_000, 48_000, &sample, 500, 1_000_000);
        assert_eq!(delay, 500_000);
    }

    #[test]
    fn test_delay_with_host_correction() {
        let sample = ClockSample::new(48_000, 48_000, 1_000);
        // 20 ms of host time at a 1 MHz counter
        let delay = estimate_delay(72_000, 48_000, &sample, 21_000, 1_000_000);
        assert_eq!(delay, 480_000);
    }

    #[test]
    fn test_delay_ignores_backwards_counter() {
        let sample = ClockSample::new(0, 48_000, 10_000);
        let delay = estimate_delay(4_800, 48_000, &sample, 9_000, 1_000_000);
        assert_eq!(delay, 100_000);
    }

    #[test]
    fn test_delay_can_be_negative() {
        let sample = ClockSample::new(96_000, 48_000, 0);
        let delay = estimate_delay(48_000, 48_000, &sample, 0, 1_000_000);
        assert_eq!(delay, -1_000_000);
    }

    #[test]
    fn test_delay_sub_second_borrow() {
        // delivered 2.1 s, consumed 1.9 s
        let sample = ClockSample::new(91_200, 48_000, 0);
        let delay = estimate_delay(100_800, 48_000, &sample, 0, 1);
        assert_eq!(delay, 200_000);
    }

    #[test]
    fn test_monotonic_counter_advances() {
        let counter = MonotonicCounter::new();
        let a = counter.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(counter.now() > a);
        assert_eq!(counter.frequency(), 1_000_000_000);
    }

    #[test]
    fn test_manual_counter() {
        let counter = ManualCounter::new(1_000);
        counter.set(5);
        counter.advance(10);
        assert_eq!(counter.now(), 15);
        assert_eq!(counter.frequency(), 1_000);
    }
}
