//! Host/device clock correlation
//!
//! GPU kernel timestamps are raw device timer ticks. They run at the device
//! timer frequency, wrap at 2^32 ticks, and live in a different clock domain
//! than the traced process. Every function here is pure: callers pass in the
//! ticks, the frequency snapshot captured at append time, and the
//! (host, device) anchor pair captured at submission time.
//!
//! # Anchoring
//!
//! ```text
//!  host:    submit_host ─────────────── host_start ═════════ host_end
//!                 │                          ▲
//!  device:  submit_dev ── (start - submit_dev) ticks ── start ═════ end
//! ```
//!
//! `host_start = submit_host + (start - submit_dev) * 1e9 / freq`

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Nanoseconds per second
pub const NSEC_IN_SEC: u64 = 1_000_000_000;

/// Device kernel timers wrap at 2^32 ticks
pub const TIMER_WRAP: u64 = 1 << 32;

/// Convert a tick count to nanoseconds at the given timer frequency
///
/// # Panics
///
/// Panics if `freq` is zero.
pub fn ticks_to_ns(ticks: u64, freq: u64) -> u64 {
    assert!(freq > 0, "device timer frequency must be non-zero");
    (u128::from(ticks) * u128::from(NSEC_IN_SEC) / u128::from(freq)) as u64
}

/// Kernel duration in nanoseconds, accounting for one 32-bit timer wrap
///
/// If `end < start` the timer is assumed to have wrapped once, and the
/// delta becomes `2^32 + end - start`.
pub fn kernel_duration_ns(start: u64, end: u64, freq: u64) -> u64 {
    let ticks = if end < start {
        assert!(
            start - end <= TIMER_WRAP,
            "kernel timestamps {start}..{end} span more than one timer wrap"
        );
        // 2^32 + end - start, without the intermediate overflow
        TIMER_WRAP - (start - end)
    } else {
        end - start
    };
    ticks_to_ns(ticks, freq)
}

/// (host, device) timestamp pair read together at submission time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmitAnchor {
    /// Host clock at submission (ns)
    pub host_time: u64,
    /// Device timer at submission (ticks, masked)
    pub device_time: u64,
}

impl SubmitAnchor {
    pub fn new(host_time: u64, device_time: u64) -> Self {
        Self {
            host_time,
            device_time,
        }
    }
}

/// A kernel execution window resolved onto the host clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostWindow {
    pub start: u64,
    pub end: u64,
}

impl HostWindow {
    pub fn duration(&self) -> u64 {
        self.end - self.start
    }
}

/// Anchor device kernel ticks to host time using the submission anchor
///
/// # Panics
///
/// Panics if `start_ticks <= anchor.device_time`: a kernel can not start on
/// the device before it was submitted unless the device clock went backwards.
pub fn anchor_to_host(
    start_ticks: u64,
    end_ticks: u64,
    freq: u64,
    anchor: SubmitAnchor,
) -> HostWindow {
    assert!(
        start_ticks > anchor.device_time,
        "device clock is not monotonic: kernel start {} <= submit {}",
        start_ticks,
        anchor.device_time
    );

    let duration = kernel_duration_ns(start_ticks, end_ticks, freq);
    let time_shift = ticks_to_ns(start_ticks - anchor.device_time, freq);
    let start = anchor.host_time + time_shift;

    HostWindow {
        start,
        end: start + duration,
    }
}

/// Device-clock nanosecond window for raw kernel ticks
pub fn device_window(start_ticks: u64, end_ticks: u64, freq: u64) -> (u64, u64) {
    let start = ticks_to_ns(start_ticks, freq);
    (start, start + kernel_duration_ns(start_ticks, end_ticks, freq))
}

/// Clock domain a recorded interval is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockDomain {
    /// Host nanoseconds, as returned by the tracer's [`HostClock`]
    #[default]
    Host,
    /// Device timer nanoseconds (`ticks * 1e9 / freq`)
    Device,
}

impl std::str::FromStr for ClockDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "host" => Ok(ClockDomain::Host),
            "device" => Ok(ClockDomain::Device),
            _ => Err(format!("Invalid clock domain: {}", s)),
        }
    }
}

/// Profile-wide host/device synchronization point
///
/// Counter reports from the sampling engine are stamped in device
/// nanoseconds; intervals recorded on the host clock must be shifted into
/// that domain before they can window the reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSync {
    /// Host clock at sync (ns)
    pub host_sync: u64,
    /// Device timer at sync (ticks, masked)
    pub device_sync: u64,
    /// Device timer frequency (Hz)
    pub device_freq: u64,
}

impl ClockSync {
    pub fn new(host_sync: u64, device_sync: u64, device_freq: u64) -> Self {
        assert!(device_freq > 0, "device timer frequency must be non-zero");
        Self {
            host_sync,
            device_sync,
            device_freq,
        }
    }

    /// Convert an interval timestamp into device nanoseconds
    pub fn to_device_ns(&self, timestamp: u64, domain: ClockDomain) -> u64 {
        match domain {
            ClockDomain::Device => timestamp,
            ClockDomain::Host => {
                assert!(
                    timestamp > self.host_sync,
                    "host timestamp {} precedes clock sync point {}",
                    timestamp,
                    self.host_sync
                );
                ticks_to_ns(self.device_sync, self.device_freq) + (timestamp - self.host_sync)
            }
        }
    }
}

/// Monotonic host time source
pub trait HostClock: Send + Sync {
    /// Current host time in nanoseconds
    fn timestamp(&self) -> u64;
}

/// Host clock reporting nanoseconds elapsed since construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for MonotonicClock {
    fn timestamp(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_ns_unit_frequency() {
        assert_eq!(ticks_to_ns(300, NSEC_IN_SEC), 300);
    }

    #[test]
    fn test_ticks_to_ns_scaled() {
        // 19.2 MHz timer: one tick is 52.083 ns
        assert_eq!(ticks_to_ns(192, 19_200_000), 10_000);
    }

    #[test]
    fn test_ticks_to_ns_no_overflow_on_large_ticks() {
        let ticks = u64::MAX / 2;
        assert_eq!(ticks_to_ns(ticks, NSEC_IN_SEC), ticks);
    }

    #[test]
    #[should_panic(expected = "frequency must be non-zero")]
    fn test_ticks_to_ns_zero_frequency() {
        ticks_to_ns(1, 0);
    }

    #[test]
    fn test_duration_forward() {
        assert_eq!(kernel_duration_ns(600, 900, NSEC_IN_SEC), 300);
    }

    #[test]
    fn test_duration_equal_ticks_is_zero() {
        assert_eq!(kernel_duration_ns(42, 42, NSEC_IN_SEC), 0);
    }

    #[test]
    fn test_duration_wraparound() {
        let start = TIMER_WRAP - 100;
        let end = 50;
        assert_eq!(kernel_duration_ns(start, end, NSEC_IN_SEC), 150);
    }

    #[test]
    fn test_anchor_to_host() {
        let window = anchor_to_host(600, 900, NSEC_IN_SEC, SubmitAnchor::new(1000, 500));
        assert_eq!(window.start, 1100);
        assert_eq!(window.end, 1400);
        assert_eq!(window.duration(), 300);
    }

    #[test]
    fn test_anchor_to_host_scaled_frequency() {
        // 2 ticks per ns is freq = 2 GHz
        let window = anchor_to_host(1200, 1800, 2 * NSEC_IN_SEC, SubmitAnchor::new(10, 1000));
        assert_eq!(window.start, 110);
        assert_eq!(window.end, 410);
    }

    #[test]
    #[should_panic(expected = "not monotonic")]
    fn test_anchor_rejects_start_before_submit() {
        anchor_to_host(400, 900, NSEC_IN_SEC, SubmitAnchor::new(1000, 500));
    }

    #[test]
    fn test_device_window() {
        assert_eq!(device_window(600, 900, NSEC_IN_SEC), (600, 900));
    }

    #[test]
    fn test_clock_sync_host_domain() {
        let sync = ClockSync::new(1000, 500, NSEC_IN_SEC);
        assert_eq!(sync.to_device_ns(1100, ClockDomain::Host), 600);
    }

    #[test]
    fn test_clock_sync_device_domain_passthrough() {
        let sync = ClockSync::new(1000, 500, NSEC_IN_SEC);
        assert_eq!(sync.to_device_ns(42, ClockDomain::Device), 42);
    }

    #[test]
    fn test_clock_domain_from_str() {
        assert_eq!("HOST".parse::<ClockDomain>().unwrap(), ClockDomain::Host);
        assert_eq!("device".parse::<ClockDomain>().unwrap(), ClockDomain::Device);
        assert!("gpu".parse::<ClockDomain>().is_err());
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let t1 = clock.timestamp();
        let t2 = clock.timestamp();
        assert!(t2 >= t1);
    }
}
