//! Reference peripherals built on the device framework.

/// Programmable interval timer.
pub mod interval_timer;
pub use interval_timer::{IntervalTimer, IntervalTimerConfig};
