//! Deep-sleep coordination with the host stack
//!
//! The stack reports how long it could stay asleep; the commissioner adds
//! its own constraint (the next keep-alive). The host sleeps for the
//! smaller of the two.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SleepError {
    #[error("stack cannot stop right now")]
    NotSupported,
    #[error("stack already active")]
    AlreadyActive,
}

/// Result of resynchronising timers after a sleep period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Stack restarted and timers caught up
    Restarted,
    /// Nothing is due yet, the host may keep sleeping
    ContinueSleep,
}

/// Sleep facility of the host network stack
pub trait SleepControl {
    /// Milliseconds the stack could sleep; `0` means it cannot.
    fn deep_sleep_possibility(&self) -> u32;

    fn enter_sleep(&mut self) -> Result<(), SleepError>;

    fn wakeup_and_timer_sync(&mut self, slept_ms: u32) -> Result<WakeOutcome, SleepError>;
}

/// Milliseconds the host may sleep given the stack's answer and the
/// commissioner's next mandatory wake. `0` means stay awake.
pub fn sleep_budget(stack: &impl SleepControl, commissioner_wake: Option<Duration>) -> u32 {
    let stack_ms = stack.deep_sleep_possibility();
    match commissioner_wake {
        Some(wake) => stack_ms.min(u32::try_from(wake.as_millis()).unwrap_or(u32::MAX)),
        None => stack_ms,
    }
}

/// Wake the stack after `slept` and let it catch its timers up.
/// Sleeps longer than `u32::MAX` ms are reported as `u32::MAX`.
pub fn resync(stack: &mut impl SleepControl, slept: Duration) -> Result<WakeOutcome, SleepError> {
    stack.wakeup_and_timer_sync(u32::try_from(slept.as_millis()).unwrap_or(u32::MAX))
}

/// Sleep facility for hosts without a radio duty cycle: the stack itself
/// never objects, so only the commissioner's deadlines count.
#[derive(Debug, Default)]
pub struct HostSleep {
    asleep: bool,
}

impl SleepControl for HostSleep {
    fn deep_sleep_possibility(&self) -> u32 {
        u32::MAX
    }

    fn enter_sleep(&mut self) -> Result<(), SleepError> {
        self.asleep = true;
        Ok(())
    }

    fn wakeup_and_timer_sync(&mut self, _slept_ms: u32) -> Result<WakeOutcome, SleepError> {
        if !self.asleep {
            return Err(SleepError::AlreadyActive);
        }
        self.asleep = false;
        Ok(WakeOutcome::Restarted)
    }
}
