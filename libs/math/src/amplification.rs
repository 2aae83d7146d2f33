//! Amplification coefficient ramping
//!
//! `A` is stored multiplied by [`A_PRECISION`] and moves linearly between
//! `(initial_a_time, initial_a)` and `(future_a_time, future_a)`. Ramps are
//! bounded in speed (minimum duration) and in size (maximum factor) so that a
//! single ramp cannot reshape the curve fast enough to make imbalance
//! arbitrage against liquidity providers profitable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scale applied to stored `A` values
pub const A_PRECISION: u128 = 100;

/// Exclusive upper bound of the raw (unscaled) amplification coefficient
pub const MAX_A: u128 = 1_000_000;

const DAY_SECS: u64 = 24 * 60 * 60;

/// Errors raised by ramp management
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RampError {
    #[error("Amplification {value} must be > 0 and < {max}")]
    InvalidAmplification { value: u128, max: u128 },

    #[error("Wait {min_interval_secs}s after the last ramp before starting another")]
    RampTooSoon { min_interval_secs: u64 },

    #[error("Ramp must last at least {min_duration_secs}s")]
    InsufficientRampTime { min_duration_secs: u64 },

    #[error("Future A {requested} is more than {max_change}x away from current A {current}")]
    RampFactorOutOfBounds {
        current: u128,
        requested: u128,
        max_change: u128,
    },

    #[error("Ramp is already stopped")]
    RampAlreadyStopped,
}

/// Bounds applied to every ramp request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RampLimits {
    /// Minimum time between `now` and the ramp's completion
    pub min_ramp_time_secs: u64,
    /// Minimum time since the previous ramp started
    pub min_ramp_interval_secs: u64,
    /// Maximum ratio between future and current A, in either direction
    pub max_a_change: u128,
}

impl Default for RampLimits {
    fn default() -> Self {
        Self {
            min_ramp_time_secs: 14 * DAY_SECS,
            min_ramp_interval_secs: DAY_SECS,
            max_a_change: 2,
        }
    }
}

/// Ramp parameters after a successful `ramp`, for event reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampUpdate {
    pub initial_a_precise: u128,
    pub future_a_precise: u128,
    pub initial_time: u64,
    pub future_time: u64,
}

/// Persisted amplification state (values scaled by [`A_PRECISION`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AmplificationState {
    pub initial_a: u128,
    pub future_a: u128,
    pub initial_a_time: u64,
    pub future_a_time: u64,
}

impl AmplificationState {
    /// Fixed amplification with no ramp, from a raw (unscaled) `A`
    pub fn new(a: u128) -> Result<Self, RampError> {
        if a == 0 || a >= MAX_A {
            return Err(RampError::InvalidAmplification { value: a, max: MAX_A });
        }
        let precise = a * A_PRECISION;
        Ok(Self {
            initial_a: precise,
            future_a: precise,
            initial_a_time: 0,
            future_a_time: 0,
        })
    }

    /// Current `A` scaled by [`A_PRECISION`]
    ///
    /// Linear between the ramp endpoints, `initial_a` before the window opens
    /// and exactly `future_a` once it closes.
    pub fn get_a_precise(&self, now: u64) -> u128 {
        let (a0, a1) = (self.initial_a, self.future_a);
        let (t0, t1) = (self.initial_a_time, self.future_a_time);
        if now >= t1 {
            return a1;
        }
        if now <= t0 {
            return a0;
        }
        let elapsed = u128::from(now - t0);
        let duration = u128::from(t1 - t0);
        if a1 > a0 {
            a0 + (a1 - a0) * elapsed / duration
        } else {
            a0 - (a0 - a1) * elapsed / duration
        }
    }

    /// Current raw `A`
    pub fn get_a(&self, now: u64) -> u128 {
        self.get_a_precise(now) / A_PRECISION
    }

    pub fn is_ramping(&self, now: u64) -> bool {
        self.future_a_time > now
    }

    /// Start a linear ramp from the current `A` to `future_a` (raw) at `future_time`
    pub fn ramp(
        &mut self,
        future_a: u128,
        future_time: u64,
        now: u64,
        limits: &RampLimits,
    ) -> Result<RampUpdate, RampError> {
        if now < self.initial_a_time.saturating_add(limits.min_ramp_interval_secs) {
            return Err(RampError::RampTooSoon {
                min_interval_secs: limits.min_ramp_interval_secs,
            });
        }
        if future_time < now.saturating_add(limits.min_ramp_time_secs) {
            return Err(RampError::InsufficientRampTime {
                min_duration_secs: limits.min_ramp_time_secs,
            });
        }
        if future_a == 0 || future_a >= MAX_A {
            return Err(RampError::InvalidAmplification {
                value: future_a,
                max: MAX_A,
            });
        }

        let initial_a_precise = self.get_a_precise(now);
        let future_a_precise = future_a * A_PRECISION;
        let within_bounds = if future_a_precise < initial_a_precise {
            future_a_precise.saturating_mul(limits.max_a_change) >= initial_a_precise
        } else {
            future_a_precise <= initial_a_precise.saturating_mul(limits.max_a_change)
        };
        if !within_bounds {
            return Err(RampError::RampFactorOutOfBounds {
                current: initial_a_precise,
                requested: future_a_precise,
                max_change: limits.max_a_change,
            });
        }

        self.initial_a = initial_a_precise;
        self.future_a = future_a_precise;
        self.initial_a_time = now;
        self.future_a_time = future_time;

        Ok(RampUpdate {
            initial_a_precise,
            future_a_precise,
            initial_time: now,
            future_time,
        })
    }

    /// Freeze `A` at its interpolated value; returns the frozen precise `A`
    pub fn stop(&mut self, now: u64) -> Result<u128, RampError> {
        if !self.is_ramping(now) {
            return Err(RampError::RampAlreadyStopped);
        }
        let current = self.get_a_precise(now);
        self.initial_a = current;
        self.future_a = current;
        self.initial_a_time = now;
        self.future_a_time = now;
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 1_700_000_000;

    fn ramping_state(target: u128) -> AmplificationState {
        let mut amp = AmplificationState::new(50).unwrap();
        amp.ramp(target, START + 14 * DAY_SECS + 1, START, &RampLimits::default())
            .unwrap();
        amp
    }

    #[test]
    fn test_new_rejects_out_of_range() {
        assert!(AmplificationState::new(0).is_err());
        assert!(AmplificationState::new(MAX_A).is_err());
        assert_eq!(AmplificationState::new(50).unwrap().get_a_precise(0), 5000);
    }

    #[test]
    fn test_ramp_upwards_interpolates() {
        let amp = ramping_state(100);
        assert_eq!(amp.get_a(START), 50);
        assert_eq!(amp.get_a_precise(START + 100_000), 5413);
        assert_eq!(amp.get_a(START + 100_000), 54);
        assert_eq!(amp.get_a_precise(START + 14 * DAY_SECS + 1), 10_000);
        assert_eq!(amp.get_a_precise(u64::MAX), 10_000);
    }

    #[test]
    fn test_ramp_downwards_interpolates() {
        let amp = ramping_state(25);
        assert_eq!(amp.get_a_precise(START + 100_000), 4794);
        assert_eq!(amp.get_a(START + 14 * DAY_SECS + 1), 25);
    }

    #[test]
    fn test_ramp_rejections() {
        let limits = RampLimits::default();
        let mut amp = AmplificationState::new(50).unwrap();
        let end = START + 14 * DAY_SECS + 1;

        assert_eq!(
            amp.ramp(101, end, START, &limits),
            Err(RampError::RampFactorOutOfBounds {
                current: 5000,
                requested: 10_100,
                max_change: 2
            })
        );
        assert!(matches!(
            amp.ramp(24, end, START, &limits),
            Err(RampError::RampFactorOutOfBounds { .. })
        ));
        assert!(matches!(
            amp.ramp(0, end, START, &limits),
            Err(RampError::InvalidAmplification { .. })
        ));
        assert!(matches!(
            amp.ramp(55, START + 14 * DAY_SECS - 1, START, &limits),
            Err(RampError::InsufficientRampTime { .. })
        ));

        amp.ramp(55, end, START, &limits).unwrap();
        assert!(matches!(
            amp.ramp(55, end + 10, START + 10, &limits),
            Err(RampError::RampTooSoon { .. })
        ));
    }

    #[test]
    fn test_stop_ramp_freezes_value() {
        let mut amp = ramping_state(100);
        assert!(amp.is_ramping(START + 100_000));
        assert_eq!(amp.stop(START + 100_000).unwrap(), 5413);
        assert!(!amp.is_ramping(START + 100_000));
        assert_eq!(amp.get_a_precise(START + 14 * DAY_SECS + 1), 5413);
        assert_eq!(amp.stop(START + 200_000), Err(RampError::RampAlreadyStopped));
    }

    #[test]
    fn test_interpolation_is_monotonic() {
        let up = ramping_state(100);
        let down = ramping_state(25);
        let mut prev_up = up.get_a_precise(START);
        let mut prev_down = down.get_a_precise(START);
        for step in 0..=1_000u64 {
            let now = START + step * 1_300;
            let a_up = up.get_a_precise(now);
            let a_down = down.get_a_precise(now);
            assert!(a_up >= prev_up && (5000..=10_000).contains(&a_up));
            assert!(a_down <= prev_down && (2500..=5000).contains(&a_down));
            prev_up = a_up;
            prev_down = a_down;
        }
    }
}
