//! Utilization-based admission control.
//!
//! Under rate-monotonic priorities a task set is schedulable on one CPU if
//! `sum(budget_i / period_i)` stays within the liminal bound (0.693 for an
//! unbounded number of tasks). Everything here is pure; callers run it while
//! holding the registry lock so the sum they pass in cannot go stale.
//!
//! The test itself runs on integer loads (utilization in parts per billion)
//! so a task set that lands exactly on the bound is admitted no matter how
//! many tasks make up the sum. Per-task loads round up, which can only make
//! the test stricter.

use std::time::Duration;

use rmsched_core::{Result, SchedError};

pub use rmsched_core::config::LIMINAL_UTILIZATION;

/// Load units per 1.0 of utilization.
pub const LOAD_SCALE: u64 = 1_000_000_000;

/// `budget / period` for one task.
pub fn task_utilization(period: Duration, budget: Duration) -> f64 {
    budget.as_secs_f64() / period.as_secs_f64()
}

/// `budget / period` in load units, rounded up. Zero for a zero period.
pub fn task_load(period: Duration, budget: Duration) -> u64 {
    let period = period.as_nanos();
    if period == 0 {
        return 0;
    }
    let load = (budget.as_nanos() * LOAD_SCALE as u128).div_ceil(period);
    u64::try_from(load).unwrap_or(u64::MAX)
}

/// A configured utilization bound in load units.
pub fn bound_load(bound: f64) -> u64 {
    (bound * LOAD_SCALE as f64).round() as u64
}

pub fn load_to_utilization(load: u64) -> f64 {
    load as f64 / LOAD_SCALE as f64
}

/// Reject zero periods and budgets. Anything below a millisecond cannot be
/// expressed on the command channel either.
pub fn validate(period: Duration, budget: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(SchedError::InvalidParameters("period must be positive".into()));
    }
    if budget.is_zero() {
        return Err(SchedError::InvalidParameters("budget must be positive".into()));
    }
    Ok(())
}

/// Decide whether a candidate fits next to the `current` load.
///
/// Returns the total load after admission. A budget larger than its period
/// is a per-task utilization above 1 and is rejected here like any other
/// overload.
pub fn admit(current: u64, period: Duration, budget: Duration, bound: f64) -> Result<u64> {
    validate(period, budget)?;
    let load = current.saturating_add(task_load(period, budget));
    if budget > period || load > bound_load(bound) {
        return Err(SchedError::RejectedByAdmission {
            utilization: load_to_utilization(load),
            bound,
        });
    }
    Ok(load)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn accepts_under_bound() {
        let load = admit(0, ms(100), ms(20), LIMINAL_UTILIZATION).unwrap();
        assert_eq!(load, 200_000_000);
        assert!((load_to_utilization(load) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn rejects_overload() {
        let current = task_load(ms(100), ms(20));
        let err = admit(current, ms(150), ms(400), LIMINAL_UTILIZATION).unwrap_err();
        match err {
            SchedError::RejectedByAdmission { utilization, bound } => {
                assert!(utilization > 2.8);
                assert_eq!(bound, LIMINAL_UTILIZATION);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bound_is_inclusive() {
        // 693/1000 lands exactly on the bound.
        let load = admit(0, ms(1000), ms(693), LIMINAL_UTILIZATION).unwrap();
        assert_eq!(load, bound_load(LIMINAL_UTILIZATION));
        assert!(admit(load, ms(1000), ms(1), LIMINAL_UTILIZATION).is_err());
    }

    #[test]
    fn several_tasks_summing_to_the_bound_fit() {
        // 0.1 + 0.2 + 0.393 is above 0.693 in f64 but exactly on it here.
        let mut load = 0;
        for budget in [100, 200, 393] {
            load = admit(load, ms(1000), ms(budget), LIMINAL_UTILIZATION).unwrap();
        }
        assert_eq!(load, bound_load(LIMINAL_UTILIZATION));
        assert_eq!(load_to_utilization(load), LIMINAL_UTILIZATION);
        assert!(admit(load, ms(1000), ms(1), LIMINAL_UTILIZATION).is_err());
    }

    #[test]
    fn fractional_loads_round_up() {
        assert_eq!(task_load(ms(3), ms(1)), 333_333_334);
        assert_eq!(task_load(Duration::ZERO, ms(1)), 0);
    }

    #[test]
    fn budget_over_period_rejected_even_with_loose_bound() {
        assert!(matches!(
            admit(0, ms(10), ms(11), 1.0),
            Err(SchedError::RejectedByAdmission { .. })
        ));
    }

    #[test]
    fn zero_parameters_are_invalid() {
        assert!(matches!(
            admit(0, ms(0), ms(1), LIMINAL_UTILIZATION),
            Err(SchedError::InvalidParameters(_))
        ));
        assert!(matches!(
            admit(0, ms(10), ms(0), LIMINAL_UTILIZATION),
            Err(SchedError::InvalidParameters(_))
        ));
    }
}
