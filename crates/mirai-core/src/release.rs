//! Release calculator shared by streams and vesting.
//!
//! Entitlement accrues linearly from `start` to `end`. A cliff hides the
//! accrued amount until `cliff` but does not move the accrual origin: at the
//! cliff the recipient sees everything accrued since `start`.
//!
//! Arithmetic is done in `u128` (multiply before divide) and floors, so the
//! unlocked amount never runs ahead of strict accrual.

use serde::{Deserialize, Serialize};

use crate::constants::BPS_DENOMINATOR;

/// Cumulative entitlement at `now`, independent of what was already paid.
pub fn unlocked(total: u64, start: i64, end: i64, cliff: i64, now: i64) -> u64 {
    if now < start || now < cliff {
        return 0;
    }
    if now >= end {
        return total;
    }

    // start <= now < end, so both spans are positive. i128 keeps the
    // subtraction exact across the full i64 range.
    let elapsed = (now as i128 - start as i128) as u128;
    let duration = (end as i128 - start as i128) as u128;

    // elapsed < duration, so the quotient is strictly below `total`
    (total as u128 * elapsed / duration) as u64
}

/// The four parameters that fully determine a release curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub total: u64,
    pub start: i64,
    pub end: i64,
    pub cliff: i64,
}

impl Schedule {
    /// Plain linear release: the cliff coincides with the start.
    pub fn linear(total: u64, start: i64, end: i64) -> Self {
        Self {
            total,
            start,
            end,
            cliff: start,
        }
    }

    pub fn with_cliff(total: u64, start: i64, end: i64, cliff: i64) -> Self {
        Self {
            total,
            start,
            end,
            cliff,
        }
    }

    pub fn unlocked_at(&self, now: i64) -> u64 {
        unlocked(self.total, self.start, self.end, self.cliff, now)
    }

    /// Unlocked but not yet paid out. Saturates at zero.
    pub fn available(&self, now: i64, paid: u64) -> u64 {
        self.unlocked_at(now).saturating_sub(paid)
    }

    /// Unlocked share of the total in basis points (0..=10_000).
    pub fn progress_bps(&self, now: i64) -> u64 {
        if self.total == 0 {
            return 0;
        }
        (self.unlocked_at(now) as u128 * BPS_DENOMINATOR as u128 / self.total as u128) as u64
    }

    pub fn is_fully_unlocked(&self, now: i64) -> bool {
        now >= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T: i64 = 1_771_632_000;

    #[test]
    fn test_midpoint_scenario() {
        let schedule = Schedule::linear(100_000_000, T + 10, T + 100);
        assert_eq!(schedule.unlocked_at(T + 55), 50_000_000);
        assert_eq!(schedule.available(T + 55, 10_000_000), 40_000_000);
    }

    #[test]
    fn test_boundaries_are_exact() {
        let schedule = Schedule::linear(1_000, T, T + 7);
        assert_eq!(schedule.unlocked_at(T - 1), 0);
        assert_eq!(schedule.unlocked_at(T), 0);
        assert_eq!(schedule.unlocked_at(T + 7), 1_000);
        assert_eq!(schedule.unlocked_at(T + 7_000), 1_000);
    }

    #[test]
    fn test_floor_rounding() {
        // 1000 * 1/3 = 333.33 → 333
        let schedule = Schedule::linear(1_000, 0, 3);
        assert_eq!(schedule.unlocked_at(1), 333);
        assert_eq!(schedule.unlocked_at(2), 666);
    }

    #[test]
    fn test_no_overflow_at_extremes() {
        let schedule = Schedule::linear(u64::MAX, i64::MIN, i64::MAX);
        assert_eq!(schedule.unlocked_at(i64::MIN), 0);
        // elapsed = 2^63 over a span of 2^64 - 1 seconds
        assert_eq!(schedule.unlocked_at(0), 1u64 << 63);
        assert_eq!(schedule.unlocked_at(i64::MAX), u64::MAX);
    }

    #[test]
    fn test_cliff_gates_visibility_not_accrual() {
        let schedule = Schedule::with_cliff(1_000, T, T + 100, T + 25);
        assert_eq!(schedule.unlocked_at(T + 10), 0);
        assert_eq!(schedule.unlocked_at(T + 24), 0);
        // At the cliff, everything accrued since start becomes visible
        assert_eq!(schedule.unlocked_at(T + 25), 250);
        assert_eq!(schedule.unlocked_at(T + 50), 500);
        assert_eq!(schedule.unlocked_at(T + 100), 1_000);
    }

    #[test]
    fn test_cliff_at_end_releases_everything_at_once() {
        let schedule = Schedule::with_cliff(1_000, T, T + 100, T + 100);
        assert_eq!(schedule.unlocked_at(T + 99), 0);
        assert_eq!(schedule.unlocked_at(T + 100), 1_000);
    }

    #[test]
    fn test_available_saturates() {
        let schedule = Schedule::linear(100, 0, 10);
        assert_eq!(schedule.available(5, 80), 0);
    }

    #[test]
    fn test_progress_bps() {
        let schedule = Schedule::linear(200, 0, 4);
        assert_eq!(schedule.progress_bps(-1), 0);
        assert_eq!(schedule.progress_bps(1), 2_500);
        assert_eq!(schedule.progress_bps(4), 10_000);
        assert_eq!(Schedule::linear(0, 0, 4).progress_bps(2), 0);
    }

    proptest! {
        #[test]
        fn prop_monotonic_in_now(
            total in any::<u64>(),
            start in -1_000_000i64..1_000_000,
            len in 1i64..1_000_000,
            cliff_off in 0i64..1_000_000,
            a in -2_000_000i64..3_000_000,
            b in -2_000_000i64..3_000_000,
        ) {
            let end = start + len;
            let cliff = start + cliff_off.min(len);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(unlocked(total, start, end, cliff, lo) <= unlocked(total, start, end, cliff, hi));
        }

        #[test]
        fn prop_never_exceeds_total(
            total in any::<u64>(),
            start in any::<i64>(),
            end in any::<i64>(),
            now in any::<i64>(),
        ) {
            prop_assert!(unlocked(total, start, end, start, now) <= total);
        }

        #[test]
        fn prop_endpoints(total in any::<u64>(), start in -1_000_000i64..1_000_000, len in 1i64..1_000_000) {
            prop_assert_eq!(unlocked(total, start, start + len, start, start), 0);
            prop_assert_eq!(unlocked(total, start, start + len, start, start + len), total);
        }
    }
}
