//! Credit entitlement gating for mutating operations.

use crate::error::{Result, SwitchError};
use crate::native::UserInfo;

/// Remaining credit, derived from the latest fetched [`UserInfo`] and never
/// stored: `(total - used) * credits_per_unit`, saturating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CreditBalance(pub u32);

/// Blocks mutating operations when entitlement is insufficient.
///
/// The gate never fetches anything itself; callers refresh `UserInfo` first.
/// That keeps the check cheap and side-effect-free for repeated use inside a
/// single workflow.
#[derive(Debug, Clone, Copy)]
pub struct CreditGate {
    credits_per_unit: u32,
}

impl CreditGate {
    pub fn new(credits_per_unit: u32) -> Self {
        Self { credits_per_unit }
    }

    /// Pure function of the given usage snapshot.
    pub fn balance(&self, user: &UserInfo) -> CreditBalance {
        let units = user.total_count.saturating_sub(user.used_count);
        CreditBalance(units.saturating_mul(self.credits_per_unit))
    }

    pub fn require(&self, user: &UserInfo, minimum: u32) -> Result<CreditBalance> {
        let balance = self.balance(user);
        if balance.0 < minimum {
            return Err(SwitchError::InsufficientCredit {
                available: balance.0,
                required: minimum,
            });
        }
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user(total_count: u32, used_count: u32) -> UserInfo {
        UserInfo {
            username: None,
            total_count,
            used_count,
            expire_time: None,
            level: 1,
        }
    }

    #[test]
    fn balance_is_units_times_rate() {
        let gate = CreditGate::new(50);
        assert_eq!(gate.balance(&user(10, 0)), CreditBalance(500));
        assert_eq!(gate.balance(&user(10, 9)), CreditBalance(50));
    }

    #[test]
    fn overdrawn_usage_saturates_to_zero() {
        let gate = CreditGate::new(50);
        assert_eq!(gate.balance(&user(3, 7)), CreditBalance(0));
    }

    #[test]
    fn require_passes_at_exact_cost() {
        let gate = CreditGate::new(50);
        assert!(gate.require(&user(10, 9), 50).is_ok());
    }

    #[test]
    fn require_reports_available_and_required() {
        let gate = CreditGate::new(50);
        let err = gate.require(&user(1, 1), 50).unwrap_err();
        match err {
            SwitchError::InsufficientCredit {
                available,
                required,
            } => {
                assert_eq!(available, 0);
                assert_eq!(required, 50);
            }
            other => panic!("expected InsufficientCredit, got {other:?}"),
        }
    }

    proptest! {
        /// Absent a top-up, balance never increases as usage grows.
        #[test]
        fn balance_is_monotonic_in_usage(
            total in 0u32..10_000,
            used in 0u32..10_000,
            delta in 0u32..100,
        ) {
            let gate = CreditGate::new(50);
            let before = gate.balance(&user(total, used));
            let after = gate.balance(&user(total, used.saturating_add(delta)));
            prop_assert!(after <= before);
        }

        #[test]
        fn balance_is_a_multiple_of_the_unit_rate(
            total in 0u32..10_000,
            used in 0u32..10_000,
        ) {
            let gate = CreditGate::new(50);
            prop_assert_eq!(gate.balance(&user(total, used)).0 % 50, 0);
        }
    }
}
