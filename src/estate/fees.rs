//! Fee policy: pure functions, no state.
//!
//! All fees are basis points of the input with integer truncation, so rounding
//! always lands on the payer's side of the protocol.

use alloy_primitives::U256;

pub const BPS_DENOMINATOR: u64 = 10_000;

/// 2% of the purchase cost.
pub const PURCHASE_FEE_BPS: u64 = 200;
/// 1% of deposited income.
pub const MANAGEMENT_FEE_BPS: u64 = 100;
/// 10% of a distribution. Only applied when the distribution config enables it.
pub const PERFORMANCE_FEE_BPS: u64 = 1_000;

/// `floor(amount * rate / 10_000)` without the intermediate product, so it
/// holds for the whole `U256` range. Rates stay below the denominator.
fn bps(amount: U256, rate_bps: u64) -> U256 {
    let denominator = U256::from(BPS_DENOMINATOR);
    let rate = U256::from(rate_bps);
    (amount / denominator) * rate + (amount % denominator) * rate / denominator
}

pub fn purchase_fee(cost: U256) -> U256 {
    bps(cost, PURCHASE_FEE_BPS)
}

pub fn management_fee(income: U256) -> U256 {
    bps(income, MANAGEMENT_FEE_BPS)
}

pub fn performance_fee(distribution: U256) -> U256 {
    bps(distribution, PERFORMANCE_FEE_BPS)
}

/// `(fee, net)` split of deposited income.
pub fn split_income(income: U256) -> (U256, U256) {
    let fee = management_fee(income);
    (fee, income - fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_fee_rates() {
        assert_eq!(purchase_fee(u(10_000)), u(200));
        assert_eq!(management_fee(u(10_000)), u(100));
        assert_eq!(performance_fee(u(10_000)), u(1_000));
    }

    #[test]
    fn test_fees_truncate_toward_zero() {
        // 49 * 2% = 0.98 → 0
        assert_eq!(purchase_fee(u(49)), U256::ZERO);
        // 199 * 1% = 1.99 → 1
        assert_eq!(management_fee(u(199)), u(1));
        assert_eq!(performance_fee(u(9)), U256::ZERO);
    }

    #[test]
    fn test_split_income_matches_reference_example() {
        assert_eq!(split_income(u(10_000)), (u(100), u(9_900)));
        assert_eq!(split_income(u(1_000_000)), (u(10_000), u(990_000)));
    }

    #[test]
    fn test_fees_exact_near_u256_max() {
        let income = U256::MAX / u(50);
        assert_eq!(management_fee(income), income / u(100));
        assert_eq!(purchase_fee(income), income / u(50));
        assert_eq!(performance_fee(income), income / u(10));

        assert_eq!(management_fee(U256::MAX), U256::MAX / u(100));
        let (fee, net) = split_income(U256::MAX);
        assert_eq!(fee + net, U256::MAX);
    }
}
