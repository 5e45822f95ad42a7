/// Interest accrual estimation
/// Mirrors klend's per-slot compounding so repay buffers match execution time
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::constants::{DEFAULT_SLOT_DURATION_MS, SLOTS_PER_YEAR};
use crate::errors::{MultiplyError, MultiplyResult};
use crate::math::{bps_to_decimal, ceil_to_decimals, checked_div, checked_mul};
use crate::state::{BorrowRateCurve, ObligationLiquidity, Reserve};

impl BorrowRateCurve {
    /// Interpolated borrow APR at `utilization` (clamped to 100%)
    pub fn borrow_rate(&self, utilization: Decimal) -> MultiplyResult<Decimal> {
        crate::require!(
            self.points.len() >= 2,
            MultiplyError::InvalidBorrowRateCurve("fewer than two points")
        );
        let utilization = utilization.min(Decimal::ONE).max(Decimal::ZERO);

        for window in self.points.windows(2) {
            let (x0, y0) = window[0];
            let (x1, y1) = window[1];
            if x1 == utilization {
                return Ok(y1);
            }
            if utilization <= x1 {
                crate::require!(
                    x0 < x1 && y0 <= y1,
                    MultiplyError::InvalidBorrowRateCurve("curve is not increasing")
                );
                // rate = y0 + (u - x0) * (y1 - y0) / (x1 - x0)
                let slope = checked_div(y1 - y0, x1 - x0)?;
                return Ok(y0 + (utilization - x0) * slope);
            }
        }

        Err(MultiplyError::InvalidBorrowRateCurve(
            "utilization outside curve",
        ))
    }
}

/// Scales curve rates when slots run slower or faster than nominal
pub fn slot_adjustment_factor(recent_slot_duration_ms: u64) -> MultiplyResult<Decimal> {
    if recent_slot_duration_ms == 0 {
        return Ok(Decimal::ONE);
    }
    checked_div(
        Decimal::from(DEFAULT_SLOT_DURATION_MS),
        Decimal::from(recent_slot_duration_ms),
    )
}

/// Borrow APR = curve(utilization) * slot adjustment + fixed host rate
pub fn calculate_borrow_apr(reserve: &Reserve) -> MultiplyResult<Decimal> {
    let curve_rate = reserve
        .borrow_rate_curve
        .borrow_rate(reserve.utilization())?;
    let adjusted = checked_mul(
        curve_rate,
        slot_adjustment_factor(reserve.recent_slot_duration_ms)?,
    )?;
    Ok(adjusted + bps_to_decimal(reserve.host_fixed_interest_rate_bps as u64))
}

/// (1 + rate / SLOTS_PER_YEAR) ^ elapsed_slots, three-term binomial past 4 slots
pub fn approximate_compounded_interest(rate: Decimal, elapsed_slots: u64) -> MultiplyResult<Decimal> {
    let base = checked_div(rate, Decimal::from(SLOTS_PER_YEAR))?;
    let one_plus = Decimal::ONE + base;

    match elapsed_slots {
        0 => return Ok(Decimal::ONE),
        1 => return Ok(one_plus),
        2 => return checked_mul(one_plus, one_plus),
        3 => return checked_mul(checked_mul(one_plus, one_plus)?, one_plus),
        4 => {
            let pow2 = checked_mul(one_plus, one_plus)?;
            return checked_mul(pow2, pow2);
        }
        _ => {}
    }

    let exp = Decimal::from(elapsed_slots);
    let exp_minus_1 = exp - Decimal::ONE;
    let exp_minus_2 = exp - dec!(2);

    let base_pow2 = checked_mul(base, base)?;
    let base_pow3 = checked_mul(base_pow2, base)?;

    let first_term = checked_mul(base, exp)?;
    let second_term = checked_mul(checked_mul(base_pow2, exp)?, exp_minus_1)? / dec!(2);
    let third_term =
        checked_mul(checked_mul(checked_mul(base_pow3, exp)?, exp_minus_1)?, exp_minus_2)? / dec!(6);

    Ok(Decimal::ONE + first_term + second_term + third_term)
}

/// Reserve cumulative borrow rate accrued up to `slot`
pub fn estimated_cumulative_borrow_rate(reserve: &Reserve, slot: u64) -> MultiplyResult<Decimal> {
    let elapsed = slot.saturating_sub(reserve.last_update_slot);
    let compounded = approximate_compounded_interest(calculate_borrow_apr(reserve)?, elapsed)?;
    checked_mul(reserve.cumulative_borrow_rate, compounded)
}

/// Ratio of the reserve's estimated cumulative rate to the one the borrow last
/// saw; zero when no interest accrued since
pub fn estimate_obligation_interest_rate(
    reserve: &Reserve,
    borrow: &ObligationLiquidity,
    slot: u64,
) -> MultiplyResult<Decimal> {
    let new_cumulative = estimated_cumulative_borrow_rate(reserve, slot)?;
    if new_cumulative > borrow.cumulative_borrow_rate {
        return checked_div(new_cumulative, borrow.cumulative_borrow_rate);
    }
    Ok(Decimal::ZERO)
}

/// amount * max(ratio, 1) * margin, rounded up to `decimals`
pub fn apply_interest_buffer(
    amount: Decimal,
    accrual_ratio: Decimal,
    margin: Decimal,
    decimals: u8,
) -> MultiplyResult<Decimal> {
    let ratio = accrual_ratio.max(Decimal::ONE);
    let buffered = checked_mul(checked_mul(amount, ratio)?, margin)?;
    Ok(ceil_to_decimals(buffered, decimals))
}
