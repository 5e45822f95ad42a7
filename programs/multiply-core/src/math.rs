//! Decimal helpers shared by the calculators.
//!
//! Token amounts travel as `Decimal` in whole-token units while planning and
//! as `u64` lamports once they are written into a step.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::constants::{BPS_DENOMINATOR, FRACTION_SCALE_BITS, PCT_DENOMINATOR};
use crate::errors::{MultiplyError, MultiplyResult};

/// 10^decimals as a Decimal
pub fn mint_factor(decimals: u8) -> MultiplyResult<Decimal> {
    10u64
        .checked_pow(decimals as u32)
        .map(Decimal::from)
        .ok_or(MultiplyError::MathOverflow)
}

pub fn checked_div(numerator: Decimal, denominator: Decimal) -> MultiplyResult<Decimal> {
    numerator
        .checked_div(denominator)
        .ok_or(MultiplyError::MathOverflow)
}

pub fn checked_mul(a: Decimal, b: Decimal) -> MultiplyResult<Decimal> {
    a.checked_mul(b).ok_or(MultiplyError::MathOverflow)
}

/// Round up to the given number of decimal places
pub fn ceil_to_decimals(value: Decimal, decimals: u8) -> Decimal {
    value.round_dp_with_strategy(decimals as u32, RoundingStrategy::AwayFromZero)
}

pub fn floor_to_decimals(value: Decimal, decimals: u8) -> Decimal {
    value.round_dp_with_strategy(decimals as u32, RoundingStrategy::ToZero)
}

fn lamports_to_u64(lamports: Decimal) -> MultiplyResult<u64> {
    if lamports.is_sign_negative() && !lamports.is_zero() {
        return Err(MultiplyError::InvalidAmount(lamports));
    }
    lamports.to_u64().ok_or(MultiplyError::MathOverflow)
}

pub fn to_lamports_ceil(amount: Decimal, decimals: u8) -> MultiplyResult<u64> {
    lamports_to_u64(checked_mul(amount, mint_factor(decimals)?)?.ceil())
}

pub fn to_lamports_floor(amount: Decimal, decimals: u8) -> MultiplyResult<u64> {
    lamports_to_u64(checked_mul(amount, mint_factor(decimals)?)?.floor())
}

pub fn from_lamports(lamports: u64, decimals: u8) -> MultiplyResult<Decimal> {
    checked_div(Decimal::from(lamports), mint_factor(decimals)?)
}

pub fn bps_to_decimal(bps: u64) -> Decimal {
    Decimal::from(bps) / Decimal::from(BPS_DENOMINATOR)
}

pub fn pct_to_decimal(pct: u64) -> Decimal {
    Decimal::from(pct) / Decimal::from(PCT_DENOMINATOR)
}

/// Scaled fraction (value / 2^60) to Decimal
pub fn fraction_sf_to_decimal(sf: u64) -> Decimal {
    Decimal::from(sf) / Decimal::from(1u64 << FRACTION_SCALE_BITS)
}

/// Inverse of `fraction_sf_to_decimal`, truncating
pub fn decimal_to_fraction_sf(value: Decimal) -> MultiplyResult<u64> {
    checked_mul(value, Decimal::from(1u64 << FRACTION_SCALE_BITS))?
        .floor()
        .to_u64()
        .ok_or(MultiplyError::MathOverflow)
}

/// `1 + pct / 100`
pub fn one_plus_pct(pct: Decimal) -> Decimal {
    Decimal::ONE + pct / dec!(100)
}
