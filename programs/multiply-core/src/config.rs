use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::errors::{MultiplyError, MultiplyResult};

/// Share of the native SOL balance wrapped when SOL is the debt token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsolWrapPolicy {
    pub fraction_bps: u64,
    pub cap_lamports: u64,
}

impl Default for WsolWrapPolicy {
    fn default() -> Self {
        Self {
            fraction_bps: DEFAULT_WSOL_WRAP_FRACTION_BPS,
            cap_lamports: DEFAULT_WSOL_WRAP_CAP_LAMPORTS,
        }
    }
}

impl WsolWrapPolicy {
    /// min(balance * fraction, cap)
    pub fn wrap_amount(&self, native_balance: u64) -> MultiplyResult<u64> {
        let share = (native_balance as u128)
            .checked_mul(self.fraction_bps as u128)
            .ok_or(MultiplyError::MathOverflow)?
            .checked_div(BPS_DENOMINATOR as u128)
            .ok_or(MultiplyError::MathOverflow)?;
        Ok((share as u64).min(self.cap_lamports))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplyConfig {
    /// Inflates the quote input so the committed amount never exceeds it
    pub quote_buffer_bps: u64,
    pub wsol_wrap: WsolWrapPolicy,
    pub withdraw_slot_offset: u64,
    pub compute_unit_limit: u32,
    /// Fixed margin applied on top of the interest accrual ratio
    pub interest_margin: Decimal,
}

impl Default for MultiplyConfig {
    fn default() -> Self {
        Self {
            quote_buffer_bps: 0,
            wsol_wrap: WsolWrapPolicy::default(),
            withdraw_slot_offset: WITHDRAW_SLOT_OFFSET,
            compute_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            interest_margin: dec!(1.001),
        }
    }
}

impl MultiplyConfig {
    pub fn from_json(raw: &str) -> MultiplyResult<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| MultiplyError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MultiplyResult<()> {
        crate::require!(
            self.wsol_wrap.fraction_bps <= BPS_DENOMINATOR,
            MultiplyError::InvalidConfig(format!(
                "wsol_wrap.fraction_bps {} above {}",
                self.wsol_wrap.fraction_bps, BPS_DENOMINATOR
            ))
        );
        crate::require!(
            self.quote_buffer_bps <= BPS_DENOMINATOR,
            MultiplyError::InvalidConfig(format!(
                "quote_buffer_bps {} above {}",
                self.quote_buffer_bps, BPS_DENOMINATOR
            ))
        );
        crate::require!(
            self.interest_margin >= Decimal::ONE,
            MultiplyError::InvalidConfig(format!(
                "interest_margin {} below 1",
                self.interest_margin
            ))
        );
        crate::require!(
            self.compute_unit_limit > 0,
            MultiplyError::InvalidConfig("compute_unit_limit is zero".to_string())
        );
        Ok(())
    }
}
