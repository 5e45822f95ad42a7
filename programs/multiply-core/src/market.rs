//! # Market Lookups and Risk Math
//!
//! Read-only helpers over a slot-pinned [`Market`] snapshot: reserve lookups,
//! elevation group resolution and the obligation statistics every operation
//! validates against.
//!
//! ## Elevation Groups
//!
//! - Group `0` means no group: reserves use their own LTV and borrow factor
//! - Inside an active group, eligible collateral uses the group LTV and every
//!   borrow counts at face value (borrow factor 1)
//! - A group admits exactly one debt reserve and a capped set of collateral
//!   reserves
//!
//! ## Obligation Stats
//!
//! ```text
//! deposit_value   = sum(ctokens / exchange_rate * price)
//! borrow_limit    = sum(deposit_value_i * max_ltv_i)
//! adjusted_debt   = sum(borrowed * price * borrow_factor)
//! ltv             = adjusted_debt / deposit_value
//! max_ltv         = borrow_limit / deposit_value
//! ```
//!
//! An obligation with debt and no collateral reports `ltv = Decimal::MAX` so
//! any comparison against a max LTV fails.

use anchor_lang::prelude::Pubkey;
use rust_decimal::Decimal;

use crate::constants::{LENDING_MARKET_AUTH_SEED, NO_ELEVATION_GROUP};
use crate::errors::{MultiplyError, MultiplyResult};
use crate::math::{checked_div, checked_mul, pct_to_decimal};
use crate::state::{ElevationGroup, Market, Obligation, Reserve};

// ========== LOOKUPS ==========

impl Market {
    pub fn reserve(&self, address: &Pubkey) -> MultiplyResult<&Reserve> {
        self.reserves
            .iter()
            .find(|r| r.address == *address)
            .ok_or(MultiplyError::UnknownReserve(*address))
    }

    pub fn reserve_by_mint(&self, mint: &Pubkey) -> MultiplyResult<&Reserve> {
        self.reserves
            .iter()
            .find(|r| r.liquidity_mint == *mint)
            .ok_or(MultiplyError::UnknownMint(*mint))
    }

    /// Lookup for a reserve already validated by address; absence is a logic error
    pub fn validated_reserve(&self, address: &Pubkey) -> MultiplyResult<&Reserve> {
        self.reserves
            .iter()
            .find(|r| r.address == *address)
            .ok_or(MultiplyError::MissingReserve(*address))
    }

    /// Mint lookup after an earlier `reserve_by_mint` succeeded
    pub fn validated_reserve_by_mint(&self, mint: &Pubkey) -> MultiplyResult<&Reserve> {
        self.reserves
            .iter()
            .find(|r| r.liquidity_mint == *mint)
            .ok_or(MultiplyError::MissingReserve(*mint))
    }

    /// `None` for group 0
    pub fn elevation_group(&self, id: u8) -> MultiplyResult<Option<&ElevationGroup>> {
        if id == NO_ELEVATION_GROUP {
            return Ok(None);
        }
        self.elevation_groups
            .iter()
            .find(|g| g.id == id)
            .map(Some)
            .ok_or(MultiplyError::UnknownElevationGroup(id))
    }

    /// Lending market authority PDA under the klend program
    pub fn lending_market_authority(&self) -> Pubkey {
        lending_market_authority(&self.address)
    }

    /// Calculate effective max LTV based on the elevation group
    pub fn get_effective_max_ltv(&self, reserve: &Reserve, group: Option<&ElevationGroup>) -> Decimal {
        match group {
            Some(group) if group.is_eligible_collateral(&reserve.address) => {
                pct_to_decimal(group.ltv_pct as u64)
            }
            _ => reserve.loan_to_value(),
        }
    }

    /// Borrow factor is waived inside an active elevation group
    pub fn get_effective_borrow_factor(&self, reserve: &Reserve, group: Option<&ElevationGroup>) -> Decimal {
        if group.is_some() {
            Decimal::ONE
        } else {
            reserve.borrow_factor()
        }
    }

    /// Deposits, borrows and LTV of `obligation` as if it sat in `elevation_group`;
    /// its reserves were checked against the market when the snapshot loaded
    pub fn obligation_stats(
        &self,
        obligation: &Obligation,
        elevation_group: u8,
    ) -> MultiplyResult<ObligationStats> {
        let group = self.elevation_group(elevation_group)?;
        let mut stats = ObligationStats::default();

        for deposit in &obligation.deposits {
            let reserve = self.validated_reserve(&deposit.deposit_reserve)?;
            let liquidity = reserve.collateral_to_liquidity(Decimal::from(deposit.deposited_amount))?;
            let value = reserve.market_value(liquidity)?;
            stats.deposit_value += value;
            stats.borrow_limit += checked_mul(value, self.get_effective_max_ltv(reserve, group))?;
        }

        for borrow in &obligation.borrows {
            let reserve = self.validated_reserve(&borrow.borrow_reserve)?;
            let value = reserve.market_value(borrow.borrowed_amount)?;
            stats.borrow_value += value;
            stats.adjusted_borrow_value +=
                checked_mul(value, self.get_effective_borrow_factor(reserve, group))?;
        }

        stats.net_value = stats.deposit_value - stats.borrow_value;
        if stats.deposit_value.is_zero() {
            stats.ltv = if stats.adjusted_borrow_value.is_zero() {
                Decimal::ZERO
            } else {
                Decimal::MAX
            };
            stats.max_ltv = Decimal::ZERO;
        } else {
            stats.ltv = checked_div(stats.adjusted_borrow_value, stats.deposit_value)?;
            stats.max_ltv = checked_div(stats.borrow_limit, stats.deposit_value)?;
        }
        Ok(stats)
    }
}

pub fn lending_market_authority(market: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[LENDING_MARKET_AUTH_SEED, market.as_ref()], &crate::ID).0
}

// ========== STATS ==========

/// USD-valued obligation totals
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ObligationStats {
    pub deposit_value: Decimal,
    pub borrow_value: Decimal,
    /// Borrow value weighted by borrow factors
    pub adjusted_borrow_value: Decimal,
    pub borrow_limit: Decimal,
    pub net_value: Decimal,
    pub ltv: Decimal,
    pub max_ltv: Decimal,
}

impl ObligationStats {
    /// deposit / net, zero for an empty position
    pub fn leverage(&self) -> Decimal {
        if self.net_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.deposit_value.checked_div(self.net_value).unwrap_or(Decimal::MAX)
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use crate::state::{BorrowRateCurve, ReserveOracles};
    use rust_decimal_macros::dec;

    pub fn reserve(symbol: &str, price: Decimal, decimals: u8) -> Reserve {
        Reserve {
            address: Pubkey::new_unique(),
            lending_market: Pubkey::default(),
            symbol: symbol.to_string(),
            liquidity_mint: Pubkey::new_unique(),
            liquidity_token_program: Pubkey::new_unique(),
            liquidity_supply_vault: Pubkey::new_unique(),
            fee_vault: Pubkey::new_unique(),
            liquidity_decimals: decimals,
            market_price: price,
            available_amount: 1_000_000_000_000,
            borrowed_amount: Decimal::ZERO,
            cumulative_borrow_rate: Decimal::ONE,
            last_update_slot: 0,
            collateral_mint: Pubkey::new_unique(),
            collateral_supply_vault: Pubkey::new_unique(),
            collateral_mint_supply: 0,
            oracles: ReserveOracles::default(),
            loan_to_value_pct: 75,
            borrow_factor_pct: 100,
            borrow_fee_sf: 0,
            flash_loan_fee_sf: 0,
            host_fixed_interest_rate_bps: 0,
            borrow_rate_curve: BorrowRateCurve {
                points: vec![(dec!(0), dec!(0.01)), (dec!(1), dec!(0.5))],
            },
            recent_slot_duration_ms: 500,
        }
    }
}
