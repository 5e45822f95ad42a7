use anchor_lang::prelude::Pubkey;
use rust_decimal::Decimal;

use crate::constants::*;
use crate::errors::{MultiplyError, MultiplyResult};
use crate::math::{checked_div, checked_mul, fraction_sf_to_decimal, from_lamports, pct_to_decimal};

/// Oracle accounts a reserve refresh reads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReserveOracles {
    pub pyth: Option<Pubkey>,
    pub switchboard_price: Option<Pubkey>,
    pub switchboard_twap: Option<Pubkey>,
    pub scope: Option<Pubkey>,
}

/// Piecewise-linear borrow rate curve of (utilization, rate) points
#[derive(Clone, Debug, PartialEq)]
pub struct BorrowRateCurve {
    pub points: Vec<(Decimal, Decimal)>,
}

/// Reserve snapshot, refreshed by the oracle collaborator before use
#[derive(Clone, Debug, PartialEq)]
pub struct Reserve {
    pub address: Pubkey,
    pub lending_market: Pubkey,
    pub symbol: String,

    // === Liquidity ===
    pub liquidity_mint: Pubkey,
    pub liquidity_token_program: Pubkey,
    pub liquidity_supply_vault: Pubkey,
    pub fee_vault: Pubkey,
    pub liquidity_decimals: u8,
    /// USD price of one whole liquidity token
    pub market_price: Decimal,
    pub available_amount: u64,
    /// Borrowed lamports including accrued interest at `last_update_slot`
    pub borrowed_amount: Decimal,
    pub cumulative_borrow_rate: Decimal,
    pub last_update_slot: u64,

    // === Collateral ===
    pub collateral_mint: Pubkey,
    pub collateral_supply_vault: Pubkey,
    pub collateral_mint_supply: u64,

    // === Config ===
    pub oracles: ReserveOracles,
    pub loan_to_value_pct: u8,
    pub borrow_factor_pct: u64,
    pub borrow_fee_sf: u64,
    pub flash_loan_fee_sf: u64,
    pub host_fixed_interest_rate_bps: u16,
    pub borrow_rate_curve: BorrowRateCurve,
    pub recent_slot_duration_ms: u64,
}

impl Reserve {
    /// klend marks a reserve without flash loans with a `u64::MAX` fee
    pub fn flash_loans_enabled(&self) -> bool {
        self.flash_loan_fee_sf != U64_MAX
    }

    /// Zero when flash loans are disabled; building the loan itself fails then
    pub fn flash_loan_fee(&self) -> Decimal {
        if !self.flash_loans_enabled() {
            return Decimal::ZERO;
        }
        fraction_sf_to_decimal(self.flash_loan_fee_sf)
    }

    pub fn borrow_fee(&self) -> Decimal {
        fraction_sf_to_decimal(self.borrow_fee_sf)
    }

    pub fn loan_to_value(&self) -> Decimal {
        pct_to_decimal(self.loan_to_value_pct as u64)
    }

    pub fn borrow_factor(&self) -> Decimal {
        pct_to_decimal(self.borrow_factor_pct)
    }

    pub fn is_wsol(&self) -> bool {
        self.liquidity_mint == wsol::ID
    }

    /// Total liquidity (available + borrowed) in lamports
    pub fn total_supply(&self) -> Decimal {
        Decimal::from(self.available_amount) + self.borrowed_amount
    }

    pub fn utilization(&self) -> Decimal {
        let total = self.total_supply();
        if total.is_zero() {
            return Decimal::ZERO;
        }
        self.borrowed_amount / total
    }

    /// Collateral tokens minted per liquidity token
    pub fn collateral_exchange_rate(&self) -> Decimal {
        Self::exchange_rate(self.collateral_mint_supply, self.total_supply())
    }

    fn exchange_rate(collateral_supply: u64, total_liquidity: Decimal) -> Decimal {
        if collateral_supply == 0 || total_liquidity.is_zero() {
            return Decimal::ONE;
        }
        Decimal::from(collateral_supply) / total_liquidity
    }

    /// Exchange rate with the borrowed side accrued up to `slot`
    pub fn collateral_exchange_rate_at(&self, slot: u64) -> MultiplyResult<Decimal> {
        let elapsed = slot.saturating_sub(self.last_update_slot);
        let compounded = crate::interest::approximate_compounded_interest(
            crate::interest::calculate_borrow_apr(self)?,
            elapsed,
        )?;
        let borrowed = checked_mul(self.borrowed_amount, compounded)?;
        let total = Decimal::from(self.available_amount) + borrowed;
        Ok(Self::exchange_rate(self.collateral_mint_supply, total))
    }

    pub fn liquidity_to_collateral(&self, liquidity_lamports: Decimal) -> Decimal {
        liquidity_lamports * self.collateral_exchange_rate()
    }

    pub fn collateral_to_liquidity(&self, collateral_lamports: Decimal) -> MultiplyResult<Decimal> {
        checked_div(collateral_lamports, self.collateral_exchange_rate())
    }

    /// Whole-token value of `lamports` in USD
    pub fn market_value(&self, lamports: Decimal) -> MultiplyResult<Decimal> {
        let factor = crate::math::mint_factor(self.liquidity_decimals)?;
        checked_mul(checked_div(lamports, factor)?, self.market_price)
    }

    pub fn tokens(&self, lamports: u64) -> MultiplyResult<Decimal> {
        from_lamports(lamports, self.liquidity_decimals)
    }
}

/// Elevation group (risk bucket) definition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElevationGroup {
    pub id: u8,
    pub ltv_pct: u8,
    pub max_reserves_as_collateral: u8,
    pub debt_reserve: Pubkey,
    pub collateral_reserves: Vec<Pubkey>,
}

impl ElevationGroup {
    pub fn is_eligible_collateral(&self, reserve: &Pubkey) -> bool {
        self.collateral_reserves.contains(reserve)
    }
}

/// Lending market snapshot
#[derive(Clone, Debug, PartialEq)]
pub struct Market {
    pub address: Pubkey,
    pub referral_fee_bps: u16,
    pub reserves: Vec<Reserve>,
    pub elevation_groups: Vec<ElevationGroup>,
}

/// Single collateral deposit entry (collateral token lamports)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObligationCollateral {
    pub deposit_reserve: Pubkey,
    pub deposited_amount: u64,
}

/// Single borrow entry
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObligationLiquidity {
    pub borrow_reserve: Pubkey,
    /// Borrowed lamports including interest at the last obligation refresh
    pub borrowed_amount: Decimal,
    pub cumulative_borrow_rate: Decimal,
}

/// A borrower's position; the engine only ever mutates projected copies
#[derive(Clone, Debug, PartialEq)]
pub struct Obligation {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub lending_market: Pubkey,
    pub deposits: Vec<ObligationCollateral>,
    pub borrows: Vec<ObligationLiquidity>,
    pub elevation_group: u8,
}

impl Obligation {
    pub fn deposit(&self, reserve: &Pubkey) -> Option<&ObligationCollateral> {
        self.deposits.iter().find(|d| d.deposit_reserve == *reserve)
    }

    pub fn borrow(&self, reserve: &Pubkey) -> Option<&ObligationLiquidity> {
        self.borrows.iter().find(|b| b.borrow_reserve == *reserve)
    }

    pub fn deposit_reserves(&self) -> Vec<Pubkey> {
        self.deposits.iter().map(|d| d.deposit_reserve).collect()
    }

    pub fn borrow_reserves(&self) -> Vec<Pubkey> {
        self.borrows.iter().map(|b| b.borrow_reserve).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deposits.is_empty() && self.borrows.is_empty()
    }

    pub fn add_deposit(&mut self, reserve: Pubkey, collateral_amount: u64) -> MultiplyResult<()> {
        if let Some(entry) = self
            .deposits
            .iter_mut()
            .find(|d| d.deposit_reserve == reserve)
        {
            entry.deposited_amount = entry
                .deposited_amount
                .checked_add(collateral_amount)
                .ok_or(MultiplyError::MathOverflow)?;
            return Ok(());
        }

        crate::require!(
            self.deposits.len() < MAX_OBLIGATION_DEPOSITS,
            MultiplyError::MaxObligationEntriesReached(reserve)
        );
        self.deposits.push(ObligationCollateral {
            deposit_reserve: reserve,
            deposited_amount: collateral_amount,
        });
        Ok(())
    }

    /// Withdraw collateral; `U64_MAX` withdraws the whole entry
    pub fn withdraw(&mut self, reserve: Pubkey, collateral_amount: u64) -> MultiplyResult<()> {
        let entry = self
            .deposits
            .iter_mut()
            .find(|d| d.deposit_reserve == reserve)
            .ok_or(MultiplyError::DepositNotFound(reserve))?;

        entry.deposited_amount = if collateral_amount == U64_MAX {
            0
        } else {
            entry.deposited_amount.saturating_sub(collateral_amount)
        };

        // Remove empty deposits
        self.deposits.retain(|d| d.deposited_amount > 0);
        Ok(())
    }

    pub fn add_borrow(
        &mut self,
        reserve: Pubkey,
        amount: Decimal,
        cumulative_borrow_rate: Decimal,
    ) -> MultiplyResult<()> {
        if let Some(entry) = self.borrows.iter_mut().find(|b| b.borrow_reserve == reserve) {
            entry.borrowed_amount = entry
                .borrowed_amount
                .checked_add(amount)
                .ok_or(MultiplyError::MathOverflow)?;
            return Ok(());
        }

        crate::require!(
            self.borrows.len() < MAX_OBLIGATION_BORROWS,
            MultiplyError::MaxObligationEntriesReached(reserve)
        );
        self.borrows.push(ObligationLiquidity {
            borrow_reserve: reserve,
            borrowed_amount: amount,
            cumulative_borrow_rate,
        });
        Ok(())
    }

    /// Repay liquidity; `U64_MAX` repays the whole entry
    pub fn repay(&mut self, reserve: Pubkey, amount: u64) -> MultiplyResult<()> {
        let entry = self
            .borrows
            .iter_mut()
            .find(|b| b.borrow_reserve == reserve)
            .ok_or(MultiplyError::BorrowNotFound(reserve))?;

        entry.borrowed_amount = if amount == U64_MAX {
            Decimal::ZERO
        } else {
            (entry.borrowed_amount - Decimal::from(amount)).max(Decimal::ZERO)
        };

        // Remove empty borrows
        self.borrows.retain(|b| !b.borrowed_amount.is_zero());
        Ok(())
    }
}
