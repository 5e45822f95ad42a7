use anchor_lang::prelude::Pubkey;
use rust_decimal::Decimal;

use multiply_core::math::{
    bps_to_decimal, checked_div, checked_mul, from_lamports, to_lamports_ceil, to_lamports_floor,
};
use multiply_core::{
    apply_interest_buffer, estimate_obligation_interest_rate, MultiplyError, MultiplyEvent, MultiplyResult,
    Reserve, SwapInputCapped, REPAY_WITH_COLL_QUOTE_CAP_BPS, U64_MAX,
};
use multiply_flash::{flash_borrow_ix, flash_repay_ix, FlashLoan, FlashLoanAccounts};
use multiply_lending::{unwrap_sol_ix, LendingSequence};

use crate::builder::{SequenceLayout, Stage};
use crate::calcs::{borrowed_tokens, max_withdrawable_collateral};
use crate::pipeline::{
    collateral_to_withdraw, oracle_price, Assembly, LeverageOperation, OperationContext, SwapLeg,
};
use crate::types::SwapInputs;

/// Pay debt down by selling collateral out of the same obligation
#[derive(Clone, Debug, PartialEq)]
pub struct RepayWithCollateral {
    pub collateral_mint: Pubkey,
    pub debt_mint: Pubkey,
    /// Debt tokens; ignored when closing
    pub repay_amount: Decimal,
    pub is_closing: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RepayWithCollateralPlan {
    /// Debt tokens repaid before the interest buffer
    pub repay_amount: Decimal,
    pub flash_loan: FlashLoan,
    /// `U64_MAX` when closing
    pub repay_lamports: u64,
    /// Collateral lamports that can leave once the debt is repaid
    pub max_withdraw_lamports: u64,
    pub quote_input_lamports: u64,
    pub swap_in_lamports: u64,
    /// Collateral tokens; `U64_MAX` when closing
    pub withdraw_collateral: u64,
}

impl RepayWithCollateral {
    pub fn new(
        collateral_mint: Pubkey,
        debt_mint: Pubkey,
        repay_amount: Decimal,
        is_closing: bool,
    ) -> MultiplyResult<Self> {
        multiply_core::require!(collateral_mint != debt_mint, MultiplyError::SameMint(collateral_mint));
        multiply_core::require!(
            is_closing || repay_amount > Decimal::ZERO,
            MultiplyError::InvalidAmount(repay_amount)
        );

        Ok(Self {
            collateral_mint,
            debt_mint,
            repay_amount,
            is_closing,
        })
    }

    fn reserves<'a>(&self, ctx: &OperationContext<'a>) -> MultiplyResult<(&'a Reserve, &'a Reserve)> {
        ctx.reserve_pair(&self.collateral_mint, &self.debt_mint)
    }
}

/// Oracle-priced collateral for `repay_amount` of debt, plus 10%
fn quote_input_cap(repay_amount: Decimal, coll: &Reserve, debt: &Reserve) -> MultiplyResult<u64> {
    let coll_tokens = checked_div(checked_mul(repay_amount, debt.market_price)?, coll.market_price)?;
    to_lamports_ceil(
        checked_mul(coll_tokens, bps_to_decimal(REPAY_WITH_COLL_QUOTE_CAP_BPS))?,
        coll.liquidity_decimals,
    )
}

impl LeverageOperation for RepayWithCollateral {
    type Plan = RepayWithCollateralPlan;

    fn kind(&self) -> &'static str {
        "repay_with_collateral"
    }

    /// Debt per collateral token
    fn oracle_price(&self, ctx: &OperationContext) -> MultiplyResult<Decimal> {
        let (coll, debt) = self.reserves(ctx)?;
        oracle_price(coll, debt)
    }

    fn plan(&self, ctx: &OperationContext, price: Decimal) -> MultiplyResult<RepayWithCollateralPlan> {
        let (coll, debt) = self.reserves(ctx)?;
        let obligation = ctx.obligation();
        let borrow = obligation
            .borrow(&debt.address)
            .ok_or(MultiplyError::BorrowNotFound(debt.address))?;
        obligation
            .deposit(&coll.address)
            .ok_or(MultiplyError::DepositNotFound(coll.address))?;

        let borrowed = borrowed_tokens(debt, obligation)?;
        let repay_amount = if self.is_closing {
            borrowed
        } else {
            self.repay_amount.min(borrowed)
        };
        let buffered = apply_interest_buffer(
            repay_amount,
            estimate_obligation_interest_rate(debt, borrow, ctx.slot())?,
            ctx.config.interest_margin,
            debt.liquidity_decimals,
        )?;
        let flash_loan = FlashLoan::borrowing(debt, to_lamports_ceil(buffered, debt.liquidity_decimals)?)?;
        let repay_lamports = if self.is_closing {
            U64_MAX
        } else {
            flash_loan.borrow_amount
        };

        let mut repaid = obligation.clone();
        repaid.repay(debt.address, repay_lamports)?;
        let max_withdraw_lamports = to_lamports_floor(
            max_withdrawable_collateral(ctx.market(), &repaid, coll)?,
            coll.liquidity_decimals,
        )?;
        let quote_input_lamports = max_withdraw_lamports.min(quote_input_cap(repay_amount, coll, debt)?);

        let requested = checked_div(
            from_lamports(flash_loan.repay_amount, debt.liquidity_decimals)?,
            price,
        )?;
        let mut swap_in_lamports = to_lamports_ceil(requested, coll.liquidity_decimals)?;
        if swap_in_lamports > max_withdraw_lamports {
            ctx.observer.on_event(&MultiplyEvent::SwapInputCapped(SwapInputCapped {
                requested,
                capped: from_lamports(max_withdraw_lamports, coll.liquidity_decimals)?,
            }));
            swap_in_lamports = max_withdraw_lamports;
        }
        multiply_core::require!(swap_in_lamports > 0, MultiplyError::InvalidAmount(requested));

        let withdraw_collateral = if self.is_closing {
            U64_MAX
        } else {
            collateral_to_withdraw(coll, obligation, swap_in_lamports, ctx.slot())?
        };

        Ok(RepayWithCollateralPlan {
            repay_amount,
            flash_loan,
            repay_lamports,
            max_withdraw_lamports,
            quote_input_lamports,
            swap_in_lamports,
            withdraw_collateral,
        })
    }

    fn swap_inputs(&self, _ctx: &OperationContext, plan: &RepayWithCollateralPlan) -> MultiplyResult<SwapInputs> {
        Ok(SwapInputs {
            input_amount_lamports: plan.swap_in_lamports,
            min_out_amount_lamports: Some(plan.flash_loan.repay_amount),
            input_mint: self.collateral_mint,
            output_mint: self.debt_mint,
        })
    }

    /// Quoted for what is withdrawable, never more than the oracle cap
    fn quote_inputs(&self, _ctx: &OperationContext, plan: &RepayWithCollateralPlan) -> MultiplyResult<SwapInputs> {
        Ok(SwapInputs {
            input_amount_lamports: plan.quote_input_lamports,
            min_out_amount_lamports: None,
            input_mint: self.collateral_mint,
            output_mint: self.debt_mint,
        })
    }

    fn assemble(
        &self,
        ctx: &OperationContext,
        plan: &RepayWithCollateralPlan,
        leg: &SwapLeg,
    ) -> MultiplyResult<Assembly> {
        let (coll, debt) = ctx.planned_reserve_pair(&self.collateral_mint, &self.debt_mint)?;
        let owner = ctx.owner();
        let (mut builder, atas) = ctx.begin_bundle(SequenceLayout::default(), &[coll, debt])?;
        let (coll_ata, debt_ata) = (atas[0], atas[1]);

        let accounts = FlashLoanAccounts::new(owner, debt_ata);
        let index = builder.flash_borrow(flash_borrow_ix(debt, &accounts, plan.flash_loan.borrow_amount)?)?;

        let mut lending = LendingSequence::new(ctx.market(), ctx.obligation());
        lending.repay(debt, debt_ata, plan.repay_lamports)?;
        lending.withdraw(coll, coll_ata, plan.withdraw_collateral)?;
        let (lending_ixs, projected) = lending.finish();

        builder.extend(Stage::Lending, lending_ixs)?;
        builder.extend(Stage::Swap, leg.instructions.iter().cloned())?;
        builder.flash_repay(flash_repay_ix(debt, &accounts, plan.flash_loan.borrow_amount, index)?)?;
        if coll.is_wsol() || debt.is_wsol() {
            builder.push(Stage::Cleanup, unwrap_sol_ix(&owner))?;
        }
        let (instructions, flash_borrow_index) = builder.finish()?;

        Ok(Assembly {
            instructions,
            flash_borrow_index,
            flash_loan: plan.flash_loan,
            flash_decimals: debt.liquidity_decimals,
            projected,
            swap_in: from_lamports(plan.swap_in_lamports, coll.liquidity_decimals)?,
            swap_min_out: from_lamports(plan.flash_loan.repay_amount, debt.liquidity_decimals)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiply_core::NoopObserver;
    use rust_decimal_macros::dec;

    use crate::test_utils::{context_parts, levered_sol_usdc, RecordingObserver};

    #[test]
    fn test_partial_repay() {
        // 3 SOL / 200 USDC at $100, 75% LTV
        let (market, obligation) = levered_sol_usdc();
        let (sol, usdc) = (market.reserves[0].clone(), market.reserves[1].clone());
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        let op = RepayWithCollateral::new(sol.liquidity_mint, usdc.liquidity_mint, dec!(100), false).unwrap();
        let plan = op.plan(&ctx, dec!(100)).unwrap();
        assert_eq!(plan.flash_loan.borrow_amount, 100_100_000);
        // 99.9 USDC left: (225 - 99.9) / 0.75 / 100
        assert_eq!(plan.max_withdraw_lamports, 1_668_000_000);
        assert_eq!(plan.quote_input_lamports, 1_100_000_000);
        assert_eq!(plan.swap_in_lamports, 1_001_000_000);
        assert_eq!(plan.withdraw_collateral, 1_001_000_000);

        let quote = op.quote_inputs(&ctx, &plan).unwrap();
        assert_eq!(quote.input_amount_lamports, 1_100_000_000);
        assert_eq!(quote.min_out_amount_lamports, None);

        let assembly = op.assemble(&ctx, &plan, &SwapLeg::probe()).unwrap();
        assert_eq!(
            assembly.projected.borrow(&usdc.address).unwrap().borrowed_amount,
            dec!(99_900_000)
        );
    }

    #[test]
    fn test_swap_input_capped_at_withdrawable() {
        let (market, obligation) = levered_sol_usdc();
        let (sol, usdc) = (market.reserves[0].clone(), market.reserves[1].clone());
        let parts = context_parts(market, obligation);
        let observer = RecordingObserver::default();
        let ctx = parts.context(&observer);

        let op = RepayWithCollateral::new(sol.liquidity_mint, usdc.liquidity_mint, dec!(100), false).unwrap();
        // A quote of 50 USDC/SOL needs 2.002 SOL, only 1.668 may leave
        let plan = op.plan(&ctx, dec!(50)).unwrap();
        assert_eq!(plan.swap_in_lamports, 1_668_000_000);
        assert_eq!(
            observer.events(),
            vec![MultiplyEvent::SwapInputCapped(SwapInputCapped {
                requested: dec!(2.002),
                capped: dec!(1.668),
            })]
        );
    }

    #[test]
    fn test_close_repays_everything() {
        let (market, obligation) = levered_sol_usdc();
        let (sol, usdc) = (market.reserves[0].clone(), market.reserves[1].clone());
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        let op = RepayWithCollateral::new(sol.liquidity_mint, usdc.liquidity_mint, Decimal::ZERO, true).unwrap();
        let plan = op.plan(&ctx, dec!(100)).unwrap();
        assert_eq!(plan.repay_amount, dec!(200));
        assert_eq!(plan.repay_lamports, U64_MAX);
        assert_eq!(plan.withdraw_collateral, U64_MAX);
        assert_eq!(plan.max_withdraw_lamports, 3_000_000_000);

        let assembly = op.assemble(&ctx, &plan, &SwapLeg::probe()).unwrap();
        assert!(assembly.projected.is_empty());
    }

    #[test]
    fn test_input_errors() {
        let mint = Pubkey::new_unique();
        assert_eq!(
            RepayWithCollateral::new(mint, mint, dec!(1), false),
            Err(MultiplyError::SameMint(mint))
        );
        assert_eq!(
            RepayWithCollateral::new(mint, Pubkey::new_unique(), dec!(-1), false),
            Err(MultiplyError::InvalidAmount(dec!(-1)))
        );
    }
}
