use anchor_lang::prelude::Pubkey;
use rust_decimal::Decimal;

use multiply_core::math::{checked_mul, from_lamports, to_lamports_floor};
use multiply_core::{Market, MultiplyError, MultiplyResult, Obligation, Reserve, NO_ELEVATION_GROUP, U64_MAX};
use multiply_flash::{flash_borrow_ix, flash_repay_ix, FlashLoan, FlashLoanAccounts};
use multiply_lending::{unwrap_sol_ix, LendingSequence};

use crate::builder::{SequenceLayout, Stage};
use crate::pipeline::{
    collateral_to_withdraw, oracle_price, slippage_fraction, Assembly, LeverageOperation, OperationContext,
    SwapLeg,
};
use crate::types::SwapInputs;

/// Replace (part of) one collateral with another, keeping the debt
#[derive(Clone, Debug, PartialEq)]
pub struct SwapCollateral {
    pub source_mint: Pubkey,
    pub target_mint: Pubkey,
    /// Source tokens sold
    pub source_amount: Decimal,
    pub is_closing_source: bool,
    /// Group to end up in; 0 for none
    pub new_elevation_group: u8,
    /// Fraction the swap may fall short of the quoted price
    pub slippage: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapCollateralPlan {
    pub swap_in_lamports: u64,
    /// Target lamports the quoted price promises, less slippage
    pub expected_out_lamports: u64,
    /// Collateral tokens; `U64_MAX` when closing the source
    pub withdraw_collateral: u64,
}

/// Whether depositing `target` forces the obligation out of its group first
pub fn must_remove_elevation_group_before_deposit(
    market: &Market,
    obligation: &Obligation,
    target: &Reserve,
) -> MultiplyResult<bool> {
    if obligation.deposit(&target.address).is_some() {
        return Ok(false);
    }
    let Some(group) = market.elevation_group(obligation.elevation_group)? else {
        return Ok(false);
    };
    if !group.is_eligible_collateral(&target.address) {
        return Ok(true);
    }
    Ok(obligation.deposits.len() >= group.max_reserves_as_collateral as usize)
}

/// Group to request once the source is withdrawn; `None` leaves it as is
pub fn elevation_group_after_withdraw(requested: u8, initial: u8, removed_before_deposit: bool) -> Option<u8> {
    if requested == NO_ELEVATION_GROUP {
        if initial == NO_ELEVATION_GROUP || removed_before_deposit {
            return None;
        }
        return Some(NO_ELEVATION_GROUP);
    }
    if !removed_before_deposit && initial == requested {
        return None;
    }
    Some(requested)
}

impl SwapCollateral {
    pub fn new(
        source_mint: Pubkey,
        target_mint: Pubkey,
        source_amount: Decimal,
        is_closing_source: bool,
        new_elevation_group: u8,
        slippage_pct: Decimal,
    ) -> MultiplyResult<Self> {
        multiply_core::require!(source_mint != target_mint, MultiplyError::SameMint(source_mint));
        multiply_core::require!(
            source_amount > Decimal::ZERO,
            MultiplyError::InvalidAmount(source_amount)
        );

        Ok(Self {
            source_mint,
            target_mint,
            source_amount,
            is_closing_source,
            new_elevation_group,
            slippage: slippage_fraction(slippage_pct)?,
        })
    }

    fn reserves<'a>(&self, ctx: &OperationContext<'a>) -> MultiplyResult<(&'a Reserve, &'a Reserve)> {
        ctx.reserve_pair(&self.source_mint, &self.target_mint)
    }
}

impl LeverageOperation for SwapCollateral {
    type Plan = SwapCollateralPlan;

    fn kind(&self) -> &'static str {
        "swap_collateral"
    }

    /// Target tokens per source token
    fn oracle_price(&self, ctx: &OperationContext) -> MultiplyResult<Decimal> {
        let (source, target) = self.reserves(ctx)?;
        oracle_price(source, target)
    }

    fn plan(&self, ctx: &OperationContext, price: Decimal) -> MultiplyResult<SwapCollateralPlan> {
        let (source, target) = self.reserves(ctx)?;
        ctx.market().elevation_group(self.new_elevation_group)?;

        let swap_in_lamports = to_lamports_floor(self.source_amount, source.liquidity_decimals)?;
        multiply_core::require!(
            swap_in_lamports > 0,
            MultiplyError::InvalidAmount(self.source_amount)
        );
        let withdraw_collateral = if self.is_closing_source {
            ctx.obligation()
                .deposit(&source.address)
                .ok_or(MultiplyError::DepositNotFound(source.address))?;
            U64_MAX
        } else {
            collateral_to_withdraw(source, ctx.obligation(), swap_in_lamports, ctx.slot())?
        };

        Ok(SwapCollateralPlan {
            swap_in_lamports,
            expected_out_lamports: to_lamports_floor(
                checked_mul(
                    checked_mul(self.source_amount, price)?,
                    Decimal::ONE - self.slippage,
                )?,
                target.liquidity_decimals,
            )?,
            withdraw_collateral,
        })
    }

    fn swap_inputs(&self, _ctx: &OperationContext, plan: &SwapCollateralPlan) -> MultiplyResult<SwapInputs> {
        Ok(SwapInputs {
            input_amount_lamports: plan.swap_in_lamports,
            min_out_amount_lamports: Some(plan.expected_out_lamports),
            input_mint: self.source_mint,
            output_mint: self.target_mint,
        })
    }

    fn assemble(
        &self,
        ctx: &OperationContext,
        plan: &SwapCollateralPlan,
        leg: &SwapLeg,
    ) -> MultiplyResult<Assembly> {
        let (source, target) = ctx.planned_reserve_pair(&self.source_mint, &self.target_mint)?;
        let owner = ctx.owner();
        let obligation = ctx.obligation();
        let (mut builder, atas) = ctx.begin_bundle(SequenceLayout::default(), &[source, target])?;
        let (source_ata, target_ata) = (atas[0], atas[1]);

        // The swap output repays the flash loan, fee included
        let repay_amount = to_lamports_floor(leg.out_amount, target.liquidity_decimals)?;
        multiply_core::require!(repay_amount > 0, MultiplyError::InvalidAmount(leg.out_amount));
        let flash_loan = FlashLoan::repaying(target, repay_amount)?;
        let accounts = FlashLoanAccounts::new(owner, target_ata);
        let index = builder.flash_borrow(flash_borrow_ix(target, &accounts, flash_loan.borrow_amount)?)?;

        let removes_group = must_remove_elevation_group_before_deposit(ctx.market(), obligation, target)?;
        let mut lending = LendingSequence::new(ctx.market(), obligation);
        if removes_group {
            lending.request_elevation_group(NO_ELEVATION_GROUP)?;
        }
        lending.deposit(target, target_ata, flash_loan.borrow_amount)?;
        lending.withdraw(source, source_ata, plan.withdraw_collateral)?;
        if let Some(group) =
            elevation_group_after_withdraw(self.new_elevation_group, obligation.elevation_group, removes_group)
        {
            lending.request_elevation_group(group)?;
        }
        let (lending_ixs, projected) = lending.finish();

        builder.extend(Stage::Lending, lending_ixs)?;
        builder.extend(Stage::Swap, leg.instructions.iter().cloned())?;
        builder.flash_repay(flash_repay_ix(target, &accounts, flash_loan.borrow_amount, index)?)?;
        if source.is_wsol() || target.is_wsol() {
            builder.push(Stage::Cleanup, unwrap_sol_ix(&owner))?;
        }
        let (instructions, flash_borrow_index) = builder.finish()?;

        Ok(Assembly {
            instructions,
            flash_borrow_index,
            flash_loan,
            flash_decimals: target.liquidity_decimals,
            projected,
            swap_in: from_lamports(plan.swap_in_lamports, source.liquidity_decimals)?,
            swap_min_out: from_lamports(flash_loan.repay_amount, target.liquidity_decimals)?,
        })
    }
}
