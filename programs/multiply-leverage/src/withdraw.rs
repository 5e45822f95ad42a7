use anchor_lang::prelude::Pubkey;
use rust_decimal::Decimal;

use multiply_core::math::{from_lamports, to_lamports_ceil, to_lamports_floor};
use multiply_core::{estimate_obligation_interest_rate, MultiplyError, MultiplyResult, Reserve, U64_MAX};
use multiply_flash::{flash_borrow_ix, flash_repay_ix, FlashLoan, FlashLoanAccounts};
use multiply_lending::{unwrap_sol_ix, LendingSequence};

use crate::builder::{SequenceLayout, Stage};
use crate::calcs::{
    borrowed_tokens, deposited_tokens, withdraw_leverage_calcs, InterestBuffer, PositionAmounts, WithdrawCalcs,
};
use crate::pipeline::{
    collateral_to_withdraw, oracle_price, slippage_fraction, Assembly, LeverageOperation, OperationContext,
    SwapLeg,
};
use crate::types::{LeverageAction, LeverageRequest, SwapInputs};

/// Take value out at constant leverage, or close the position
#[derive(Clone, Debug, PartialEq)]
pub struct WithdrawWithLeverage {
    pub collateral_mint: Pubkey,
    pub debt_mint: Pubkey,
    pub amount: Decimal,
    pub selected_mint: Pubkey,
    pub is_closing: bool,
    pub slippage: Decimal,
    /// Requested once the withdraw has left the obligation
    pub elevation_group_target: Option<u8>,
    pub native_balance: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WithdrawPlan {
    pub calcs: WithdrawCalcs,
    pub flash_loan: FlashLoan,
    /// `U64_MAX` when closing
    pub repay_lamports: u64,
    /// Collateral tokens; `U64_MAX` when closing
    pub withdraw_collateral: u64,
    pub swap_in_lamports: u64,
}

impl WithdrawWithLeverage {
    pub fn from_request(request: &LeverageRequest) -> MultiplyResult<Self> {
        let LeverageAction::Withdraw {
            amount,
            selected_mint,
            is_closing,
        } = request.action
        else {
            return Err(MultiplyError::UnexpectedAction { expected: "withdraw" });
        };

        multiply_core::require!(
            request.collateral_mint != request.debt_mint,
            MultiplyError::SameMint(request.collateral_mint)
        );
        multiply_core::require!(
            selected_mint == request.collateral_mint || selected_mint == request.debt_mint,
            MultiplyError::UnknownMint(selected_mint)
        );
        multiply_core::require!(
            is_closing || amount > Decimal::ZERO,
            MultiplyError::InvalidAmount(amount)
        );

        Ok(Self {
            collateral_mint: request.collateral_mint,
            debt_mint: request.debt_mint,
            amount,
            selected_mint,
            is_closing,
            slippage: slippage_fraction(request.slippage_pct)?,
            elevation_group_target: request.elevation_group_target,
            native_balance: request.native_balance,
        })
    }

    fn reserves<'a>(&self, ctx: &OperationContext<'a>) -> MultiplyResult<(&'a Reserve, &'a Reserve)> {
        ctx.reserve_pair(&self.collateral_mint, &self.debt_mint)
    }
}

impl LeverageOperation for WithdrawWithLeverage {
    type Plan = WithdrawPlan;

    fn kind(&self) -> &'static str {
        if self.is_closing {
            "close_with_leverage"
        } else {
            "withdraw_with_leverage"
        }
    }

    /// Debt per collateral token
    fn oracle_price(&self, ctx: &OperationContext) -> MultiplyResult<Decimal> {
        let (coll, debt) = self.reserves(ctx)?;
        oracle_price(coll, debt)
    }

    fn plan(&self, ctx: &OperationContext, price: Decimal) -> MultiplyResult<WithdrawPlan> {
        let (coll, debt) = self.reserves(ctx)?;
        ctx.elevation_group_request(self.elevation_group_target)?;
        let obligation = ctx.obligation();
        let borrow = obligation
            .borrow(&debt.address)
            .ok_or(MultiplyError::BorrowNotFound(debt.address))?;
        let current = PositionAmounts {
            deposit: deposited_tokens(coll, obligation)?,
            borrow: borrowed_tokens(debt, obligation)?,
        };
        multiply_core::require!(
            current.deposit > Decimal::ZERO,
            MultiplyError::DepositNotFound(coll.address)
        );

        let buffer = InterestBuffer {
            accrual_ratio: estimate_obligation_interest_rate(debt, borrow, ctx.slot())?,
            margin: ctx.config.interest_margin,
            debt_decimals: debt.liquidity_decimals,
        };
        let calcs = withdraw_leverage_calcs(
            current,
            self.amount,
            self.selected_mint == self.collateral_mint,
            self.is_closing,
            price,
            debt.flash_loan_fee(),
            self.slippage,
            buffer,
        )?;

        let flash_loan = FlashLoan::borrowing(debt, to_lamports_ceil(calcs.repay, debt.liquidity_decimals)?)?;
        let withdraw_lamports = to_lamports_ceil(calcs.withdraw, coll.liquidity_decimals)?;
        let (repay_lamports, withdraw_collateral) = if self.is_closing {
            (U64_MAX, U64_MAX)
        } else {
            (
                flash_loan.borrow_amount,
                collateral_to_withdraw(coll, obligation, withdraw_lamports, ctx.slot())?,
            )
        };
        let swap_in_lamports = to_lamports_floor(calcs.swap_in, coll.liquidity_decimals)?.min(withdraw_lamports);

        Ok(WithdrawPlan {
            calcs,
            flash_loan,
            repay_lamports,
            withdraw_collateral,
            swap_in_lamports,
        })
    }

    fn swap_inputs(&self, _ctx: &OperationContext, plan: &WithdrawPlan) -> MultiplyResult<SwapInputs> {
        Ok(SwapInputs {
            input_amount_lamports: plan.swap_in_lamports,
            min_out_amount_lamports: Some(plan.flash_loan.repay_amount),
            input_mint: self.collateral_mint,
            output_mint: self.debt_mint,
        })
    }

    fn assemble(&self, ctx: &OperationContext, plan: &WithdrawPlan, leg: &SwapLeg) -> MultiplyResult<Assembly> {
        let (coll, debt) = ctx.planned_reserve_pair(&self.collateral_mint, &self.debt_mint)?;
        let owner = ctx.owner();
        let (mut builder, atas) = ctx.begin_bundle(SequenceLayout::default(), &[coll, debt])?;
        let (coll_ata, debt_ata) = (atas[0], atas[1]);

        if debt.is_wsol() {
            ctx.wrap_native_balance(&mut builder, self.native_balance)?;
        }

        let accounts = FlashLoanAccounts::new(owner, debt_ata);
        let index = builder.flash_borrow(flash_borrow_ix(debt, &accounts, plan.flash_loan.borrow_amount)?)?;

        let mut lending = LendingSequence::new(ctx.market(), ctx.obligation());
        lending.repay(debt, debt_ata, plan.repay_lamports)?;
        lending.withdraw(coll, coll_ata, plan.withdraw_collateral)?;
        if let Some(group) = ctx.elevation_group_request(self.elevation_group_target)? {
            lending.request_elevation_group(group)?;
        }
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
