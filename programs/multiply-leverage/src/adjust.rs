use anchor_lang::prelude::Pubkey;
use rust_decimal::Decimal;

use multiply_core::math::{checked_div, checked_mul, from_lamports, to_lamports_ceil, to_lamports_floor};
use multiply_core::{MultiplyError, MultiplyResult, Reserve};
use multiply_flash::{flash_borrow_ix, flash_repay_ix, FlashLoan, FlashLoanAccounts};
use multiply_lending::{unwrap_sol_ix, LendingSequence};

use crate::builder::Stage;
use crate::calcs::{
    adjust_decrease_calcs, adjust_direction, adjust_increase_calcs, borrowed_tokens, calc_adjust_amounts,
    current_leverage, deposited_tokens, AdjustDirection, PositionAmounts,
};
use crate::pipeline::{
    collateral_to_withdraw, oracle_price, slippage_fraction, Assembly, LeverageOperation, OperationContext,
    SwapLeg,
};
use crate::strategy::{CollateralStrategy, FlashSide};
use crate::types::{LeverageAction, LeverageRequest, SwapInputs};

/// Move an open position to a new leverage
#[derive(Clone, Debug, PartialEq)]
pub struct AdjustLeverage {
    pub collateral_mint: Pubkey,
    pub debt_mint: Pubkey,
    pub target_leverage: Decimal,
    pub slippage: Decimal,
    pub elevation_group_target: Option<u8>,
    /// Shapes increases only; a decrease always sells collateral after the withdraw
    pub strategy: CollateralStrategy,
    pub native_balance: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AdjustPlan {
    /// Direct: flash-borrow collateral, deposit, borrow debt, buy collateral back.
    /// Wrapped: flash-borrow debt, buy collateral, deposit, borrow to repay.
    Increase {
        flash_loan: FlashLoan,
        deposit_lamports: u64,
        borrow_lamports: u64,
        swap_in_lamports: u64,
        swap_min_out_lamports: u64,
    },
    /// Flash-borrow debt, repay, withdraw collateral, sell it for debt
    Decrease {
        flash_loan: FlashLoan,
        withdraw_lamports: u64,
        withdraw_collateral: u64,
    },
}

impl AdjustLeverage {
    pub fn from_request(request: &LeverageRequest) -> MultiplyResult<Self> {
        let LeverageAction::Adjust { target_leverage } = request.action else {
            return Err(MultiplyError::UnexpectedAction { expected: "adjust" });
        };
        multiply_core::require!(
            request.collateral_mint != request.debt_mint,
            MultiplyError::SameMint(request.collateral_mint)
        );

        Ok(Self {
            collateral_mint: request.collateral_mint,
            debt_mint: request.debt_mint,
            target_leverage,
            slippage: slippage_fraction(request.slippage_pct)?,
            elevation_group_target: request.elevation_group_target,
            strategy: request.strategy,
            native_balance: request.native_balance,
        })
    }

    fn reserves<'a>(&self, ctx: &OperationContext<'a>) -> MultiplyResult<(&'a Reserve, &'a Reserve)> {
        ctx.reserve_pair(&self.collateral_mint, &self.debt_mint)
    }

    fn current(&self, ctx: &OperationContext) -> MultiplyResult<PositionAmounts> {
        let (coll, debt) = self.reserves(ctx)?;
        let obligation = ctx.obligation();
        multiply_core::require!(
            obligation.deposit(&coll.address).is_some(),
            MultiplyError::DepositNotFound(coll.address)
        );
        Ok(PositionAmounts {
            deposit: deposited_tokens(coll, obligation)?,
            borrow: borrowed_tokens(debt, obligation)?,
        })
    }

    /// Reserve an increase flash-borrows from
    fn increase_flash_reserve<'a>(&self, coll: &'a Reserve, debt: &'a Reserve) -> &'a Reserve {
        match self.strategy.flash_side() {
            FlashSide::Collateral => coll,
            FlashSide::Debt => debt,
        }
    }

    /// Deltas and direction at `price_coll_to_debt`
    fn deltas(
        &self,
        ctx: &OperationContext,
        price_coll_to_debt: Decimal,
    ) -> MultiplyResult<(AdjustDirection, PositionAmounts)> {
        let (coll, debt) = self.reserves(ctx)?;
        let current = self.current(ctx)?;
        let leverage = current_leverage(current.deposit, current.borrow, price_coll_to_debt)?;

        // Fee of the reserve the flash loan would come from
        let fee = if self.target_leverage > leverage {
            self.increase_flash_reserve(coll, debt).flash_loan_fee()
        } else {
            debt.flash_loan_fee()
        };

        let deltas = calc_adjust_amounts(
            current.deposit,
            current.borrow,
            self.target_leverage,
            price_coll_to_debt,
            fee,
        )?;
        let direction = adjust_direction(deltas, self.target_leverage, leverage)?;
        Ok((direction, deltas))
    }

    /// Direction at oracle prices; fixes how the quoted price is read
    fn direction(&self, ctx: &OperationContext) -> MultiplyResult<AdjustDirection> {
        let (coll, debt) = self.reserves(ctx)?;
        Ok(self.deltas(ctx, oracle_price(coll, debt)?)?.0)
    }

    fn increase(
        &self,
        coll: &Reserve,
        debt: &Reserve,
        deposit_delta: Decimal,
        price_debt_to_coll: Decimal,
    ) -> MultiplyResult<AdjustPlan> {
        match self.strategy {
            CollateralStrategy::Direct => {
                let calcs =
                    adjust_increase_calcs(deposit_delta, price_debt_to_coll, coll.flash_loan_fee(), self.slippage)?;
                let flash_loan =
                    FlashLoan::borrowing(coll, to_lamports_ceil(calcs.deposit, coll.liquidity_decimals)?)?;
                let borrow_lamports = to_lamports_ceil(calcs.borrow, debt.liquidity_decimals)?;
                Ok(AdjustPlan::Increase {
                    flash_loan,
                    deposit_lamports: flash_loan.borrow_amount,
                    borrow_lamports,
                    swap_in_lamports: borrow_lamports,
                    swap_min_out_lamports: flash_loan.repay_amount,
                })
            }
            CollateralStrategy::Wrapped => {
                // Debt sold up front; the new borrow covers the flash repay
                let swap_in = checked_div(
                    checked_mul(deposit_delta, Decimal::ONE + self.slippage)?,
                    price_debt_to_coll,
                )?;
                let flash_loan = FlashLoan::borrowing(debt, to_lamports_ceil(swap_in, debt.liquidity_decimals)?)?;
                let deposit_lamports = to_lamports_floor(deposit_delta, coll.liquidity_decimals)?;
                Ok(AdjustPlan::Increase {
                    flash_loan,
                    deposit_lamports,
                    borrow_lamports: flash_loan.repay_amount,
                    swap_in_lamports: flash_loan.borrow_amount,
                    swap_min_out_lamports: deposit_lamports,
                })
            }
        }
    }
}

impl LeverageOperation for AdjustLeverage {
    type Plan = AdjustPlan;

    fn kind(&self) -> &'static str {
        "adjust_leverage"
    }

    /// Collateral per debt when increasing, debt per collateral when decreasing
    fn oracle_price(&self, ctx: &OperationContext) -> MultiplyResult<Decimal> {
        let (coll, debt) = self.reserves(ctx)?;
        match self.direction(ctx)? {
            AdjustDirection::Increase => oracle_price(debt, coll),
            AdjustDirection::Decrease => oracle_price(coll, debt),
        }
    }

    fn plan(&self, ctx: &OperationContext, price: Decimal) -> MultiplyResult<AdjustPlan> {
        let (coll, debt) = self.reserves(ctx)?;
        ctx.elevation_group_request(self.elevation_group_target)?;
        let expected = self.direction(ctx)?;
        let price_coll_to_debt = match expected {
            AdjustDirection::Increase => checked_div(Decimal::ONE, price)?,
            AdjustDirection::Decrease => price,
        };
        let (direction, deltas) = self.deltas(ctx, price_coll_to_debt)?;
        multiply_core::require!(
            direction == expected,
            MultiplyError::MixedAdjustDirection {
                deposit_delta: deltas.deposit,
                borrow_delta: deltas.borrow,
            }
        );

        match direction {
            AdjustDirection::Increase => self.increase(coll, debt, deltas.deposit, price),
            AdjustDirection::Decrease => {
                let calcs = adjust_decrease_calcs(
                    deltas.deposit.abs(),
                    deltas.borrow.abs(),
                    debt.flash_loan_fee(),
                    self.slippage,
                )?;
                let flash_loan =
                    FlashLoan::borrowing(debt, to_lamports_ceil(calcs.repay, debt.liquidity_decimals)?)?;
                let withdraw_lamports = to_lamports_ceil(calcs.withdraw, coll.liquidity_decimals)?;
                // Earlier slot: less accrued interest, so slightly more collateral per token
                let slot = ctx.slot().saturating_sub(ctx.config.withdraw_slot_offset);
                Ok(AdjustPlan::Decrease {
                    flash_loan,
                    withdraw_lamports,
                    withdraw_collateral: collateral_to_withdraw(coll, ctx.obligation(), withdraw_lamports, slot)?,
                })
            }
        }
    }

    fn swap_inputs(&self, _ctx: &OperationContext, plan: &AdjustPlan) -> MultiplyResult<SwapInputs> {
        Ok(match plan {
            AdjustPlan::Increase {
                swap_in_lamports,
                swap_min_out_lamports,
                ..
            } => SwapInputs {
                input_amount_lamports: *swap_in_lamports,
                min_out_amount_lamports: Some(*swap_min_out_lamports),
                input_mint: self.debt_mint,
                output_mint: self.collateral_mint,
            },
            AdjustPlan::Decrease {
                flash_loan,
                withdraw_lamports,
                ..
            } => SwapInputs {
                input_amount_lamports: *withdraw_lamports,
                min_out_amount_lamports: Some(flash_loan.repay_amount),
                input_mint: self.collateral_mint,
                output_mint: self.debt_mint,
            },
        })
    }

    fn assemble(&self, ctx: &OperationContext, plan: &AdjustPlan, leg: &SwapLeg) -> MultiplyResult<Assembly> {
        let (coll, debt) = ctx.planned_reserve_pair(&self.collateral_mint, &self.debt_mint)?;
        let owner = ctx.owner();
        let strategy = match plan {
            AdjustPlan::Increase { .. } => self.strategy,
            AdjustPlan::Decrease { .. } => CollateralStrategy::Direct,
        };
        let (mut builder, atas) = ctx.begin_bundle(strategy.layout(), &[coll, debt])?;
        let (coll_ata, debt_ata) = (atas[0], atas[1]);
        let mut lending = LendingSequence::new(ctx.market(), ctx.obligation());
        let elevation_group = ctx.elevation_group_request(self.elevation_group_target)?;

        let (flash_reserve, flash_loan, flash_ata, swap_in, min_out) = match plan {
            AdjustPlan::Increase {
                flash_loan,
                deposit_lamports,
                borrow_lamports,
                swap_in_lamports,
                swap_min_out_lamports,
            } => {
                lending.deposit(coll, coll_ata, *deposit_lamports)?;
                // Before the borrow so it is checked against the group's LTV
                if let Some(group) = elevation_group {
                    lending.request_elevation_group(group)?;
                }
                lending.borrow(debt, debt_ata, *borrow_lamports)?;
                let flash_reserve = self.increase_flash_reserve(coll, debt);
                let flash_ata = if flash_reserve.address == coll.address { coll_ata } else { debt_ata };
                (
                    flash_reserve,
                    *flash_loan,
                    flash_ata,
                    from_lamports(*swap_in_lamports, debt.liquidity_decimals)?,
                    from_lamports(*swap_min_out_lamports, coll.liquidity_decimals)?,
                )
            }
            AdjustPlan::Decrease {
                flash_loan,
                withdraw_lamports,
                withdraw_collateral,
            } => {
                if debt.is_wsol() {
                    ctx.wrap_native_balance(&mut builder, self.native_balance)?;
                }
                lending.repay(debt, debt_ata, flash_loan.borrow_amount)?;
                lending.withdraw(coll, coll_ata, *withdraw_collateral)?;
                if let Some(group) = elevation_group {
                    lending.request_elevation_group(group)?;
                }
                (
                    debt,
                    *flash_loan,
                    debt_ata,
                    from_lamports(*withdraw_lamports, coll.liquidity_decimals)?,
                    from_lamports(flash_loan.repay_amount, debt.liquidity_decimals)?,
                )
            }
        };
        let (lending_ixs, projected) = lending.finish();

        let accounts = FlashLoanAccounts::new(owner, flash_ata);
        let index = strategy.build_steps(
            &mut builder,
            flash_borrow_ix(flash_reserve, &accounts, flash_loan.borrow_amount)?,
            lending_ixs,
            leg.instructions.clone(),
        )?;
        builder.flash_repay(flash_repay_ix(flash_reserve, &accounts, flash_loan.borrow_amount, index)?)?;
        if matches!(plan, AdjustPlan::Decrease { .. }) && (coll.is_wsol() || debt.is_wsol()) {
            builder.push(Stage::Cleanup, unwrap_sol_ix(&owner))?;
        }
        let (instructions, flash_borrow_index) = builder.finish()?;

        Ok(Assembly {
            instructions,
            flash_borrow_index,
            flash_loan,
            flash_decimals: flash_reserve.liquidity_decimals,
            projected,
            swap_in,
            swap_min_out: min_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiply_core::{ErrorKind, NoopObserver};
    use multiply_lending::{BORROW_DISCRIMINATOR, DEPOSIT_DISCRIMINATOR, REQUEST_ELEVATION_GROUP_DISCRIMINATOR};
    use rust_decimal_macros::dec;

    use crate::test_utils::{context_parts, levered_sol_usdc, settled_leg};

    fn request(market: &multiply_core::Market, target_leverage: Decimal) -> LeverageRequest {
        LeverageRequest {
            collateral_mint: market.reserves[0].liquidity_mint,
            debt_mint: market.reserves[1].liquidity_mint,
            action: LeverageAction::Adjust { target_leverage },
            slippage_pct: Decimal::ZERO,
            elevation_group_target: None,
            strategy: Default::default(),
            native_balance: 1_000_000_000,
        }
    }

    fn op(market: &multiply_core::Market, target_leverage: Decimal) -> AdjustLeverage {
        AdjustLeverage::from_request(&request(market, target_leverage)).unwrap()
    }

    fn position(assembly: &Assembly, discriminator: &[u8; 8]) -> Option<usize> {
        assembly
            .instructions
            .iter()
            .position(|ix| ix.data.starts_with(discriminator))
    }

    #[test]
    fn test_increase() {
        // 3 SOL / 200 USDC at $100: 3x on 1 SOL net
        let (market, obligation) = levered_sol_usdc();
        let sol = market.reserves[0].clone();
        let op = op(&market, dec!(4));
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        assert_eq!(op.oracle_price(&ctx).unwrap(), dec!(0.01));
        let plan = op.plan(&ctx, dec!(0.01)).unwrap();
        let AdjustPlan::Increase {
            flash_loan,
            deposit_lamports,
            borrow_lamports,
            ..
        } = plan.clone()
        else {
            panic!("expected increase");
        };
        // 1 more SOL, 100 more USDC
        assert_eq!(flash_loan.borrow_amount, 1_000_000_000);
        assert_eq!(deposit_lamports, 1_000_000_000);
        assert_eq!(borrow_lamports, 100_000_000);

        let assembly = op.assemble(&ctx, &plan, &SwapLeg::probe()).unwrap();
        assert_eq!(
            assembly.projected.deposit(&sol.address).unwrap().deposited_amount,
            4_000_000_000
        );
    }

    #[test]
    fn test_decrease() {
        let (market, obligation) = levered_sol_usdc();
        let op = op(&market, dec!(2));
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        assert_eq!(op.oracle_price(&ctx).unwrap(), dec!(100));
        let plan = op.plan(&ctx, dec!(100)).unwrap();
        let AdjustPlan::Decrease {
            flash_loan,
            withdraw_lamports,
            withdraw_collateral,
        } = plan.clone()
        else {
            panic!("expected decrease");
        };
        assert_eq!(flash_loan.borrow_amount, 100_000_000);
        assert_eq!(withdraw_lamports, 1_000_000_000);
        assert_eq!(withdraw_collateral, 1_000_000_000);

        let assembly = op.assemble(&ctx, &plan, &SwapLeg::probe()).unwrap();
        // Collateral is SOL: wSOL closed at the end
        assert_eq!(assembly.instructions.last().unwrap().data, vec![9]);
    }

    #[test]
    fn test_invalid_targets() {
        let (market, obligation) = levered_sol_usdc();
        let parts = context_parts(market.clone(), obligation);
        let ctx = parts.context(&NoopObserver);

        assert!(matches!(
            op(&market, dec!(3)).oracle_price(&ctx),
            Err(MultiplyError::InvalidLeverage { .. })
        ));
        assert!(matches!(
            op(&market, dec!(1)).oracle_price(&ctx),
            Err(MultiplyError::InvalidLeverage { .. })
        ));
    }

    #[test]
    fn test_wrapped_increase_swaps_before_deposit() {
        let (market, obligation) = levered_sol_usdc();
        let (sol, usdc) = (market.reserves[0].clone(), market.reserves[1].clone());
        let op = AdjustLeverage::from_request(&LeverageRequest {
            strategy: CollateralStrategy::Wrapped,
            ..request(&market, dec!(4))
        })
        .unwrap();
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        let plan = op.plan(&ctx, dec!(0.01)).unwrap();
        let AdjustPlan::Increase {
            flash_loan,
            deposit_lamports,
            borrow_lamports,
            swap_in_lamports,
            swap_min_out_lamports,
        } = plan.clone()
        else {
            panic!("expected increase");
        };
        // 100 USDC flash borrowed and sold for the extra SOL
        assert_eq!(flash_loan.borrow_amount, 100_000_000);
        assert_eq!(swap_in_lamports, 100_000_000);
        assert_eq!(swap_min_out_lamports, 1_000_000_000);
        assert_eq!(deposit_lamports, 1_000_000_000);
        assert_eq!(borrow_lamports, flash_loan.repay_amount);

        let swap = SwapLeg {
            instructions: vec![anchor_lang::solana_program::instruction::Instruction {
                program_id: Pubkey::new_unique(),
                accounts: vec![],
                data: vec![42],
            }],
            out_amount: dec!(1),
        };
        let assembly = op.assemble(&ctx, &plan, &swap).unwrap();
        assert_eq!(assembly.flash_decimals, usdc.liquidity_decimals);
        assert_eq!(
            assembly.projected.deposit(&sol.address).unwrap().deposited_amount,
            4_000_000_000
        );
        let swap_at = assembly.instructions.iter().position(|ix| ix.data == vec![42]).unwrap();
        let deposit_at = position(&assembly, &DEPOSIT_DISCRIMINATOR).unwrap();
        assert!(assembly.flash_borrow_index as usize <= swap_at);
        assert!(swap_at < deposit_at);
    }

    #[test]
    fn test_increase_requests_elevation_group_before_borrow() {
        let (market, obligation) = levered_sol_usdc();
        let op = AdjustLeverage::from_request(&LeverageRequest {
            elevation_group_target: Some(1),
            ..request(&market, dec!(4))
        })
        .unwrap();
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        let plan = op.plan(&ctx, dec!(0.01)).unwrap();
        let assembly = op.assemble(&ctx, &plan, &settled_leg(dec!(1))).unwrap();
        assert_eq!(assembly.projected.elevation_group, 1);
        let request_group = position(&assembly, &REQUEST_ELEVATION_GROUP_DISCRIMINATOR).unwrap();
        assert!(position(&assembly, &DEPOSIT_DISCRIMINATOR).unwrap() < request_group);
        assert!(request_group < position(&assembly, &BORROW_DISCRIMINATOR).unwrap());
    }

    #[test]
    fn test_decrease_requests_elevation_group() {
        let (market, obligation) = levered_sol_usdc();
        let op = AdjustLeverage::from_request(&LeverageRequest {
            elevation_group_target: Some(1),
            ..request(&market, dec!(2))
        })
        .unwrap();
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        let plan = op.plan(&ctx, dec!(100)).unwrap();
        let assembly = op.assemble(&ctx, &plan, &settled_leg(dec!(1))).unwrap();
        assert_eq!(assembly.projected.elevation_group, 1);
        assert!(position(&assembly, &REQUEST_ELEVATION_GROUP_DISCRIMINATOR).is_some());
    }

    #[test]
    fn test_unknown_elevation_group_target_rejected() {
        let (market, obligation) = levered_sol_usdc();
        let op = AdjustLeverage::from_request(&LeverageRequest {
            elevation_group_target: Some(200),
            ..request(&market, dec!(2))
        })
        .unwrap();
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        let err = op.plan(&ctx, dec!(100)).unwrap_err();
        assert_eq!(err, MultiplyError::UnknownElevationGroup(200));
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_rejects_other_actions() {
        let (market, _) = levered_sol_usdc();
        let request = LeverageRequest {
            action: LeverageAction::Withdraw {
                amount: dec!(1),
                selected_mint: market.reserves[0].liquidity_mint,
                is_closing: false,
            },
            ..request(&market, dec!(2))
        };
        assert_eq!(
            AdjustLeverage::from_request(&request),
            Err(MultiplyError::UnexpectedAction { expected: "adjust" })
        );
    }
}
