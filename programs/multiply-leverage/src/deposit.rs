use anchor_lang::prelude::Pubkey;
use rust_decimal::Decimal;

use multiply_core::math::{from_lamports, to_lamports_ceil, to_lamports_floor};
use multiply_core::{MultiplyError, MultiplyResult, Reserve};
use multiply_flash::{flash_borrow_ix, flash_repay_ix, FlashLoan, FlashLoanAccounts};
use multiply_lending::{wrap_sol_ixs, LendingSequence};

use crate::builder::Stage;
use crate::calcs::DepositCalcs;
use crate::pipeline::{oracle_price, slippage_fraction, Assembly, LeverageOperation, OperationContext, SwapLeg};
use crate::strategy::{CollateralStrategy, FlashSide};
use crate::types::{LeverageAction, LeverageRequest, SwapInputs};

/// Open or add to a leveraged position
#[derive(Clone, Debug, PartialEq)]
pub struct DepositWithLeverage {
    pub collateral_mint: Pubkey,
    pub debt_mint: Pubkey,
    pub amount: Decimal,
    pub selected_mint: Pubkey,
    pub target_leverage: Decimal,
    pub slippage: Decimal,
    pub elevation_group_target: Option<u8>,
    pub strategy: CollateralStrategy,
}

/// Lamport amounts of one deposit pass
#[derive(Clone, Debug, PartialEq)]
pub struct DepositPlan {
    pub calcs: DepositCalcs,
    pub flash_loan: FlashLoan,
    /// User's own tokens, in the selected mint
    pub user_lamports: u64,
    pub deposit_lamports: u64,
    pub borrow_lamports: u64,
    pub swap_in_lamports: u64,
    pub swap_min_out_lamports: u64,
}

impl DepositWithLeverage {
    pub fn from_request(request: &LeverageRequest) -> MultiplyResult<Self> {
        let LeverageAction::Deposit {
            amount,
            selected_mint,
            target_leverage,
        } = request.action
        else {
            return Err(MultiplyError::UnexpectedAction { expected: "deposit" });
        };

        multiply_core::require!(
            request.collateral_mint != request.debt_mint,
            MultiplyError::SameMint(request.collateral_mint)
        );
        multiply_core::require!(
            selected_mint == request.collateral_mint || selected_mint == request.debt_mint,
            MultiplyError::UnknownMint(selected_mint)
        );
        multiply_core::require!(amount > Decimal::ZERO, MultiplyError::InvalidAmount(amount));

        Ok(Self {
            collateral_mint: request.collateral_mint,
            debt_mint: request.debt_mint,
            amount,
            selected_mint,
            target_leverage,
            slippage: slippage_fraction(request.slippage_pct)?,
            elevation_group_target: request.elevation_group_target,
            strategy: request.strategy,
        })
    }

    fn deposit_is_collateral(&self) -> bool {
        self.selected_mint == self.collateral_mint
    }

    fn reserves<'a>(&self, ctx: &OperationContext<'a>) -> MultiplyResult<(&'a Reserve, &'a Reserve)> {
        ctx.reserve_pair(&self.collateral_mint, &self.debt_mint)
    }
}

impl LeverageOperation for DepositWithLeverage {
    type Plan = DepositPlan;

    fn kind(&self) -> &'static str {
        "deposit_with_leverage"
    }

    /// Collateral per debt token
    fn oracle_price(&self, ctx: &OperationContext) -> MultiplyResult<Decimal> {
        let (coll, debt) = self.reserves(ctx)?;
        oracle_price(debt, coll)
    }

    fn plan(&self, ctx: &OperationContext, price: Decimal) -> MultiplyResult<DepositPlan> {
        let (coll, debt) = self.reserves(ctx)?;
        ctx.elevation_group_request(self.elevation_group_target)?;
        let flash_reserve = match self.strategy.flash_side() {
            FlashSide::Collateral => coll,
            FlashSide::Debt => debt,
        };
        let deposit_is_collateral = self.deposit_is_collateral();
        let calcs = self.strategy.plan(
            self.amount,
            deposit_is_collateral,
            self.target_leverage,
            price,
            flash_reserve.flash_loan_fee(),
            self.slippage,
        )?;

        let selected = if deposit_is_collateral { coll } else { debt };
        let user_lamports = to_lamports_floor(self.amount, selected.liquidity_decimals)?;
        let flash_loan = FlashLoan::borrowing(
            flash_reserve,
            to_lamports_ceil(calcs.flash_borrow, flash_reserve.liquidity_decimals)?,
        )?;
        let user_debt = if deposit_is_collateral { 0 } else { user_lamports };
        let user_coll = if deposit_is_collateral { user_lamports } else { 0 };

        let plan = match self.strategy {
            CollateralStrategy::Direct => {
                let borrow_lamports = to_lamports_ceil(calcs.borrow, debt.liquidity_decimals)?;
                DepositPlan {
                    calcs,
                    flash_loan,
                    user_lamports,
                    deposit_lamports: flash_loan.borrow_amount + user_coll,
                    borrow_lamports,
                    swap_in_lamports: borrow_lamports + user_debt,
                    swap_min_out_lamports: flash_loan.repay_amount,
                }
            }
            CollateralStrategy::Wrapped => {
                let bought = to_lamports_floor(calcs.swap_min_out, coll.liquidity_decimals)?;
                DepositPlan {
                    calcs,
                    flash_loan,
                    user_lamports,
                    deposit_lamports: bought + user_coll,
                    borrow_lamports: flash_loan.repay_amount,
                    swap_in_lamports: flash_loan.borrow_amount + user_debt,
                    swap_min_out_lamports: bought,
                }
            }
        };
        Ok(plan)
    }

    fn swap_inputs(&self, _ctx: &OperationContext, plan: &DepositPlan) -> MultiplyResult<SwapInputs> {
        Ok(SwapInputs {
            input_amount_lamports: plan.swap_in_lamports,
            min_out_amount_lamports: Some(plan.swap_min_out_lamports),
            input_mint: self.debt_mint,
            output_mint: self.collateral_mint,
        })
    }

    fn assemble(&self, ctx: &OperationContext, plan: &DepositPlan, leg: &SwapLeg) -> MultiplyResult<Assembly> {
        let (coll, debt) = ctx.planned_reserve_pair(&self.collateral_mint, &self.debt_mint)?;
        let owner = ctx.owner();
        let (mut builder, atas) = ctx.begin_bundle(self.strategy.layout(), &[coll, debt])?;
        let (coll_ata, debt_ata) = (atas[0], atas[1]);

        let selected = if self.deposit_is_collateral() { coll } else { debt };
        if selected.is_wsol() {
            builder.extend(Stage::Wrap, wrap_sol_ixs(&owner, plan.user_lamports))?;
        }

        let (flash_reserve, flash_ata) = match self.strategy.flash_side() {
            FlashSide::Collateral => (coll, coll_ata),
            FlashSide::Debt => (debt, debt_ata),
        };
        let accounts = FlashLoanAccounts::new(owner, flash_ata);

        let mut lending = LendingSequence::new(ctx.market(), ctx.obligation());
        lending.deposit(coll, coll_ata, plan.deposit_lamports)?;
        if let Some(group) = ctx.elevation_group_request(self.elevation_group_target)? {
            lending.request_elevation_group(group)?;
        }
        lending.borrow(debt, debt_ata, plan.borrow_lamports)?;
        let (lending_ixs, projected) = lending.finish();

        let index = self.strategy.build_steps(
            &mut builder,
            flash_borrow_ix(flash_reserve, &accounts, plan.flash_loan.borrow_amount)?,
            lending_ixs,
            leg.instructions.clone(),
        )?;
        builder.flash_repay(flash_repay_ix(
            flash_reserve,
            &accounts,
            plan.flash_loan.borrow_amount,
            index,
        )?)?;
        let (instructions, flash_borrow_index) = builder.finish()?;

        Ok(Assembly {
            instructions,
            flash_borrow_index,
            flash_loan: plan.flash_loan,
            flash_decimals: flash_reserve.liquidity_decimals,
            projected,
            swap_in: from_lamports(plan.swap_in_lamports, debt.liquidity_decimals)?,
            swap_min_out: from_lamports(plan.swap_min_out_lamports, coll.liquidity_decimals)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiply_core::{NoopObserver, U64_MAX};
    use multiply_flash::{is_flash_borrow, repay_borrow_index};
    use multiply_lending::{BORROW_DISCRIMINATOR, DEPOSIT_DISCRIMINATOR, REQUEST_ELEVATION_GROUP_DISCRIMINATOR};
    use rust_decimal_macros::dec;

    use crate::test_utils::{context_parts, sol_usdc_market, with_flash_fee};

    fn request(selected: Pubkey, coll: Pubkey, debt: Pubkey, strategy: CollateralStrategy) -> LeverageRequest {
        LeverageRequest {
            collateral_mint: coll,
            debt_mint: debt,
            action: LeverageAction::Deposit {
                amount: dec!(10),
                selected_mint: selected,
                target_leverage: dec!(3),
            },
            slippage_pct: dec!(0.5),
            elevation_group_target: None,
            strategy,
            native_balance: 0,
        }
    }

    #[test]
    fn test_request_validation() {
        let (market, _) = sol_usdc_market();
        let (sol, usdc) = (market.reserves[0].liquidity_mint, market.reserves[1].liquidity_mint);

        let mut same = request(sol, sol, usdc, CollateralStrategy::Direct);
        same.debt_mint = sol;
        assert_eq!(DepositWithLeverage::from_request(&same), Err(MultiplyError::SameMint(sol)));

        let stranger = Pubkey::new_unique();
        assert_eq!(
            DepositWithLeverage::from_request(&request(stranger, sol, usdc, CollateralStrategy::Direct)),
            Err(MultiplyError::UnknownMint(stranger))
        );

        let mut slippage = request(sol, sol, usdc, CollateralStrategy::Direct);
        slippage.slippage_pct = dec!(-1);
        assert_eq!(
            DepositWithLeverage::from_request(&slippage),
            Err(MultiplyError::InvalidSlippage(dec!(-1)))
        );
    }

    #[test]
    fn test_direct_deposit_bundle() {
        let (mut market, obligation) = sol_usdc_market();
        with_flash_fee(&mut market.reserves[0], dec!(0.001));
        let (sol, usdc) = (market.reserves[0].clone(), market.reserves[1].clone());
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        let op = DepositWithLeverage::from_request(&request(
            sol.liquidity_mint,
            sol.liquidity_mint,
            usdc.liquidity_mint,
            CollateralStrategy::Direct,
        ))
        .unwrap();

        // 100 USDC per SOL
        let plan = op.plan(&ctx, dec!(0.01)).unwrap();
        assert_eq!(plan.deposit_lamports, plan.flash_loan.borrow_amount + 10_000_000_000);
        assert_eq!(plan.swap_min_out_lamports, plan.flash_loan.repay_amount);
        assert_eq!(plan.flash_loan.borrow_amount + plan.flash_loan.fee, plan.flash_loan.repay_amount);

        let assembly = op.assemble(&ctx, &plan, &SwapLeg::probe()).unwrap();
        let ixs = &assembly.instructions;
        // budget, 2 ATAs, wSOL wrap (transfer + sync)
        assert_eq!(assembly.flash_borrow_index, 5);
        assert!(is_flash_borrow(&ixs[5]));
        let repay = ixs.last().unwrap();
        assert_eq!(repay_borrow_index(repay), Some(5));
        assert!(ixs.iter().any(|ix| ix.data.starts_with(&DEPOSIT_DISCRIMINATOR)));
        assert!(ixs.iter().any(|ix| ix.data.starts_with(&BORROW_DISCRIMINATOR)));

        let projected = assembly.projected;
        assert!(projected.deposit(&sol.address).is_some());
        assert!(projected.borrow(&usdc.address).is_some());
        assert_ne!(plan.borrow_lamports, U64_MAX);
    }

    #[test]
    fn test_wrapped_deposit_swaps_first() {
        let (market, obligation) = sol_usdc_market();
        let (sol, usdc) = (market.reserves[0].clone(), market.reserves[1].clone());
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        let op = DepositWithLeverage::from_request(&request(
            usdc.liquidity_mint,
            sol.liquidity_mint,
            usdc.liquidity_mint,
            CollateralStrategy::Wrapped,
        ))
        .unwrap();
        let plan = op.plan(&ctx, dec!(0.01)).unwrap();
        // Flash loan in USDC, repaid from the borrow
        assert_eq!(plan.flash_loan.reserve, usdc.address);
        assert_eq!(plan.borrow_lamports, plan.flash_loan.repay_amount);
        assert_eq!(plan.swap_in_lamports, plan.flash_loan.borrow_amount + 10_000_000);

        let leg = SwapLeg {
            instructions: vec![anchor_lang::solana_program::instruction::Instruction {
                program_id: Pubkey::new_unique(),
                accounts: vec![],
                data: vec![42],
            }],
            out_amount: dec!(0.3),
        };
        let assembly = op.assemble(&ctx, &plan, &leg).unwrap();
        let index = assembly.flash_borrow_index as usize;
        // No wrap: budget + 2 ATAs
        assert_eq!(index, 3);
        assert_eq!(assembly.instructions[index + 1].data, vec![42]);
    }

    #[test]
    fn test_elevation_group_requested_between_deposit_and_borrow() {
        let (market, obligation) = sol_usdc_market();
        let (sol, usdc) = (market.reserves[0].clone(), market.reserves[1].clone());
        let parts = context_parts(market, obligation);
        let ctx = parts.context(&NoopObserver);

        let mut req = request(
            sol.liquidity_mint,
            sol.liquidity_mint,
            usdc.liquidity_mint,
            CollateralStrategy::Direct,
        );
        req.elevation_group_target = Some(1);
        let op = DepositWithLeverage::from_request(&req).unwrap();
        let plan = op.plan(&ctx, dec!(0.01)).unwrap();
        let assembly = op.assemble(&ctx, &plan, &SwapLeg::probe()).unwrap();

        let position = |discriminator: &[u8; 8]| {
            assembly
                .instructions
                .iter()
                .position(|ix| ix.data.starts_with(discriminator))
                .unwrap()
        };
        let deposit = position(&DEPOSIT_DISCRIMINATOR);
        let request_group = position(&REQUEST_ELEVATION_GROUP_DISCRIMINATOR);
        let borrow = position(&BORROW_DISCRIMINATOR);
        assert!(deposit < request_group && request_group < borrow);
        assert_eq!(assembly.projected.elevation_group, 1);
    }
}
