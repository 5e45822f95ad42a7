use anchor_lang::solana_program::instruction::Instruction;
use rust_decimal::Decimal;

use multiply_core::MultiplyResult;

use crate::builder::{BundleBuilder, SequenceLayout, Stage};
use crate::calcs::{deposit_leverage_calcs, wrapped_deposit_leverage_calcs, DepositCalcs};

/// How collateral enters the obligation on a leveraged deposit.
///
/// Declared by the caller per request; never guessed from token metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollateralStrategy {
    /// Flash-borrow collateral, deposit, borrow, buy the collateral back
    #[default]
    Direct,
    /// Collateral only reachable through a swap (wrapped/derivative tokens):
    /// flash-borrow debt and swap before the deposit
    Wrapped,
}

/// Token the flash loan is taken in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashSide {
    Collateral,
    Debt,
}

impl CollateralStrategy {
    pub fn layout(&self) -> SequenceLayout {
        SequenceLayout {
            swap_before_lending: matches!(self, Self::Wrapped),
        }
    }

    pub fn flash_side(&self) -> FlashSide {
        match self {
            Self::Direct => FlashSide::Collateral,
            Self::Wrapped => FlashSide::Debt,
        }
    }

    pub fn plan(
        &self,
        amount: Decimal,
        deposit_is_collateral: bool,
        target_leverage: Decimal,
        price_debt_to_coll: Decimal,
        flash_loan_fee: Decimal,
        slippage: Decimal,
    ) -> MultiplyResult<DepositCalcs> {
        let calcs = match self {
            Self::Direct => deposit_leverage_calcs,
            Self::Wrapped => wrapped_deposit_leverage_calcs,
        };
        calcs(
            amount,
            deposit_is_collateral,
            target_leverage,
            price_debt_to_coll,
            flash_loan_fee,
            slippage,
        )
    }

    /// Append flash borrow, lending and swap steps in this strategy's order;
    /// returns the flash borrow index
    pub fn build_steps(
        &self,
        builder: &mut BundleBuilder,
        flash_borrow: Instruction,
        lending: Vec<Instruction>,
        swap: Vec<Instruction>,
    ) -> MultiplyResult<u8> {
        let index = builder.flash_borrow(flash_borrow)?;
        match self {
            Self::Direct => {
                builder.extend(Stage::Lending, lending)?;
                builder.extend(Stage::Swap, swap)?;
            }
            Self::Wrapped => {
                builder.extend(Stage::Swap, swap)?;
                builder.extend(Stage::Lending, lending)?;
            }
        }
        Ok(index)
    }
}
