//! Flash loan fee math and klend flash borrow/repay steps.
//!
//! The repay step must name the index of its borrow step inside the final
//! transaction; callers get that index from the bundle builder.

use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::{AccountMeta, Instruction};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use multiply_core::{
    encode_args, klend_instruction, lending_market_authority, optional_account,
    sysvar_instructions, MultiplyError, MultiplyResult, Reserve,
};

/// Anchor discriminators
pub const FLASH_BORROW_DISCRIMINATOR: [u8; 8] = [135, 231, 52, 167, 7, 52, 212, 193];
pub const FLASH_REPAY_DISCRIMINATOR: [u8; 8] = [185, 117, 0, 203, 96, 245, 180, 186];

// ========== FEES ==========

fn floor_to_u64(value: Decimal) -> MultiplyResult<u64> {
    value.floor().to_u64().ok_or(MultiplyError::MathOverflow)
}

/// Fee charged on top of `amount` (minimum 1 token when a fee applies)
pub fn flash_loan_fee(amount: u64, fee_rate: Decimal) -> MultiplyResult<u64> {
    if fee_rate.is_zero() || amount == 0 {
        return Ok(0);
    }

    let fee = std::cmp::max(
        floor_to_u64(
            Decimal::from(amount)
                .checked_mul(fee_rate)
                .ok_or(MultiplyError::MathOverflow)?,
        )?,
        1,
    );
    multiply_core::require!(fee < amount, MultiplyError::AmountBelowFee { amount, fee });
    Ok(fee)
}

/// Fee contained in `amount`, for when the repaid total is the fixed side
pub fn inclusive_flash_loan_fee(amount: u64, fee_rate: Decimal) -> MultiplyResult<u64> {
    if fee_rate.is_zero() || amount == 0 {
        return Ok(0);
    }

    let fee = std::cmp::max(
        floor_to_u64(
            Decimal::from(amount)
                .checked_mul(fee_rate)
                .ok_or(MultiplyError::MathOverflow)?
                .checked_div(Decimal::ONE + fee_rate)
                .ok_or(MultiplyError::MathOverflow)?,
        )?,
        1,
    );
    multiply_core::require!(fee < amount, MultiplyError::AmountBelowFee { amount, fee });
    Ok(fee)
}

/// One flash loan; `repay_amount == borrow_amount + fee` always
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashLoan {
    pub reserve: Pubkey,
    pub borrow_amount: u64,
    pub fee: u64,
    pub repay_amount: u64,
}

impl FlashLoan {
    /// Borrow a fixed amount, repay it plus the fee
    pub fn borrowing(reserve: &Reserve, borrow_amount: u64) -> MultiplyResult<Self> {
        require_flash_loans(reserve)?;
        let fee = flash_loan_fee(borrow_amount, reserve.flash_loan_fee())?;
        Self::new(reserve.address, borrow_amount, fee)
    }

    /// Repay a fixed amount, borrow it minus the contained fee
    pub fn repaying(reserve: &Reserve, repay_amount: u64) -> MultiplyResult<Self> {
        require_flash_loans(reserve)?;
        let fee = inclusive_flash_loan_fee(repay_amount, reserve.flash_loan_fee())?;
        Self::new(reserve.address, repay_amount - fee, fee)
    }

    fn new(reserve: Pubkey, borrow_amount: u64, fee: u64) -> MultiplyResult<Self> {
        let repay_amount = borrow_amount
            .checked_add(fee)
            .ok_or(MultiplyError::MathOverflow)?;
        Ok(Self {
            reserve,
            borrow_amount,
            fee,
            repay_amount,
        })
    }
}

fn require_flash_loans(reserve: &Reserve) -> MultiplyResult<()> {
    multiply_core::require!(
        reserve.flash_loans_enabled(),
        MultiplyError::FlashLoansDisabled(reserve.address)
    );
    Ok(())
}

// ========== STEPS ==========

/// User-side accounts of a flash loan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashLoanAccounts {
    pub user_transfer_authority: Pubkey,
    pub user_token_account: Pubkey,
    pub referrer_token_state: Option<Pubkey>,
    pub referrer_account: Option<Pubkey>,
}

impl FlashLoanAccounts {
    pub fn new(user_transfer_authority: Pubkey, user_token_account: Pubkey) -> Self {
        Self {
            user_transfer_authority,
            user_token_account,
            referrer_token_state: None,
            referrer_account: None,
        }
    }
}

fn flash_accounts(reserve: &Reserve, accounts: &FlashLoanAccounts) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new_readonly(accounts.user_transfer_authority, true),
        AccountMeta::new_readonly(lending_market_authority(&reserve.lending_market), false),
        AccountMeta::new_readonly(reserve.lending_market, false),
        AccountMeta::new(reserve.address, false),
        AccountMeta::new_readonly(reserve.liquidity_mint, false),
        // reserve supply (source on borrow, destination on repay)
        AccountMeta::new(reserve.liquidity_supply_vault, false),
        // user token account (destination on borrow, source on repay)
        AccountMeta::new(accounts.user_token_account, false),
        AccountMeta::new(reserve.fee_vault, false),
        optional_account(accounts.referrer_token_state, true),
        optional_account(accounts.referrer_account, true),
        AccountMeta::new_readonly(sysvar_instructions::ID, false),
        AccountMeta::new_readonly(reserve.liquidity_token_program, false),
    ]
}

pub fn flash_borrow_ix(
    reserve: &Reserve,
    accounts: &FlashLoanAccounts,
    liquidity_amount: u64,
) -> MultiplyResult<Instruction> {
    Ok(klend_instruction(
        FLASH_BORROW_DISCRIMINATOR,
        encode_args(&liquidity_amount)?,
        flash_accounts(reserve, accounts),
    ))
}

/// `borrow_instruction_index` is the position of the matching borrow step
pub fn flash_repay_ix(
    reserve: &Reserve,
    accounts: &FlashLoanAccounts,
    liquidity_amount: u64,
    borrow_instruction_index: u8,
) -> MultiplyResult<Instruction> {
    Ok(klend_instruction(
        FLASH_REPAY_DISCRIMINATOR,
        encode_args(&(liquidity_amount, borrow_instruction_index))?,
        flash_accounts(reserve, accounts),
    ))
}

/// Borrow index recorded in a flash repay step, if `ix` is one
pub fn repay_borrow_index(ix: &Instruction) -> Option<u8> {
    if ix.program_id == multiply_core::ID
        && ix.data.len() == 17
        && ix.data[..8] == FLASH_REPAY_DISCRIMINATOR
    {
        return Some(ix.data[16]);
    }
    None
}

pub fn is_flash_borrow(ix: &Instruction) -> bool {
    ix.program_id == multiply_core::ID && ix.data.len() >= 8 && ix.data[..8] == FLASH_BORROW_DISCRIMINATOR
}
