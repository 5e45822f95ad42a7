//! klend obligation instructions with their exact account orders.

use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::{AccountMeta, Instruction};

use multiply_core::{
    encode_args, klend_instruction, lending_market_authority, optional_account,
    sysvar_instructions, MultiplyResult, Obligation, Reserve,
};

// ========== DISCRIMINATORS ==========

pub const REFRESH_RESERVE_DISCRIMINATOR: [u8; 8] = [2, 218, 138, 235, 79, 201, 25, 102];
pub const REFRESH_OBLIGATION_DISCRIMINATOR: [u8; 8] = [33, 132, 147, 228, 151, 192, 72, 89];
pub const DEPOSIT_DISCRIMINATOR: [u8; 8] = [129, 199, 4, 2, 222, 39, 26, 46];
pub const BORROW_DISCRIMINATOR: [u8; 8] = [121, 127, 18, 204, 73, 245, 225, 65];
pub const REPAY_DISCRIMINATOR: [u8; 8] = [145, 178, 13, 225, 76, 240, 147, 72];
pub const WITHDRAW_DISCRIMINATOR: [u8; 8] = [75, 93, 93, 220, 34, 150, 218, 196];
pub const REQUEST_ELEVATION_GROUP_DISCRIMINATOR: [u8; 8] = [36, 119, 251, 129, 34, 240, 7, 147];

// ========== REFRESH ==========

pub fn refresh_reserve_ix(reserve: &Reserve) -> Instruction {
    let oracles = &reserve.oracles;
    klend_instruction(
        REFRESH_RESERVE_DISCRIMINATOR,
        vec![],
        vec![
            AccountMeta::new(reserve.address, false),
            AccountMeta::new_readonly(reserve.lending_market, false),
            optional_account(oracles.pyth, false),
            optional_account(oracles.switchboard_price, false),
            optional_account(oracles.switchboard_twap, false),
            optional_account(oracles.scope, false),
        ],
    )
}

/// Remaining accounts are the deposit reserves followed by the borrow reserves
pub fn refresh_obligation_ix(obligation: &Obligation) -> Instruction {
    let mut accounts = vec![
        AccountMeta::new_readonly(obligation.lending_market, false),
        AccountMeta::new(obligation.address, false),
    ];
    accounts.extend(
        obligation
            .deposit_reserves()
            .into_iter()
            .chain(obligation.borrow_reserves())
            .map(|reserve| AccountMeta::new_readonly(reserve, false)),
    );
    klend_instruction(REFRESH_OBLIGATION_DISCRIMINATOR, vec![], accounts)
}

// ========== ACTIONS ==========

pub fn deposit_ix(
    obligation: &Obligation,
    reserve: &Reserve,
    user_source_liquidity: Pubkey,
    liquidity_amount: u64,
) -> MultiplyResult<Instruction> {
    Ok(klend_instruction(
        DEPOSIT_DISCRIMINATOR,
        encode_args(&liquidity_amount)?,
        vec![
            AccountMeta::new(obligation.owner, true),
            AccountMeta::new(obligation.address, false),
            AccountMeta::new_readonly(obligation.lending_market, false),
            AccountMeta::new_readonly(lending_market_authority(&obligation.lending_market), false),
            AccountMeta::new(reserve.address, false),
            AccountMeta::new_readonly(reserve.liquidity_mint, false),
            AccountMeta::new(reserve.liquidity_supply_vault, false),
            AccountMeta::new(reserve.collateral_mint, false),
            AccountMeta::new(reserve.collateral_supply_vault, false),
            AccountMeta::new(user_source_liquidity, false),
            // user destination collateral placeholder
            optional_account(None, false),
            AccountMeta::new_readonly(anchor_spl::token::ID, false),
            AccountMeta::new_readonly(reserve.liquidity_token_program, false),
            AccountMeta::new_readonly(sysvar_instructions::ID, false),
        ],
    ))
}

pub fn borrow_ix(
    obligation: &Obligation,
    reserve: &Reserve,
    user_destination_liquidity: Pubkey,
    liquidity_amount: u64,
) -> MultiplyResult<Instruction> {
    Ok(klend_instruction(
        BORROW_DISCRIMINATOR,
        encode_args(&liquidity_amount)?,
        vec![
            AccountMeta::new_readonly(obligation.owner, true),
            AccountMeta::new(obligation.address, false),
            AccountMeta::new_readonly(obligation.lending_market, false),
            AccountMeta::new_readonly(lending_market_authority(&obligation.lending_market), false),
            AccountMeta::new(reserve.address, false),
            AccountMeta::new_readonly(reserve.liquidity_mint, false),
            AccountMeta::new(reserve.liquidity_supply_vault, false),
            AccountMeta::new(reserve.fee_vault, false),
            AccountMeta::new(user_destination_liquidity, false),
            // referrer token state
            optional_account(None, true),
            AccountMeta::new_readonly(reserve.liquidity_token_program, false),
            AccountMeta::new_readonly(sysvar_instructions::ID, false),
        ],
    ))
}

/// `u64::MAX` repays the whole borrow
pub fn repay_ix(
    obligation: &Obligation,
    reserve: &Reserve,
    user_source_liquidity: Pubkey,
    liquidity_amount: u64,
) -> MultiplyResult<Instruction> {
    Ok(klend_instruction(
        REPAY_DISCRIMINATOR,
        encode_args(&liquidity_amount)?,
        vec![
            AccountMeta::new_readonly(obligation.owner, true),
            AccountMeta::new(obligation.address, false),
            AccountMeta::new_readonly(obligation.lending_market, false),
            AccountMeta::new(reserve.address, false),
            AccountMeta::new_readonly(reserve.liquidity_mint, false),
            AccountMeta::new(reserve.liquidity_supply_vault, false),
            AccountMeta::new(user_source_liquidity, false),
            AccountMeta::new_readonly(reserve.liquidity_token_program, false),
            AccountMeta::new_readonly(sysvar_instructions::ID, false),
        ],
    ))
}

/// Amount is in collateral tokens; `u64::MAX` withdraws the whole deposit
pub fn withdraw_ix(
    obligation: &Obligation,
    reserve: &Reserve,
    user_destination_liquidity: Pubkey,
    collateral_amount: u64,
) -> MultiplyResult<Instruction> {
    Ok(klend_instruction(
        WITHDRAW_DISCRIMINATOR,
        encode_args(&collateral_amount)?,
        vec![
            AccountMeta::new(obligation.owner, true),
            AccountMeta::new(obligation.address, false),
            AccountMeta::new_readonly(obligation.lending_market, false),
            AccountMeta::new_readonly(lending_market_authority(&obligation.lending_market), false),
            AccountMeta::new(reserve.address, false),
            AccountMeta::new_readonly(reserve.liquidity_mint, false),
            AccountMeta::new(reserve.collateral_supply_vault, false),
            AccountMeta::new(reserve.collateral_mint, false),
            AccountMeta::new(reserve.liquidity_supply_vault, false),
            AccountMeta::new(user_destination_liquidity, false),
            // user destination collateral placeholder
            optional_account(None, false),
            AccountMeta::new_readonly(anchor_spl::token::ID, false),
            AccountMeta::new_readonly(reserve.liquidity_token_program, false),
            AccountMeta::new_readonly(sysvar_instructions::ID, false),
        ],
    ))
}

pub fn request_elevation_group_ix(obligation: &Obligation, elevation_group: u8) -> MultiplyResult<Instruction> {
    Ok(klend_instruction(
        REQUEST_ELEVATION_GROUP_DISCRIMINATOR,
        encode_args(&elevation_group)?,
        vec![
            AccountMeta::new_readonly(obligation.owner, true),
            AccountMeta::new(obligation.address, false),
            AccountMeta::new_readonly(obligation.lending_market, false),
        ],
    ))
}
