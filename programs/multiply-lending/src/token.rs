//! Token account plumbing around a lending bundle: associated token accounts,
//! native SOL wrapping and compute budget.

use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::{AccountMeta, Instruction};
use anchor_lang::solana_program::system_instruction;
use anchor_spl::associated_token::get_associated_token_address_with_program_id;

use multiply_core::{compute_budget, wsol};

/// SPL token instruction tags
const CLOSE_ACCOUNT_TAG: u8 = 9;
const SYNC_NATIVE_TAG: u8 = 17;

/// Associated token program `CreateIdempotent`
const CREATE_IDEMPOTENT_TAG: u8 = 1;

/// Compute budget `SetComputeUnitLimit`
const SET_COMPUTE_UNIT_LIMIT_TAG: u8 = 2;

pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    get_associated_token_address_with_program_id(owner, mint, token_program)
}

/// Create `owner`'s ATA for `mint` unless it exists; returns the address too
pub fn create_ata_idempotent_ix(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> (Pubkey, Instruction) {
    let ata = associated_token_address(owner, mint, token_program);
    let ix = Instruction {
        program_id: anchor_spl::associated_token::ID,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(anchor_lang::system_program::ID, false),
            AccountMeta::new_readonly(*token_program, false),
        ],
        data: vec![CREATE_IDEMPOTENT_TAG],
    };
    (ata, ix)
}

pub fn sync_native_ix(account: &Pubkey) -> Instruction {
    Instruction {
        program_id: anchor_spl::token::ID,
        accounts: vec![AccountMeta::new(*account, false)],
        data: vec![SYNC_NATIVE_TAG],
    }
}

pub fn close_account_ix(account: &Pubkey, destination: &Pubkey, owner: &Pubkey) -> Instruction {
    Instruction {
        program_id: anchor_spl::token::ID,
        accounts: vec![
            AccountMeta::new(*account, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(*owner, true),
        ],
        data: vec![CLOSE_ACCOUNT_TAG],
    }
}

pub fn wsol_ata(owner: &Pubkey) -> Pubkey {
    associated_token_address(owner, &wsol::ID, &anchor_spl::token::ID)
}

/// Move `lamports` of native SOL into the owner's wSOL ATA
pub fn wrap_sol_ixs(owner: &Pubkey, lamports: u64) -> Vec<Instruction> {
    let ata = wsol_ata(owner);
    vec![
        system_instruction::transfer(owner, &ata, lamports),
        sync_native_ix(&ata),
    ]
}

/// Close the wSOL ATA, returning its lamports to the owner
pub fn unwrap_sol_ix(owner: &Pubkey) -> Instruction {
    close_account_ix(&wsol_ata(owner), owner, owner)
}

pub fn compute_unit_limit_ix(units: u32) -> Instruction {
    let mut data = vec![SET_COMPUTE_UNIT_LIMIT_TAG];
    data.extend_from_slice(&units.to_le_bytes());
    Instruction {
        program_id: compute_budget::ID,
        accounts: vec![],
        data,
    }
}

/// Budget steps belong to the bundle, not to the swap provider
pub fn strip_compute_budget(instructions: Vec<Instruction>) -> Vec<Instruction> {
    instructions
        .into_iter()
        .filter(|ix| ix.program_id != compute_budget::ID)
        .collect()
}
