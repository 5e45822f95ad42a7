use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::{AccountMeta, Instruction};
use anchor_lang::AnchorSerialize;

use crate::errors::{MultiplyError, MultiplyResult};

/// Borsh-encode instruction arguments
pub fn encode_args<A: AnchorSerialize>(args: &A) -> MultiplyResult<Vec<u8>> {
    let mut data = Vec::new();
    args.serialize(&mut data)
        .map_err(|e| MultiplyError::Encoding(e.to_string()))?;
    Ok(data)
}

/// Anchor instruction against the klend program: 8-byte discriminator followed
/// by the encoded arguments
pub fn klend_instruction(
    discriminator: [u8; 8],
    args: Vec<u8>,
    accounts: Vec<AccountMeta>,
) -> Instruction {
    let mut data = Vec::with_capacity(8 + args.len());
    data.extend_from_slice(&discriminator);
    data.extend(args);
    Instruction {
        program_id: crate::ID,
        accounts,
        data,
    }
}

/// klend convention for absent optional accounts: the program id, read-only
pub fn optional_account(account: Option<Pubkey>, is_writable: bool) -> AccountMeta {
    match account {
        Some(key) if is_writable => AccountMeta::new(key, false),
        Some(key) => AccountMeta::new_readonly(key, false),
        None => AccountMeta::new_readonly(crate::ID, false),
    }
}

/// Every account an instruction list references, first occurrence order
pub fn touched_accounts(instructions: &[Instruction]) -> Vec<Pubkey> {
    let mut seen = Vec::new();
    for ix in instructions {
        let keys = std::iter::once(ix.program_id).chain(ix.accounts.iter().map(|m| m.pubkey));
        for key in keys {
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
    }
    seen
}
