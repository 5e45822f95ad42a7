/// Basis points denominator (100% = 10000)
pub const BPS_DENOMINATOR: u64 = 10000;

/// Percent denominator for `*_pct` reserve and group fields
pub const PCT_DENOMINATOR: u64 = 100;

/// Scaled fraction shift used by klend fee fields (value / 2^60)
pub const FRACTION_SCALE_BITS: u32 = 60;

/// Sentinel understood by klend as "the whole position"
pub const U64_MAX: u64 = u64::MAX;

/// Lamports in one SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Slot timing
pub const SLOTS_PER_SECOND: u64 = 2;
pub const SLOTS_PER_MINUTE: u64 = SLOTS_PER_SECOND * 60;
pub const SLOTS_PER_HOUR: u64 = SLOTS_PER_MINUTE * 60;
pub const SLOTS_PER_DAY: u64 = SLOTS_PER_HOUR * 24;
pub const SLOTS_PER_YEAR: u64 = SLOTS_PER_DAY * 365;

/// Nominal slot duration behind `SLOTS_PER_SECOND`
pub const DEFAULT_SLOT_DURATION_MS: u64 = 500;

/// Max deposit entries per obligation
pub const MAX_OBLIGATION_DEPOSITS: usize = 8;

/// Max borrow entries per obligation
pub const MAX_OBLIGATION_BORROWS: usize = 5;

/// Elevation group id meaning "no group"
pub const NO_ELEVATION_GROUP: u8 = 0;

// ========== MULTIPLY DEFAULTS ==========

/// Placeholder swap output used while probing the account set
pub const PROBE_SWAP_OUT_AMOUNT: u64 = 1;

/// Slots subtracted from the pinned slot when sizing decrease withdrawals
pub const WITHDRAW_SLOT_OFFSET: u64 = 150;

/// Default compute unit limit requested by the budget step
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 1_400_000;

/// Share of the native balance wrapped when the debt token is SOL
pub const DEFAULT_WSOL_WRAP_FRACTION_BPS: u64 = 5000; // 50%

/// Cap on the native balance wrapped when the debt token is SOL
pub const DEFAULT_WSOL_WRAP_CAP_LAMPORTS: u64 = 100_000_000; // 0.1 SOL

/// Oracle-based over-estimate applied to repay-with-collateral quote inputs
pub const REPAY_WITH_COLL_QUOTE_CAP_BPS: u64 = 11000; // 110%

// ========== PROGRAM IDS ==========

/// Native SOL (wrapped)
pub mod wsol {
    anchor_lang::declare_id!("So11111111111111111111111111111111111111112");
}

pub mod compute_budget {
    anchor_lang::declare_id!("ComputeBudget111111111111111111111111111111");
}

pub mod sysvar_instructions {
    anchor_lang::declare_id!("Sysvar1nstructions1111111111111111111111111");
}

/// Lending market authority PDA seed
pub const LENDING_MARKET_AUTH_SEED: &[u8] = b"lma";
