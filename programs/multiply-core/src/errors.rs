use std::fmt;

use anchor_lang::prelude::Pubkey;
use rust_decimal::Decimal;
use thiserror::Error;

pub type MultiplyResult<T> = std::result::Result<T, MultiplyError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MultiplyError {
    // ========== INPUT ==========
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Invalid target leverage {target} (current {current})")]
    InvalidLeverage { target: Decimal, current: Decimal },

    #[error("Invalid slippage: {0}%")]
    InvalidSlippage(Decimal),

    #[error("Cannot swap mint {0} into itself")]
    SameMint(Pubkey),

    #[error("No reserve for mint {0}")]
    UnknownMint(Pubkey),

    #[error("Reserve {0} not found in market")]
    UnknownReserve(Pubkey),

    #[error("Elevation group {0} not found in market")]
    UnknownElevationGroup(u8),

    #[error("Obligation has no deposit in reserve {0}")]
    DepositNotFound(Pubkey),

    #[error("Obligation has no borrow in reserve {0}")]
    BorrowNotFound(Pubkey),

    #[error("Amount {amount} does not cover fee {fee}")]
    AmountBelowFee { amount: u64, fee: u64 },

    #[error("Expected a {expected} request")]
    UnexpectedAction { expected: &'static str },

    #[error("Flash loans are disabled on reserve {0}")]
    FlashLoansDisabled(Pubkey),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid pubkey: {0}")]
    InvalidPubkey(String),

    // ========== EXTERNAL ==========
    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("Swap steps unavailable: {0}")]
    SwapUnavailable(String),

    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    // ========== PROJECTED INVARIANTS ==========
    #[error("Projected LTV {ltv} exceeds max LTV {max_ltv}")]
    LtvExceeded { ltv: Decimal, max_ltv: Decimal },

    #[error("Obligation cannot request elevation group {group}: {condition}")]
    ElevationGroupIneligible {
        group: u8,
        condition: ElevationGroupCondition,
    },

    // ========== LOGIC ==========
    #[error("Reserve for {0} missing after validation")]
    MissingReserve(Pubkey),

    #[error("Adjust deltas disagree: deposit {deposit_delta}, borrow {borrow_delta}")]
    MixedAdjustDirection {
        deposit_delta: Decimal,
        borrow_delta: Decimal,
    },

    #[error("Step {stage:?} out of order after {last:?}")]
    StepOutOfOrder { stage: String, last: String },

    #[error("Flash borrow index {0} does not fit in a u8")]
    FlashBorrowIndexOverflow(usize),

    #[error("Bundle has no flash borrow step")]
    MissingFlashBorrow,

    #[error("Invalid borrow rate curve: {0}")]
    InvalidBorrowRateCurve(&'static str),

    #[error("Max obligation entries reached for reserve {0}")]
    MaxObligationEntriesReached(Pubkey),

    #[error("Instruction encoding failed: {0}")]
    Encoding(String),

    #[error("Math overflow")]
    MathOverflow,
}

/// Which elevation group condition a projected obligation violated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElevationGroupCondition {
    /// More than one debt reserve cannot join any group
    MultipleDebtReserves { count: usize },
    /// The debt reserve is not the group's debt reserve
    DebtReserveMismatch { debt_reserve: Pubkey, expected: Pubkey },
    /// A collateral reserve is outside the group's eligible set
    CollateralNotEligible { reserve: Pubkey },
    /// Too many collateral reserves for the group's cap
    TooManyCollateralReserves { count: usize, max: u8 },
}

impl fmt::Display for ElevationGroupCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultipleDebtReserves { count } => {
                write!(f, "{count} debt reserves")
            }
            Self::DebtReserveMismatch {
                debt_reserve,
                expected,
            } => write!(f, "debt reserve {debt_reserve} is not {expected}"),
            Self::CollateralNotEligible { reserve } => {
                write!(f, "collateral reserve {reserve} is not eligible")
            }
            Self::TooManyCollateralReserves { count, max } => {
                write!(f, "{count} collateral reserves exceed cap {max}")
            }
        }
    }
}

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    QuoteUnavailable,
    ProjectedInvariantViolation,
    External,
    Logic,
}

impl MultiplyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount(_)
            | Self::InvalidLeverage { .. }
            | Self::InvalidSlippage(_)
            | Self::SameMint(_)
            | Self::UnknownMint(_)
            | Self::UnknownReserve(_)
            | Self::UnknownElevationGroup(_)
            | Self::DepositNotFound(_)
            | Self::BorrowNotFound(_)
            | Self::AmountBelowFee { .. }
            | Self::UnexpectedAction { .. }
            | Self::FlashLoansDisabled(_)
            | Self::InvalidConfig(_)
            | Self::InvalidPubkey(_) => ErrorKind::Input,
            Self::QuoteUnavailable(_) => ErrorKind::QuoteUnavailable,
            Self::SwapUnavailable(_) | Self::SnapshotUnavailable(_) => ErrorKind::External,
            Self::LtvExceeded { .. } | Self::ElevationGroupIneligible { .. } => {
                ErrorKind::ProjectedInvariantViolation
            }
            Self::MissingReserve(_)
            | Self::MixedAdjustDirection { .. }
            | Self::StepOutOfOrder { .. }
            | Self::FlashBorrowIndexOverflow(_)
            | Self::MissingFlashBorrow
            | Self::InvalidBorrowRateCurve(_)
            | Self::MaxObligationEntriesReached(_)
            | Self::Encoding(_)
            | Self::MathOverflow => ErrorKind::Logic,
        }
    }
}

/// Return early with `$err` unless `$cond` holds.
#[macro_export]
macro_rules! require {
    ($cond:expr, $err:expr $(,)?) => {
        if !($cond) {
            return Err($err);
        }
    };
}
