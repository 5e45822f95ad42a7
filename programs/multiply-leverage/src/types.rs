use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::Instruction;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use multiply_core::MultiplyResult;
use multiply_flash::FlashLoan;

// ========== SWAP PROVIDERS ==========

/// What the swap step has to do, in lamports of the input and output mints
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapInputs {
    pub input_amount_lamports: u64,
    /// `None` while quoting
    pub min_out_amount_lamports: Option<u64>,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
}

/// Exchange rate estimate plus the provider's own payload
#[derive(Clone, Debug, PartialEq)]
pub struct SwapQuote<Q> {
    /// Output tokens per input token
    pub price_a_in_b: Decimal,
    pub quote_response: Q,
}

impl<Q> SwapQuote<Q> {
    pub fn new(price_a_in_b: Decimal, quote_response: Q) -> Self {
        Self {
            price_a_in_b,
            quote_response,
        }
    }
}

/// Concrete swap steps for one candidate route
#[derive(Clone, Debug, PartialEq)]
pub struct SwapIxs<Q> {
    /// Steps that must run before the lending leg (route setup)
    pub pre_action_ixs: Vec<Instruction>,
    pub swap_ixs: Vec<Instruction>,
    pub lookup_tables: Vec<Pubkey>,
    pub quote: SwapQuote<Q>,
    /// Output the route commits to, in lamports, when the provider knows it
    pub output_amount_lamports: Option<u64>,
}

#[async_trait]
pub trait SwapQuoteProvider<Q>: Send + Sync {
    async fn quote(&self, inputs: &SwapInputs, touched_accounts: &[Pubkey]) -> MultiplyResult<SwapQuote<Q>>;
}

/// Builds the steps realizing a quote; may return several routes
#[async_trait]
pub trait SwapIxsProvider<Q>: Send + Sync {
    async fn build_swap_ixs(
        &self,
        inputs: &SwapInputs,
        touched_accounts: &[Pubkey],
        quote: &SwapQuote<Q>,
    ) -> MultiplyResult<Vec<SwapIxs<Q>>>;
}

// ========== REQUEST ==========

/// Per-mode part of a leverage request
#[derive(Clone, Debug, PartialEq)]
pub enum LeverageAction {
    /// Open or add to a position; `amount` is in `selected_mint` tokens
    Deposit {
        amount: Decimal,
        selected_mint: Pubkey,
        target_leverage: Decimal,
    },
    /// Reduce keeping leverage, or close; `amount` is in `selected_mint` tokens
    Withdraw {
        amount: Decimal,
        selected_mint: Pubkey,
        is_closing: bool,
    },
    Adjust { target_leverage: Decimal },
}

#[derive(Clone, Debug, PartialEq)]
pub struct LeverageRequest {
    pub collateral_mint: Pubkey,
    pub debt_mint: Pubkey,
    pub action: LeverageAction,
    /// Percent, e.g. 0.5 for 0.5%
    pub slippage_pct: Decimal,
    /// Group the obligation should end up in; `None` keeps the current one
    pub elevation_group_target: Option<u8>,
    pub strategy: crate::strategy::CollateralStrategy,
    /// Owner's native SOL, for the wSOL wrap policy
    pub native_balance: u64,
}

// ========== OUTPUT ==========

/// Amounts the final bundle moves, in whole tokens, plus projected risk
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SimulationDetails {
    pub flash_borrowed: Decimal,
    pub flash_fee: Decimal,
    pub flash_repaid: Decimal,
    pub swap_in: Decimal,
    pub swap_expected_out: Decimal,
    pub swap_min_out: Decimal,
    pub projected_ltv: Decimal,
    pub projected_max_ltv: Decimal,
    /// Deposit value over net value, zero once closed
    pub projected_leverage: Decimal,
}

/// One ready-to-sign bundle per candidate route
#[derive(Clone, Debug, PartialEq)]
pub struct LeverageBundle<Q> {
    pub instructions: Vec<Instruction>,
    pub lookup_tables: Vec<Pubkey>,
    pub flash_loan: FlashLoan,
    pub flash_borrow_index: u8,
    pub swap_inputs: SwapInputs,
    pub quote: Q,
    pub projected_obligation: multiply_core::Obligation,
    pub simulation: SimulationDetails,
}
