use std::sync::Mutex;

use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::Instruction;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use multiply_core::math::decimal_to_fraction_sf;
use multiply_core::{
    wsol, BorrowRateCurve, ElevationGroup, Market, MultiplyConfig, MultiplyError, MultiplyEvent,
    MultiplyObserver, MultiplyResult, Obligation, PinnedSnapshot, Reserve, ReserveOracles,
};
use multiply_lending::compute_unit_limit_ix;

use crate::pipeline::{OperationContext, SetupSteps, SwapLeg};
use crate::types::{SwapInputs, SwapIxs, SwapIxsProvider, SwapQuote, SwapQuoteProvider};

pub const SLOT: u64 = 1_000;

/// "SOL" gets the native mint
pub fn reserve(symbol: &str, price: Decimal, decimals: u8, ltv_pct: u8) -> Reserve {
    Reserve {
        address: Pubkey::new_unique(),
        lending_market: Pubkey::default(),
        symbol: symbol.to_string(),
        liquidity_mint: if symbol == "SOL" { wsol::ID } else { Pubkey::new_unique() },
        liquidity_token_program: anchor_spl::token::ID,
        liquidity_supply_vault: Pubkey::new_unique(),
        fee_vault: Pubkey::new_unique(),
        liquidity_decimals: decimals,
        market_price: price,
        available_amount: 1_000_000_000_000_000,
        borrowed_amount: Decimal::ZERO,
        cumulative_borrow_rate: Decimal::ONE,
        last_update_slot: 0,
        collateral_mint: Pubkey::new_unique(),
        collateral_supply_vault: Pubkey::new_unique(),
        collateral_mint_supply: 0,
        oracles: ReserveOracles::default(),
        loan_to_value_pct: ltv_pct,
        borrow_factor_pct: 100,
        borrow_fee_sf: 0,
        flash_loan_fee_sf: 0,
        host_fixed_interest_rate_bps: 0,
        borrow_rate_curve: BorrowRateCurve {
            points: vec![(dec!(0), dec!(0)), (dec!(1), dec!(0.5))],
        },
        recent_slot_duration_ms: 500,
    }
}

pub fn market(mut reserves: Vec<Reserve>, elevation_groups: Vec<ElevationGroup>) -> Market {
    let address = Pubkey::new_unique();
    for reserve in &mut reserves {
        reserve.lending_market = address;
    }
    Market {
        address,
        referral_fee_bps: 0,
        reserves,
        elevation_groups,
    }
}

/// Deposits and borrows by reserve index, in lamports (collateral rate 1)
pub fn obligation_with(market: &Market, deposits: &[(usize, u64)], borrows: &[(usize, u64)]) -> Obligation {
    let mut obligation = Obligation {
        address: Pubkey::new_unique(),
        owner: Pubkey::new_unique(),
        lending_market: market.address,
        deposits: vec![],
        borrows: vec![],
        elevation_group: 0,
    };
    for (index, amount) in deposits {
        obligation
            .add_deposit(market.reserves[*index].address, *amount)
            .unwrap();
    }
    for (index, amount) in borrows {
        let reserve = &market.reserves[*index];
        obligation
            .add_borrow(reserve.address, Decimal::from(*amount), reserve.cumulative_borrow_rate)
            .unwrap();
    }
    obligation
}

/// SOL ($100) collateral, USDC ($1) debt, group 1 pairing them; empty obligation
pub fn sol_usdc_market() -> (Market, Obligation) {
    let sol = reserve("SOL", dec!(100), 9, 75);
    let usdc = reserve("USDC", dec!(1), 6, 80);
    let group = ElevationGroup {
        id: 1,
        ltv_pct: 90,
        max_reserves_as_collateral: 1,
        debt_reserve: usdc.address,
        collateral_reserves: vec![sol.address],
    };
    let market = market(vec![sol, usdc], vec![group]);
    let obligation = obligation_with(&market, &[], &[]);
    (market, obligation)
}

/// 3 SOL deposited, 200 USDC borrowed: 3x on 1 SOL net
pub fn levered_sol_usdc() -> (Market, Obligation) {
    let (market, _) = sol_usdc_market();
    let obligation = obligation_with(&market, &[(0, 3_000_000_000)], &[(1, 200_000_000)]);
    (market, obligation)
}

pub fn with_flash_fee(reserve: &mut Reserve, fee: Decimal) {
    reserve.flash_loan_fee_sf = decimal_to_fraction_sf(fee).unwrap();
}

/// Owns what an `OperationContext` borrows
pub struct ContextParts {
    pub config: MultiplyConfig,
    pub snapshot: PinnedSnapshot,
    pub setup: SetupSteps,
}

impl ContextParts {
    pub fn context<'a>(&'a self, observer: &'a dyn MultiplyObserver) -> OperationContext<'a> {
        OperationContext {
            config: &self.config,
            snapshot: &self.snapshot,
            setup: &self.setup,
            observer,
        }
    }
}

pub fn context_parts(market: Market, obligation: Obligation) -> ContextParts {
    ContextParts {
        config: MultiplyConfig::default(),
        snapshot: PinnedSnapshot {
            slot: SLOT,
            market,
            obligation,
        },
        setup: SetupSteps::default(),
    }
}

/// A swap with no steps returning `out_amount` output tokens
pub fn settled_leg(out_amount: Decimal) -> SwapLeg {
    SwapLeg {
        instructions: Vec::new(),
        out_amount,
    }
}

pub fn snapshot(market: Market, obligation: Obligation) -> PinnedSnapshot {
    PinnedSnapshot {
        slot: SLOT,
        market,
        obligation,
    }
}

// ========== PROVIDERS ==========

pub struct FixedQuoter {
    pub price: Decimal,
    pub calls: Mutex<Vec<SwapInputs>>,
}

impl FixedQuoter {
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SwapQuoteProvider<String> for FixedQuoter {
    async fn quote(&self, inputs: &SwapInputs, _touched_accounts: &[Pubkey]) -> MultiplyResult<SwapQuote<String>> {
        self.calls.lock().unwrap().push(inputs.clone());
        Ok(SwapQuote::new(self.price, "fixed".to_string()))
    }
}

pub struct FailingQuoter;

#[async_trait]
impl SwapQuoteProvider<String> for FailingQuoter {
    async fn quote(&self, _inputs: &SwapInputs, _touched_accounts: &[Pubkey]) -> MultiplyResult<SwapQuote<String>> {
        Err(MultiplyError::QuoteUnavailable("no liquidity".to_string()))
    }
}

/// Swap step data of every route `FixedSwapper` builds
pub const SWAP_IX_DATA: u8 = 42;

/// `routes` routes, each a compute budget step plus one swap step
pub struct FixedSwapper {
    pub routes: usize,
    pub output_amount_lamports: Option<u64>,
}

#[async_trait]
impl SwapIxsProvider<String> for FixedSwapper {
    async fn build_swap_ixs(
        &self,
        _inputs: &SwapInputs,
        _touched_accounts: &[Pubkey],
        quote: &SwapQuote<String>,
    ) -> MultiplyResult<Vec<SwapIxs<String>>> {
        Ok((0..self.routes)
            .map(|route| SwapIxs {
                pre_action_ixs: vec![],
                swap_ixs: vec![
                    compute_unit_limit_ix(200_000),
                    Instruction {
                        program_id: Pubkey::new_unique(),
                        accounts: vec![],
                        data: vec![SWAP_IX_DATA],
                    },
                ],
                lookup_tables: vec![Pubkey::new_unique(); route + 1],
                quote: SwapQuote::new(quote.price_a_in_b, format!("route-{route}")),
                output_amount_lamports: self.output_amount_lamports,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<MultiplyEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<MultiplyEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl MultiplyObserver for RecordingObserver {
    fn on_event(&self, event: &MultiplyEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
