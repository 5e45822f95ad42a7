//! Probe, quote, commit, validate.
//!
//! An operation is planned at the oracle price and assembled once with a
//! placeholder swap to learn every account the bundle touches. The quote is
//! requested against that set, the operation is re-planned at the quoted
//! price, and each candidate route is assembled and validated. Any failure
//! fails the whole call.

use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::Instruction;
use futures::future::try_join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use multiply_core::math::{bps_to_decimal, checked_div, checked_mul, from_lamports, to_lamports_ceil};
use multiply_core::{
    touched_accounts, AmountsCommitted, BundleAssembled, Market, MultiplyConfig, MultiplyError,
    MultiplyEvent, MultiplyObserver, MultiplyResult, Obligation, PinnedSnapshot, ProbeCompleted,
    QuoteReceived, Reserve, TracingObserver, ValidationPassed, WsolWrapPlanned, PROBE_SWAP_OUT_AMOUNT,
};
use multiply_flash::FlashLoan;
use multiply_lending::{compute_unit_limit_ix, create_ata_idempotent_ix, strip_compute_budget, wrap_sol_ixs};

use crate::builder::{BundleBuilder, SequenceLayout, Stage};
use crate::types::{
    LeverageBundle, SimulationDetails, SwapInputs, SwapIxs, SwapIxsProvider, SwapQuoteProvider,
};
use crate::validator::validate_projected;

static TRACING_OBSERVER: TracingObserver = TracingObserver;

/// Caller-supplied steps placed ahead of every bundle
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetupSteps {
    /// Replaces the default compute unit limit step
    pub budget_ixs: Option<Vec<Instruction>>,
    /// Oracle price refreshes
    pub scope_refresh_ixs: Vec<Instruction>,
}

/// Everything an operation reads while planning and assembling
#[derive(Clone, Copy)]
pub struct OperationContext<'a> {
    pub config: &'a MultiplyConfig,
    pub snapshot: &'a PinnedSnapshot,
    pub setup: &'a SetupSteps,
    pub observer: &'a dyn MultiplyObserver,
}

impl<'a> OperationContext<'a> {
    pub fn market(&self) -> &'a Market {
        &self.snapshot.market
    }

    pub fn obligation(&self) -> &'a Obligation {
        &self.snapshot.obligation
    }

    pub fn owner(&self) -> Pubkey {
        self.snapshot.obligation.owner
    }

    pub fn slot(&self) -> u64 {
        self.snapshot.slot
    }

    /// Reserves behind a request's two mints; unknown mints are input errors
    pub fn reserve_pair(&self, first: &Pubkey, second: &Pubkey) -> MultiplyResult<(&'a Reserve, &'a Reserve)> {
        let market = self.market();
        Ok((market.reserve_by_mint(first)?, market.reserve_by_mint(second)?))
    }

    /// Same pair once a plan resolved it; absence is a logic error
    pub fn planned_reserve_pair(
        &self,
        first: &Pubkey,
        second: &Pubkey,
    ) -> MultiplyResult<(&'a Reserve, &'a Reserve)> {
        let market = self.market();
        Ok((
            market.validated_reserve_by_mint(first)?,
            market.validated_reserve_by_mint(second)?,
        ))
    }

    /// Group to request for `target`, `None` when the obligation is already there
    pub fn elevation_group_request(&self, target: Option<u8>) -> MultiplyResult<Option<u8>> {
        match target {
            Some(group) if group != self.obligation().elevation_group => {
                self.market().elevation_group(group)?;
                Ok(Some(group))
            }
            _ => Ok(None),
        }
    }

    /// Setup steps plus one idempotent ATA per reserve; returns the ATAs in order
    pub fn begin_bundle(
        &self,
        layout: SequenceLayout,
        reserves: &[&Reserve],
    ) -> MultiplyResult<(BundleBuilder, Vec<Pubkey>)> {
        let mut builder = BundleBuilder::new(layout);
        builder.extend(Stage::Setup, self.setup.scope_refresh_ixs.iter().cloned())?;
        let budget = match &self.setup.budget_ixs {
            Some(ixs) => ixs.clone(),
            None => vec![compute_unit_limit_ix(self.config.compute_unit_limit)],
        };
        builder.extend(Stage::Setup, budget)?;

        let owner = self.owner();
        let mut atas = Vec::with_capacity(reserves.len());
        for reserve in reserves {
            let (ata, ix) = create_ata_idempotent_ix(
                &owner,
                &owner,
                &reserve.liquidity_mint,
                &reserve.liquidity_token_program,
            );
            builder.push(Stage::CreateAccounts, ix)?;
            atas.push(ata);
        }
        Ok((builder, atas))
    }

    /// Fund the wSOL account from the native balance per the wrap policy
    pub fn wrap_native_balance(&self, builder: &mut BundleBuilder, native_balance: u64) -> MultiplyResult<()> {
        let lamports = self.config.wsol_wrap.wrap_amount(native_balance)?;
        self.observer
            .on_event(&MultiplyEvent::WsolWrapPlanned(WsolWrapPlanned { native_balance, lamports }));
        if lamports > 0 {
            builder.extend(Stage::Wrap, wrap_sol_ixs(&self.owner(), lamports))?;
        }
        Ok(())
    }
}

/// Swap steps as an operation assembles them
#[derive(Clone, Debug, PartialEq)]
pub struct SwapLeg {
    /// Route setup and swap, compute budget removed
    pub instructions: Vec<Instruction>,
    /// Output-mint tokens the swap yields
    pub out_amount: Decimal,
}

impl SwapLeg {
    /// No steps, one whole output token
    pub fn probe() -> Self {
        Self {
            instructions: Vec::new(),
            out_amount: Decimal::from(PROBE_SWAP_OUT_AMOUNT),
        }
    }
}

/// An assembled bundle before validation
#[derive(Clone, Debug, PartialEq)]
pub struct Assembly {
    pub instructions: Vec<Instruction>,
    pub flash_borrow_index: u8,
    pub flash_loan: FlashLoan,
    pub flash_decimals: u8,
    pub projected: Obligation,
    /// Input-mint tokens sold
    pub swap_in: Decimal,
    /// Output-mint tokens the swap must return
    pub swap_min_out: Decimal,
}

/// One user-facing operation, planned twice and assembled per route
pub trait LeverageOperation: Send + Sync {
    type Plan: Send + Sync;

    fn kind(&self) -> &'static str;

    /// Output tokens per input token of the swap, from oracle prices
    fn oracle_price(&self, ctx: &OperationContext) -> MultiplyResult<Decimal>;

    /// Amounts at `price` (same orientation as `oracle_price`)
    fn plan(&self, ctx: &OperationContext, price: Decimal) -> MultiplyResult<Self::Plan>;

    fn swap_inputs(&self, ctx: &OperationContext, plan: &Self::Plan) -> MultiplyResult<SwapInputs>;

    /// What the quote is requested for; the swap itself unless overridden
    fn quote_inputs(&self, ctx: &OperationContext, plan: &Self::Plan) -> MultiplyResult<SwapInputs> {
        self.swap_inputs(ctx, plan)
    }

    fn assemble(&self, ctx: &OperationContext, plan: &Self::Plan, leg: &SwapLeg) -> MultiplyResult<Assembly>;
}

/// Result of the probe pass
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeResult {
    pub instructions: usize,
    pub touched_accounts: Vec<Pubkey>,
}

/// Inflate the input by `buffer_bps` and drop the min-out for quoting
pub fn buffered_quote_inputs(inputs: SwapInputs, buffer_bps: u64) -> MultiplyResult<SwapInputs> {
    let inflated = checked_mul(
        Decimal::from(inputs.input_amount_lamports),
        Decimal::ONE + bps_to_decimal(buffer_bps),
    )?;
    Ok(SwapInputs {
        input_amount_lamports: to_lamports_ceil(inflated, 0)?,
        min_out_amount_lamports: None,
        ..inputs
    })
}

/// Only for mints the operation's plan already resolved
fn mint_decimals(market: &Market, mint: &Pubkey) -> MultiplyResult<u8> {
    Ok(market.validated_reserve_by_mint(mint)?.liquidity_decimals)
}

// ========== SHARED BY OPERATIONS ==========

/// Percent slippage as a fraction; must sit in [0, 100)
pub(crate) fn slippage_fraction(slippage_pct: Decimal) -> MultiplyResult<Decimal> {
    multiply_core::require!(
        !slippage_pct.is_sign_negative() && slippage_pct < Decimal::ONE_HUNDRED,
        MultiplyError::InvalidSlippage(slippage_pct)
    );
    Ok(slippage_pct / Decimal::ONE_HUNDRED)
}

/// `output` tokens per `input` token at oracle prices
pub(crate) fn oracle_price(input: &Reserve, output: &Reserve) -> MultiplyResult<Decimal> {
    multiply_core::require!(
        output.market_price > Decimal::ZERO,
        MultiplyError::InvalidAmount(output.market_price)
    );
    checked_div(input.market_price, output.market_price)
}

/// Collateral tokens redeeming `liquidity_lamports` at `slot`, rounded up and
/// capped at the obligation's deposit
pub(crate) fn collateral_to_withdraw(
    reserve: &Reserve,
    obligation: &Obligation,
    liquidity_lamports: u64,
    slot: u64,
) -> MultiplyResult<u64> {
    let deposited = obligation
        .deposit(&reserve.address)
        .ok_or(MultiplyError::DepositNotFound(reserve.address))?
        .deposited_amount;
    let rate = reserve.collateral_exchange_rate_at(slot)?;
    let collateral = checked_mul(Decimal::from(liquidity_lamports), rate)?
        .ceil()
        .to_u64()
        .ok_or(MultiplyError::MathOverflow)?;
    Ok(collateral.min(deposited))
}

pub struct MultiplyEngine<'a, Q> {
    config: MultiplyConfig,
    quoter: &'a dyn SwapQuoteProvider<Q>,
    swappers: Vec<&'a dyn SwapIxsProvider<Q>>,
    observer: &'a dyn MultiplyObserver,
    setup: SetupSteps,
}

impl<'a, Q: Clone + Send + Sync> MultiplyEngine<'a, Q> {
    pub fn new(
        config: MultiplyConfig,
        quoter: &'a dyn SwapQuoteProvider<Q>,
        swapper: &'a dyn SwapIxsProvider<Q>,
    ) -> MultiplyResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            quoter,
            swappers: vec![swapper],
            observer: &TRACING_OBSERVER,
            setup: SetupSteps::default(),
        })
    }

    /// Another route source, evaluated concurrently with the others
    pub fn with_swapper(mut self, swapper: &'a dyn SwapIxsProvider<Q>) -> Self {
        self.swappers.push(swapper);
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn MultiplyObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_setup(mut self, setup: SetupSteps) -> Self {
        self.setup = setup;
        self
    }

    pub fn config(&self) -> &MultiplyConfig {
        &self.config
    }

    pub fn context<'s>(&'s self, snapshot: &'s PinnedSnapshot) -> OperationContext<'s> {
        OperationContext {
            config: &self.config,
            snapshot,
            setup: &self.setup,
            observer: self.observer,
        }
    }

    /// Assemble at the oracle price with a placeholder swap
    pub fn probe<O: LeverageOperation>(
        &self,
        ctx: &OperationContext,
        op: &O,
        plan: &O::Plan,
    ) -> MultiplyResult<ProbeResult> {
        let assembly = op.assemble(ctx, plan, &SwapLeg::probe())?;
        let result = ProbeResult {
            instructions: assembly.instructions.len(),
            touched_accounts: touched_accounts(&assembly.instructions),
        };
        self.observer.on_event(&MultiplyEvent::ProbeCompleted(ProbeCompleted {
            operation: op.kind(),
            obligation: ctx.obligation().address,
            instructions: result.instructions,
            touched_accounts: result.touched_accounts.len(),
        }));
        Ok(result)
    }

    /// Run `op` end to end; one bundle per candidate route
    pub async fn execute<O: LeverageOperation>(
        &self,
        snapshot: &PinnedSnapshot,
        op: &O,
    ) -> MultiplyResult<Vec<LeverageBundle<Q>>> {
        let ctx = self.context(snapshot);
        let market = ctx.market();

        let probe_plan = op.plan(&ctx, op.oracle_price(&ctx)?)?;
        let probe = self.probe(&ctx, op, &probe_plan)?;

        let quote_inputs = buffered_quote_inputs(op.quote_inputs(&ctx, &probe_plan)?, self.config.quote_buffer_bps)?;
        let quote = self.quoter.quote(&quote_inputs, &probe.touched_accounts).await?;
        multiply_core::require!(
            quote.price_a_in_b > Decimal::ZERO,
            MultiplyError::QuoteUnavailable(format!(
                "non-positive price {} for {} -> {}",
                quote.price_a_in_b, quote_inputs.input_mint, quote_inputs.output_mint
            ))
        );
        self.observer.on_event(&MultiplyEvent::QuoteReceived(QuoteReceived {
            input_mint: quote_inputs.input_mint,
            output_mint: quote_inputs.output_mint,
            input_amount: from_lamports(
                quote_inputs.input_amount_lamports,
                mint_decimals(market, &quote_inputs.input_mint)?,
            )?,
            price: quote.price_a_in_b,
        }));

        let plan = op.plan(&ctx, quote.price_a_in_b)?;
        let swap_inputs = op.swap_inputs(&ctx, &plan)?;
        let routes: Vec<SwapIxs<Q>> = try_join_all(
            self.swappers
                .iter()
                .map(|swapper| swapper.build_swap_ixs(&swap_inputs, &probe.touched_accounts, &quote)),
        )
        .await?
        .into_iter()
        .flatten()
        .collect();
        multiply_core::require!(
            !routes.is_empty(),
            MultiplyError::SwapUnavailable(format!(
                "no route for {} -> {}",
                swap_inputs.input_mint, swap_inputs.output_mint
            ))
        );

        routes
            .into_iter()
            .map(|route| self.finalize(&ctx, op, &plan, &swap_inputs, route))
            .collect()
    }

    fn finalize<O: LeverageOperation>(
        &self,
        ctx: &OperationContext,
        op: &O,
        plan: &O::Plan,
        swap_inputs: &SwapInputs,
        route: SwapIxs<Q>,
    ) -> MultiplyResult<LeverageBundle<Q>> {
        let market = ctx.market();
        let SwapIxs {
            pre_action_ixs,
            swap_ixs,
            lookup_tables,
            quote,
            output_amount_lamports,
        } = route;

        let out_amount = match output_amount_lamports {
            Some(lamports) => from_lamports(lamports, mint_decimals(market, &swap_inputs.output_mint)?)?,
            None => {
                let input = from_lamports(
                    swap_inputs.input_amount_lamports,
                    mint_decimals(market, &swap_inputs.input_mint)?,
                )?;
                checked_mul(input, quote.price_a_in_b)?
            }
        };
        let mut instructions = pre_action_ixs;
        instructions.extend(swap_ixs);
        let leg = SwapLeg {
            instructions: strip_compute_budget(instructions),
            out_amount,
        };

        let assembly = op.assemble(ctx, plan, &leg)?;
        self.observer.on_event(&MultiplyEvent::AmountsCommitted(AmountsCommitted {
            operation: op.kind(),
            flash_borrow_amount: assembly.flash_loan.borrow_amount,
            swap_in_amount: assembly.swap_in,
            min_out_amount: assembly.swap_min_out,
        }));

        let stats = validate_projected(market, &assembly.projected)?;
        self.observer.on_event(&MultiplyEvent::ValidationPassed(ValidationPassed {
            obligation: assembly.projected.address,
            elevation_group: assembly.projected.elevation_group,
            ltv: stats.ltv,
            max_ltv: stats.max_ltv,
        }));

        let decimals = assembly.flash_decimals;
        let simulation = SimulationDetails {
            flash_borrowed: from_lamports(assembly.flash_loan.borrow_amount, decimals)?,
            flash_fee: from_lamports(assembly.flash_loan.fee, decimals)?,
            flash_repaid: from_lamports(assembly.flash_loan.repay_amount, decimals)?,
            swap_in: assembly.swap_in,
            swap_expected_out: leg.out_amount,
            swap_min_out: assembly.swap_min_out,
            projected_ltv: stats.ltv,
            projected_max_ltv: stats.max_ltv,
            projected_leverage: stats.leverage(),
        };

        self.observer.on_event(&MultiplyEvent::BundleAssembled(BundleAssembled {
            operation: op.kind(),
            instructions: assembly.instructions.len(),
            flash_borrow_index: assembly.flash_borrow_index,
            lookup_tables: lookup_tables.len(),
        }));

        Ok(LeverageBundle {
            instructions: assembly.instructions,
            lookup_tables,
            flash_loan: assembly.flash_loan,
            flash_borrow_index: assembly.flash_borrow_index,
            swap_inputs: swap_inputs.clone(),
            quote: quote.quote_response,
            projected_obligation: assembly.projected,
            simulation,
        })
    }
}
