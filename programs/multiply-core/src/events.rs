use anchor_lang::prelude::Pubkey;
use rust_decimal::Decimal;

/// Progress reported while an operation moves through probe, quote and commit
#[derive(Clone, Debug, PartialEq)]
pub enum MultiplyEvent {
    ProbeCompleted(ProbeCompleted),
    QuoteReceived(QuoteReceived),
    AmountsCommitted(AmountsCommitted),
    ValidationPassed(ValidationPassed),
    SwapInputCapped(SwapInputCapped),
    BundleAssembled(BundleAssembled),
    WsolWrapPlanned(WsolWrapPlanned),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProbeCompleted {
    pub operation: &'static str,
    pub obligation: Pubkey,
    pub instructions: usize,
    pub touched_accounts: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuoteReceived {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub input_amount: Decimal,
    /// Output tokens per input token
    pub price: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AmountsCommitted {
    pub operation: &'static str,
    pub flash_borrow_amount: u64,
    pub swap_in_amount: Decimal,
    pub min_out_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationPassed {
    pub obligation: Pubkey,
    pub elevation_group: u8,
    pub ltv: Decimal,
    pub max_ltv: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwapInputCapped {
    pub requested: Decimal,
    pub capped: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BundleAssembled {
    pub operation: &'static str,
    pub instructions: usize,
    pub flash_borrow_index: u8,
    pub lookup_tables: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WsolWrapPlanned {
    pub native_balance: u64,
    pub lamports: u64,
}

/// Receives engine progress; injected instead of printing
pub trait MultiplyObserver: Send + Sync {
    fn on_event(&self, event: &MultiplyEvent);
}

/// Forwards events to `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl MultiplyObserver for TracingObserver {
    fn on_event(&self, event: &MultiplyEvent) {
        match event {
            MultiplyEvent::ProbeCompleted(e) => tracing::debug!(
                operation = e.operation,
                obligation = %e.obligation,
                instructions = e.instructions,
                touched_accounts = e.touched_accounts,
                "probe completed"
            ),
            MultiplyEvent::QuoteReceived(e) => tracing::info!(
                input_mint = %e.input_mint,
                output_mint = %e.output_mint,
                input_amount = %e.input_amount,
                price = %e.price,
                "quote received"
            ),
            MultiplyEvent::AmountsCommitted(e) => tracing::info!(
                operation = e.operation,
                flash_borrow_amount = e.flash_borrow_amount,
                swap_in_amount = %e.swap_in_amount,
                min_out_amount = %e.min_out_amount,
                "amounts committed"
            ),
            MultiplyEvent::ValidationPassed(e) => tracing::debug!(
                obligation = %e.obligation,
                elevation_group = e.elevation_group,
                ltv = %e.ltv,
                max_ltv = %e.max_ltv,
                "projected obligation valid"
            ),
            MultiplyEvent::SwapInputCapped(e) => tracing::warn!(
                requested = %e.requested,
                capped = %e.capped,
                "swap input capped at withdrawable collateral"
            ),
            MultiplyEvent::BundleAssembled(e) => tracing::info!(
                operation = e.operation,
                instructions = e.instructions,
                flash_borrow_index = e.flash_borrow_index,
                lookup_tables = e.lookup_tables,
                "bundle assembled"
            ),
            MultiplyEvent::WsolWrapPlanned(e) => tracing::debug!(
                native_balance = e.native_balance,
                lamports = e.lamports,
                "wrapping native SOL"
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl MultiplyObserver for NoopObserver {
    fn on_event(&self, _event: &MultiplyEvent) {}
}
