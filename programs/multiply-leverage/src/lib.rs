//! Leveraged klend positions in one atomic bundle.
//!
//! The calculator derives amounts, operations turn them into flash-loan
//! wrapped lending steps, and [`MultiplyEngine`] runs the probe, quote and
//! commit passes against injected swap providers.

pub mod adjust;
pub mod builder;
pub mod calcs;
pub mod deposit;
pub mod pipeline;
pub mod repay_with_collateral;
pub mod strategy;
pub mod swap_collateral;
pub mod types;
pub mod validator;
pub mod withdraw;

#[cfg(test)]
pub(crate) mod test_utils;

pub use adjust::*;
pub use builder::*;
pub use calcs::*;
pub use deposit::*;
pub use pipeline::*;
pub use repay_with_collateral::*;
pub use strategy::*;
pub use swap_collateral::*;
pub use types::*;
pub use validator::*;
pub use withdraw::*;

use multiply_core::{MultiplyResult, PinnedSnapshot};

impl<'a, Q: Clone + Send + Sync> MultiplyEngine<'a, Q> {
    /// Deposit, withdraw/close or adjust, per `request.action`
    pub async fn leverage(
        &self,
        snapshot: &PinnedSnapshot,
        request: &LeverageRequest,
    ) -> MultiplyResult<Vec<LeverageBundle<Q>>> {
        match request.action {
            LeverageAction::Deposit { .. } => {
                self.execute(snapshot, &DepositWithLeverage::from_request(request)?)
                    .await
            }
            LeverageAction::Withdraw { .. } => {
                self.execute(snapshot, &WithdrawWithLeverage::from_request(request)?)
                    .await
            }
            LeverageAction::Adjust { .. } => {
                self.execute(snapshot, &AdjustLeverage::from_request(request)?)
                    .await
            }
        }
    }

    pub async fn swap_collateral(
        &self,
        snapshot: &PinnedSnapshot,
        op: &SwapCollateral,
    ) -> MultiplyResult<Vec<LeverageBundle<Q>>> {
        self.execute(snapshot, op).await
    }

    pub async fn repay_with_collateral(
        &self,
        snapshot: &PinnedSnapshot,
        op: &RepayWithCollateral,
    ) -> MultiplyResult<Vec<LeverageBundle<Q>>> {
        self.execute(snapshot, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_lang::prelude::Pubkey;
    use multiply_core::{
        compute_budget, ElevationGroupCondition, ErrorKind, Market, MultiplyConfig, MultiplyError, MultiplyEvent,
        Obligation,
    };
    use multiply_flash::{is_flash_borrow, repay_borrow_index};
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::test_utils::{
        levered_sol_usdc, market, obligation_with, reserve, snapshot, sol_usdc_market, FailingQuoter, FixedQuoter,
        FixedSwapper, RecordingObserver, SWAP_IX_DATA,
    };

    fn deposit_request(coll: Pubkey, debt: Pubkey, target_leverage: Decimal) -> LeverageRequest {
        LeverageRequest {
            collateral_mint: coll,
            debt_mint: debt,
            action: LeverageAction::Deposit {
                amount: dec!(10),
                selected_mint: coll,
                target_leverage,
            },
            slippage_pct: dec!(0.5),
            elevation_group_target: None,
            strategy: CollateralStrategy::Direct,
            native_balance: 0,
        }
    }

    /// SOL/USDC with group 1, plus JUP ($1, 50% LTV) outside every group
    fn market_with_ungrouped_collateral() -> (Market, Obligation) {
        let (base, _) = sol_usdc_market();
        let mut reserves = base.reserves.clone();
        reserves.push(reserve("JUP", dec!(1), 6, 50));
        let market = market(reserves, base.elevation_groups.clone());
        let obligation = obligation_with(&market, &[], &[]);
        (market, obligation)
    }

    #[tokio::test]
    async fn test_deposit_one_bundle_per_route() {
        let (market, obligation) = sol_usdc_market();
        let (sol, usdc) = (market.reserves[0].liquidity_mint, market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);

        let quoter = FixedQuoter::new(dec!(0.01));
        let swapper = FixedSwapper {
            routes: 2,
            output_amount_lamports: None,
        };
        let observer = RecordingObserver::default();
        let config = MultiplyConfig {
            quote_buffer_bps: 100,
            ..Default::default()
        };
        let engine = MultiplyEngine::<String>::new(config, &quoter, &swapper)
            .unwrap()
            .with_observer(&observer);

        let bundles = engine
            .leverage(&snapshot, &deposit_request(sol, usdc, dec!(3)))
            .await
            .unwrap();
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].quote, "route-0");
        assert_eq!(bundles[1].lookup_tables.len(), 2);

        for bundle in &bundles {
            let ixs = &bundle.instructions;
            // Only the engine's own budget step survives
            let budget: Vec<_> = ixs
                .iter()
                .enumerate()
                .filter(|(_, ix)| ix.program_id == compute_budget::ID)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(budget, vec![0]);
            assert!(ixs.iter().any(|ix| ix.data == vec![SWAP_IX_DATA]));

            let index = bundle.flash_borrow_index;
            assert!(is_flash_borrow(&ixs[index as usize]));
            assert_eq!(repay_borrow_index(ixs.last().unwrap()), Some(index));
            assert_eq!(
                bundle.flash_loan.borrow_amount + bundle.flash_loan.fee,
                bundle.flash_loan.repay_amount
            );
            assert!(bundle.simulation.projected_ltv <= bundle.simulation.projected_max_ltv);
        }

        // Quoted for the buffered input, without a min-out
        let calls = quoter.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let committed = bundles[0].swap_inputs.input_amount_lamports;
        assert_eq!(
            calls[0].input_amount_lamports,
            (Decimal::from(committed) * dec!(1.01)).ceil().to_u64().unwrap()
        );
        assert_eq!(calls[0].min_out_amount_lamports, None);

        let events = observer.events();
        assert!(matches!(events[0], MultiplyEvent::ProbeCompleted(_)));
        assert!(matches!(events[1], MultiplyEvent::QuoteReceived(_)));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, MultiplyEvent::BundleAssembled(_)))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_quote_failure_propagates() {
        let (market, obligation) = sol_usdc_market();
        let (sol, usdc) = (market.reserves[0].liquidity_mint, market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);
        let swapper = FixedSwapper {
            routes: 1,
            output_amount_lamports: None,
        };
        let engine = MultiplyEngine::<String>::new(MultiplyConfig::default(), &FailingQuoter, &swapper).unwrap();

        let err = engine
            .leverage(&snapshot, &deposit_request(sol, usdc, dec!(3)))
            .await
            .unwrap_err();
        assert_eq!(err, MultiplyError::QuoteUnavailable("no liquidity".to_string()));
        assert_eq!(err.kind(), ErrorKind::QuoteUnavailable);
    }

    #[tokio::test]
    async fn test_non_positive_price_rejected() {
        let (market, obligation) = sol_usdc_market();
        let (sol, usdc) = (market.reserves[0].liquidity_mint, market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);
        let quoter = FixedQuoter::new(Decimal::ZERO);
        let swapper = FixedSwapper {
            routes: 1,
            output_amount_lamports: None,
        };
        let engine = MultiplyEngine::<String>::new(MultiplyConfig::default(), &quoter, &swapper).unwrap();

        let err = engine
            .leverage(&snapshot, &deposit_request(sol, usdc, dec!(3)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuoteUnavailable);
    }

    #[tokio::test]
    async fn test_no_routes() {
        let (market, obligation) = sol_usdc_market();
        let (sol, usdc) = (market.reserves[0].liquidity_mint, market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);
        let quoter = FixedQuoter::new(dec!(0.01));
        let swapper = FixedSwapper {
            routes: 0,
            output_amount_lamports: None,
        };
        let engine = MultiplyEngine::<String>::new(MultiplyConfig::default(), &quoter, &swapper).unwrap();

        let err = engine
            .leverage(&snapshot, &deposit_request(sol, usdc, dec!(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, MultiplyError::SwapUnavailable(_)));
        assert_eq!(err.kind(), ErrorKind::External);
    }

    #[tokio::test]
    async fn test_over_levered_deposit_rejected() {
        let (market, obligation) = sol_usdc_market();
        let (sol, usdc) = (market.reserves[0].liquidity_mint, market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);
        let quoter = FixedQuoter::new(dec!(0.01));
        let swapper = FixedSwapper {
            routes: 1,
            output_amount_lamports: None,
        };
        let observer = RecordingObserver::default();
        let engine = MultiplyEngine::<String>::new(MultiplyConfig::default(), &quoter, &swapper)
            .unwrap()
            .with_observer(&observer);

        // 10x needs 90% LTV, SOL allows 75% outside the group
        let err = engine
            .leverage(&snapshot, &deposit_request(sol, usdc, dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, MultiplyError::LtvExceeded { .. }));
        assert_eq!(err.kind(), ErrorKind::ProjectedInvariantViolation);
        assert!(!observer
            .events()
            .iter()
            .any(|e| matches!(e, MultiplyEvent::BundleAssembled(_))));
    }

    #[tokio::test]
    async fn test_close_position() {
        let (market, obligation) = levered_sol_usdc();
        let (sol, usdc) = (market.reserves[0].liquidity_mint, market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);
        let quoter = FixedQuoter::new(dec!(100));
        let swapper = FixedSwapper {
            routes: 1,
            output_amount_lamports: Some(200_500_000),
        };
        let engine = MultiplyEngine::<String>::new(MultiplyConfig::default(), &quoter, &swapper).unwrap();

        let request = LeverageRequest {
            collateral_mint: sol,
            debt_mint: usdc,
            action: LeverageAction::Withdraw {
                amount: Decimal::ZERO,
                selected_mint: sol,
                is_closing: true,
            },
            slippage_pct: dec!(0.5),
            elevation_group_target: None,
            strategy: CollateralStrategy::Direct,
            native_balance: 0,
        };
        let bundles = engine.leverage(&snapshot, &request).await.unwrap();
        assert_eq!(bundles.len(), 1);
        let bundle = &bundles[0];
        assert!(bundle.projected_obligation.is_empty());
        assert_eq!(bundle.simulation.swap_expected_out, dec!(200.5));
        assert_eq!(bundle.simulation.flash_borrowed, dec!(200.2));
        assert_eq!(bundle.simulation.projected_ltv, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_repay_with_collateral_quotes_capped_input() {
        let (market, obligation) = levered_sol_usdc();
        let (sol, usdc) = (market.reserves[0].liquidity_mint, market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);
        let quoter = FixedQuoter::new(dec!(100));
        let swapper = FixedSwapper {
            routes: 1,
            output_amount_lamports: None,
        };
        let engine = MultiplyEngine::<String>::new(MultiplyConfig::default(), &quoter, &swapper).unwrap();

        let op = RepayWithCollateral::new(sol, usdc, dec!(100), false).unwrap();
        let bundles = engine.repay_with_collateral(&snapshot, &op).await.unwrap();
        // Oracle cap: 100 USDC of SOL plus 10%
        assert_eq!(quoter.calls.lock().unwrap()[0].input_amount_lamports, 1_100_000_000);
        assert_eq!(bundles[0].swap_inputs.input_amount_lamports, 1_001_000_000);
        assert_eq!(bundles[0].swap_inputs.min_out_amount_lamports, Some(100_100_000));
    }

    #[tokio::test]
    async fn test_ineligible_collateral_fails_group_before_ltv() {
        let (market, obligation) = market_with_ungrouped_collateral();
        let (jup, usdc) = (market.reserves[2].clone(), market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);
        let quoter = FixedQuoter::new(dec!(1));
        let swapper = FixedSwapper {
            routes: 1,
            output_amount_lamports: None,
        };
        let engine = MultiplyEngine::<String>::new(MultiplyConfig::default(), &quoter, &swapper).unwrap();

        // 3x needs ~67% LTV; JUP allows 50% on its own
        let request = deposit_request(jup.liquidity_mint, usdc, dec!(3));
        let err = engine.leverage(&snapshot, &request).await.unwrap_err();
        assert!(matches!(err, MultiplyError::LtvExceeded { .. }));

        // Group 1 would allow 90%, but JUP is not its collateral
        let grouped = LeverageRequest {
            elevation_group_target: Some(1),
            ..request
        };
        let err = engine.leverage(&snapshot, &grouped).await.unwrap_err();
        assert_eq!(
            err,
            MultiplyError::ElevationGroupIneligible {
                group: 1,
                condition: ElevationGroupCondition::CollateralNotEligible { reserve: jup.address },
            }
        );
        assert_eq!(err.kind(), ErrorKind::ProjectedInvariantViolation);
    }

    #[tokio::test]
    async fn test_deposit_into_elevation_group() {
        let (market, obligation) = sol_usdc_market();
        let (sol, usdc) = (market.reserves[0].liquidity_mint, market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);
        let quoter = FixedQuoter::new(dec!(0.01));
        let swapper = FixedSwapper {
            routes: 1,
            output_amount_lamports: None,
        };
        let engine = MultiplyEngine::<String>::new(MultiplyConfig::default(), &quoter, &swapper).unwrap();

        // Over the 75% plain LTV, under group 1's 90%
        let request = LeverageRequest {
            elevation_group_target: Some(1),
            ..deposit_request(sol, usdc, dec!(5))
        };
        let bundles = engine.leverage(&snapshot, &request).await.unwrap();
        let bundle = &bundles[0];
        assert_eq!(bundle.projected_obligation.elevation_group, 1);
        assert!((bundle.simulation.projected_max_ltv - dec!(0.9)).abs() < dec!(0.000001));
        assert!(bundle.simulation.projected_ltv > dec!(0.75));
        assert!(bundle.simulation.projected_leverage > dec!(4.9));
    }

    #[tokio::test]
    async fn test_disabled_flash_loans_fail_before_quote() {
        let (mut market, obligation) = sol_usdc_market();
        market.reserves[0].flash_loan_fee_sf = multiply_core::U64_MAX;
        let (sol, usdc) = (market.reserves[0].clone(), market.reserves[1].liquidity_mint);
        let snapshot = snapshot(market, obligation);
        let quoter = FixedQuoter::new(dec!(0.01));
        let swapper = FixedSwapper {
            routes: 1,
            output_amount_lamports: None,
        };
        let engine = MultiplyEngine::<String>::new(MultiplyConfig::default(), &quoter, &swapper).unwrap();

        let err = engine
            .leverage(&snapshot, &deposit_request(sol.liquidity_mint, usdc, dec!(3)))
            .await
            .unwrap_err();
        assert_eq!(err, MultiplyError::FlashLoansDisabled(sol.address));
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(quoter.calls.lock().unwrap().is_empty());
    }
}
