use anchor_lang::prelude::Pubkey;
use async_trait::async_trait;

use crate::errors::{MultiplyError, MultiplyResult};
use crate::state::{Market, Obligation};

/// Read access to deserialized klend accounts at a fixed slot
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Slot every load of this provider is pinned to
    fn slot(&self) -> u64;

    async fn load_market(&self, market: &Pubkey) -> MultiplyResult<Market>;

    async fn load_obligation(&self, obligation: &Pubkey) -> MultiplyResult<Obligation>;
}

/// Market and obligation read at the same slot
#[derive(Clone, Debug, PartialEq)]
pub struct PinnedSnapshot {
    pub slot: u64,
    pub market: Market,
    pub obligation: Obligation,
}

impl PinnedSnapshot {
    pub async fn load(
        provider: &dyn SnapshotProvider,
        market: &Pubkey,
        obligation: &Pubkey,
    ) -> MultiplyResult<Self> {
        let slot = provider.slot();
        let (market, obligation) = futures::try_join!(
            provider.load_market(market),
            provider.load_obligation(obligation)
        )?;

        crate::require!(
            obligation.lending_market == market.address,
            MultiplyError::SnapshotUnavailable(format!(
                "obligation {} belongs to market {}, not {}",
                obligation.address, obligation.lending_market, market.address
            ))
        );
        let reserves = obligation
            .deposit_reserves()
            .into_iter()
            .chain(obligation.borrow_reserves());
        for reserve in reserves {
            crate::require!(
                market.reserve(&reserve).is_ok(),
                MultiplyError::SnapshotUnavailable(format!(
                    "obligation {} uses reserve {} missing from market {}",
                    obligation.address, reserve, market.address
                ))
            );
        }

        Ok(Self {
            slot,
            market,
            obligation,
        })
    }
}
