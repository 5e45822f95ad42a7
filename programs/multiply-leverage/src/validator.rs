use multiply_core::{
    ElevationGroup, ElevationGroupCondition, Market, MultiplyError, MultiplyResult, Obligation,
    ObligationStats,
};

/// Elevation group membership rules for `obligation`
pub fn check_elevation_group(group: &ElevationGroup, obligation: &Obligation) -> MultiplyResult<()> {
    let ineligible = |condition| MultiplyError::ElevationGroupIneligible {
        group: group.id,
        condition,
    };

    let debt_reserves = obligation.borrow_reserves();
    if debt_reserves.len() > 1 {
        return Err(ineligible(ElevationGroupCondition::MultipleDebtReserves {
            count: debt_reserves.len(),
        }));
    }
    if let Some(debt_reserve) = debt_reserves.first() {
        if *debt_reserve != group.debt_reserve {
            return Err(ineligible(ElevationGroupCondition::DebtReserveMismatch {
                debt_reserve: *debt_reserve,
                expected: group.debt_reserve,
            }));
        }
    }

    for deposit in &obligation.deposits {
        if !group.is_eligible_collateral(&deposit.deposit_reserve) {
            return Err(ineligible(ElevationGroupCondition::CollateralNotEligible {
                reserve: deposit.deposit_reserve,
            }));
        }
    }

    if obligation.deposits.len() > group.max_reserves_as_collateral as usize {
        return Err(ineligible(ElevationGroupCondition::TooManyCollateralReserves {
            count: obligation.deposits.len(),
            max: group.max_reserves_as_collateral,
        }));
    }
    Ok(())
}

/// Group rules first, then LTV against the group's max LTV
pub fn validate_projected(market: &Market, obligation: &Obligation) -> MultiplyResult<ObligationStats> {
    if let Some(group) = market.elevation_group(obligation.elevation_group)? {
        check_elevation_group(group, obligation)?;
    }

    let stats = market.obligation_stats(obligation, obligation.elevation_group)?;
    multiply_core::require!(
        stats.ltv <= stats.max_ltv,
        MultiplyError::LtvExceeded {
            ltv: stats.ltv,
            max_ltv: stats.max_ltv,
        }
    );
    Ok(stats)
}
