//! Position calculator.
//!
//! Pure functions over whole-token `Decimal` amounts. Prices are named by
//! direction: `price_debt_to_coll` is collateral tokens per debt token,
//! `price_coll_to_debt` its inverse. Fees and slippage are fractions
//! (0.001 = 0.1%) unless the name says `_pct`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use multiply_core::math::{ceil_to_decimals, checked_div, checked_mul, floor_to_decimals, one_plus_pct};
use multiply_core::{apply_interest_buffer, Market, MultiplyError, MultiplyResult, Obligation, Reserve};

/// Margin dividing the repayable estimate so the swap leaves a little spare debt token
const REPAY_ESTIMATE_MARGIN: Decimal = dec!(1.01);

/// Collateral and debt side of a position, in tokens
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PositionAmounts {
    pub deposit: Decimal,
    pub borrow: Decimal,
}

fn require_positive(amount: Decimal) -> MultiplyResult<()> {
    multiply_core::require!(amount > Decimal::ZERO, MultiplyError::InvalidAmount(amount));
    Ok(())
}

/// `deposit - borrow / price`, in collateral tokens
pub fn net_position(deposit: Decimal, borrow: Decimal, price_coll_to_debt: Decimal) -> MultiplyResult<Decimal> {
    Ok(deposit - checked_div(borrow, price_coll_to_debt)?)
}

/// deposit / net; zero for an empty position
pub fn current_leverage(deposit: Decimal, borrow: Decimal, price_coll_to_debt: Decimal) -> MultiplyResult<Decimal> {
    if deposit.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let net = net_position(deposit, borrow, price_coll_to_debt)?;
    multiply_core::require!(net > Decimal::ZERO, MultiplyError::InvalidAmount(net));
    checked_div(deposit, net)
}

/// Debt needed to lever `deposit_in_coll` to `target_leverage`
pub fn calc_borrow_amount(
    deposit_in_coll: Decimal,
    target_leverage: Decimal,
    price_coll_to_debt: Decimal,
    flash_loan_fee: Decimal,
) -> MultiplyResult<Decimal> {
    let extra_collateral = checked_mul(deposit_in_coll, target_leverage)? - deposit_in_coll;
    checked_mul(
        checked_mul(extra_collateral, price_coll_to_debt)?,
        Decimal::ONE + flash_loan_fee,
    )
}

/// Quick deposit estimate (final collateral, debt) for display
pub fn estimate_deposit_mode(
    amount: Decimal,
    deposit_is_collateral: bool,
    target_leverage: Decimal,
    price_debt_to_coll: Decimal,
    flash_loan_fee: Decimal,
    slippage: Decimal,
) -> MultiplyResult<PositionAmounts> {
    let deposit_in_coll = if deposit_is_collateral {
        amount
    } else {
        checked_mul(amount, price_debt_to_coll)?
    };
    let price_coll_to_debt = checked_div(Decimal::ONE, price_debt_to_coll)?;
    let borrow = calc_borrow_amount(deposit_in_coll, target_leverage, price_coll_to_debt, flash_loan_fee)?;

    Ok(PositionAmounts {
        deposit: checked_mul(deposit_in_coll, target_leverage)?,
        borrow: checked_mul(borrow, Decimal::ONE + slippage)?,
    })
}

/// Signed deltas moving (deposit, borrow) to `target_leverage`;
/// both positive increases, both negative decreases
pub fn calc_adjust_amounts(
    deposit: Decimal,
    borrow: Decimal,
    target_leverage: Decimal,
    price_coll_to_debt: Decimal,
    flash_loan_fee: Decimal,
) -> MultiplyResult<PositionAmounts> {
    let initial = net_position(deposit, borrow, price_coll_to_debt)?;
    let target_deposit = checked_mul(initial, target_leverage)?;
    let target_borrow = calc_borrow_amount(initial, target_leverage, price_coll_to_debt, flash_loan_fee)?;

    Ok(PositionAmounts {
        deposit: target_deposit - deposit,
        borrow: target_borrow - borrow,
    })
}

/// (collateral to withdraw, debt to repay) taking `amount` out at constant leverage
pub fn calc_withdraw_amounts(
    deposit: Decimal,
    borrow: Decimal,
    amount: Decimal,
    amount_in_coll: bool,
    price_coll_to_debt: Decimal,
) -> MultiplyResult<PositionAmounts> {
    let initial = net_position(deposit, borrow, price_coll_to_debt)?;
    multiply_core::require!(initial > Decimal::ZERO, MultiplyError::InvalidAmount(initial));
    let leverage = checked_div(deposit, initial)?;

    let withdraw_in_coll = if amount_in_coll {
        amount
    } else {
        checked_div(amount, price_coll_to_debt)?
    };
    let remaining = initial - withdraw_in_coll;
    multiply_core::require!(remaining >= Decimal::ZERO, MultiplyError::InvalidAmount(amount));

    let target_deposit = checked_mul(remaining, leverage)?;
    let target_borrow = calc_borrow_amount(remaining, leverage, price_coll_to_debt, Decimal::ZERO)?;

    Ok(PositionAmounts {
        deposit: deposit - target_deposit,
        borrow: (borrow - target_borrow).max(Decimal::ZERO),
    })
}

// ========== DEPOSIT ==========

/// Committed amounts of a leveraged deposit
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepositCalcs {
    /// Collateral deposited into the obligation
    pub final_collateral: Decimal,
    /// Debt borrowed from the obligation
    pub borrow: Decimal,
    /// Flash borrowed, in collateral (direct) or debt (wrapped) tokens
    pub flash_borrow: Decimal,
    /// Debt tokens sold
    pub swap_in: Decimal,
    /// Collateral tokens the swap must return
    pub swap_min_out: Decimal,
}

struct DepositTerms {
    x: Decimal,
    y: Decimal,
    denominator: Decimal,
}

fn deposit_terms(
    target_leverage: Decimal,
    price_debt_to_coll: Decimal,
    flash_loan_fee: Decimal,
    slippage: Decimal,
) -> MultiplyResult<DepositTerms> {
    multiply_core::require!(
        target_leverage > Decimal::ONE,
        MultiplyError::InvalidLeverage {
            target: target_leverage,
            current: Decimal::ONE,
        }
    );
    require_positive(price_debt_to_coll)?;

    let x = checked_div(
        checked_mul(Decimal::ONE + flash_loan_fee, Decimal::ONE + slippage)?,
        price_debt_to_coll,
    )?;
    let y = checked_mul(target_leverage, price_debt_to_coll)?;
    let denominator = x - checked_div(target_leverage - Decimal::ONE, y)?;
    multiply_core::require!(
        denominator > Decimal::ZERO,
        MultiplyError::InvalidLeverage {
            target: target_leverage,
            current: Decimal::ONE,
        }
    );
    Ok(DepositTerms { x, y, denominator })
}

/// Flash-borrow collateral, deposit, borrow, buy the collateral back
pub fn deposit_leverage_calcs(
    amount: Decimal,
    deposit_is_collateral: bool,
    target_leverage: Decimal,
    price_debt_to_coll: Decimal,
    flash_loan_fee: Decimal,
    slippage: Decimal,
) -> MultiplyResult<DepositCalcs> {
    require_positive(amount)?;
    let DepositTerms { x, y, denominator } =
        deposit_terms(target_leverage, price_debt_to_coll, flash_loan_fee, slippage)?;

    if deposit_is_collateral {
        let final_collateral = checked_div(checked_mul(amount, x)?, denominator)?;
        let flash_borrow = final_collateral - amount;
        let borrow = checked_mul(flash_borrow, x)?;
        Ok(DepositCalcs {
            final_collateral,
            borrow,
            flash_borrow,
            swap_in: borrow,
            swap_min_out: checked_mul(flash_borrow, Decimal::ONE + flash_loan_fee)?,
        })
    } else {
        let final_collateral = checked_div(amount, denominator)?;
        let borrow = checked_div(checked_mul(target_leverage - Decimal::ONE, final_collateral)?, y)?;
        Ok(DepositCalcs {
            final_collateral,
            borrow,
            flash_borrow: final_collateral,
            swap_in: borrow + amount,
            swap_min_out: checked_mul(final_collateral, Decimal::ONE + flash_loan_fee)?,
        })
    }
}

/// Flash-borrow debt, buy the collateral first, deposit, borrow to repay
pub fn wrapped_deposit_leverage_calcs(
    amount: Decimal,
    deposit_is_collateral: bool,
    target_leverage: Decimal,
    price_debt_to_coll: Decimal,
    flash_loan_fee: Decimal,
    slippage: Decimal,
) -> MultiplyResult<DepositCalcs> {
    require_positive(amount)?;
    let DepositTerms { x, y: _, denominator } =
        deposit_terms(target_leverage, price_debt_to_coll, flash_loan_fee, slippage)?;
    let one_plus_fee = Decimal::ONE + flash_loan_fee;

    if deposit_is_collateral {
        let final_collateral = checked_div(checked_mul(amount, x)?, denominator)?;
        let borrow = checked_mul(final_collateral - amount, x)?;
        let flash_borrow = checked_div(borrow, one_plus_fee)?;
        Ok(DepositCalcs {
            final_collateral,
            borrow,
            flash_borrow,
            swap_in: flash_borrow,
            swap_min_out: final_collateral - amount,
        })
    } else {
        let final_collateral = checked_div(checked_mul(amount, one_plus_fee)?, denominator)?;
        let swap_in = checked_div(
            checked_mul(final_collateral, Decimal::ONE + slippage)?,
            price_debt_to_coll,
        )?;
        let flash_borrow = swap_in - amount;
        Ok(DepositCalcs {
            final_collateral,
            borrow: checked_mul(flash_borrow, one_plus_fee)?,
            flash_borrow,
            swap_in,
            swap_min_out: final_collateral,
        })
    }
}

// ========== WITHDRAW ==========

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WithdrawCalcs {
    /// Collateral taken out of the obligation
    pub withdraw: Decimal,
    /// Debt repaid, interest buffer included
    pub repay: Decimal,
    /// Collateral sold for debt
    pub swap_in: Decimal,
    pub swap_expected_out: Decimal,
}

/// Accrual inputs for the interest buffer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterestBuffer {
    pub accrual_ratio: Decimal,
    pub margin: Decimal,
    pub debt_decimals: u8,
}

/// Decrease at constant leverage, or close. Closing takes the whole position
/// and never touches the net-position formulas.
#[allow(clippy::too_many_arguments)]
pub fn withdraw_leverage_calcs(
    current: PositionAmounts,
    amount: Decimal,
    amount_in_coll: bool,
    is_closing: bool,
    price_coll_to_debt: Decimal,
    flash_loan_fee: Decimal,
    slippage: Decimal,
    buffer: InterestBuffer,
) -> MultiplyResult<WithdrawCalcs> {
    require_positive(price_coll_to_debt)?;
    let (withdraw, initial_repay) = if is_closing {
        (current.deposit, current.borrow)
    } else {
        require_positive(amount)?;
        let delta = calc_withdraw_amounts(
            current.deposit,
            current.borrow,
            amount,
            amount_in_coll,
            price_coll_to_debt,
        )?;
        (delta.deposit, delta.borrow)
    };

    let repay = apply_interest_buffer(
        initial_repay,
        buffer.accrual_ratio,
        buffer.margin,
        buffer.debt_decimals,
    )?;
    let one_plus_fee = Decimal::ONE + flash_loan_fee;
    let one_plus_slippage = Decimal::ONE + slippage;

    let withdraw_with_fee = if is_closing {
        withdraw
    } else {
        checked_mul(withdraw, one_plus_fee)?
    };
    let swap_in = if amount_in_coll {
        checked_div(
            checked_mul(checked_mul(repay, one_plus_fee)?, one_plus_slippage)?,
            price_coll_to_debt,
        )?
    } else {
        withdraw
    };

    Ok(WithdrawCalcs {
        withdraw: withdraw_with_fee,
        repay,
        swap_in,
        swap_expected_out: checked_div(checked_mul(swap_in, price_coll_to_debt)?, one_plus_slippage)?,
    })
}

// ========== ADJUST ==========

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdjustDirection {
    Increase,
    Decrease,
}

/// Direction of signed adjust deltas; mixed or zero deltas are rejected
pub fn adjust_direction(
    deltas: PositionAmounts,
    target_leverage: Decimal,
    current_leverage: Decimal,
) -> MultiplyResult<AdjustDirection> {
    let invalid = MultiplyError::InvalidLeverage {
        target: target_leverage,
        current: current_leverage,
    };
    multiply_core::require!(target_leverage > Decimal::ONE, invalid);

    let direction = match (
        deltas.deposit.is_sign_positive() && !deltas.deposit.is_zero(),
        deltas.borrow.is_sign_positive() && !deltas.borrow.is_zero(),
    ) {
        (true, true) => AdjustDirection::Increase,
        (false, false) if !deltas.deposit.is_zero() && !deltas.borrow.is_zero() => AdjustDirection::Decrease,
        (false, false) => return Err(invalid),
        _ => {
            return Err(MultiplyError::MixedAdjustDirection {
                deposit_delta: deltas.deposit,
                borrow_delta: deltas.borrow,
            })
        }
    };

    let expected = if target_leverage > current_leverage {
        AdjustDirection::Increase
    } else {
        AdjustDirection::Decrease
    };
    multiply_core::require!(direction == expected, invalid);
    Ok(direction)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AdjustIncreaseCalcs {
    /// Collateral flash borrowed and deposited
    pub deposit: Decimal,
    /// Debt borrowed and sold for collateral
    pub borrow: Decimal,
}

pub fn adjust_increase_calcs(
    deposit_delta: Decimal,
    price_debt_to_coll: Decimal,
    flash_loan_fee: Decimal,
    slippage: Decimal,
) -> MultiplyResult<AdjustIncreaseCalcs> {
    require_positive(deposit_delta)?;
    let borrow = checked_div(
        checked_mul(
            checked_mul(deposit_delta, Decimal::ONE + flash_loan_fee)?,
            Decimal::ONE + slippage,
        )?,
        price_debt_to_coll,
    )?;
    Ok(AdjustIncreaseCalcs {
        deposit: deposit_delta,
        borrow,
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AdjustDecreaseCalcs {
    /// Debt flash borrowed and repaid
    pub repay: Decimal,
    /// Collateral withdrawn and sold for debt
    pub withdraw: Decimal,
}

/// Deltas are magnitudes here
pub fn adjust_decrease_calcs(
    deposit_delta: Decimal,
    borrow_delta: Decimal,
    flash_loan_fee: Decimal,
    slippage: Decimal,
) -> MultiplyResult<AdjustDecreaseCalcs> {
    require_positive(deposit_delta)?;
    require_positive(borrow_delta)?;
    let withdraw = checked_mul(
        checked_mul(deposit_delta, Decimal::ONE + flash_loan_fee)?,
        Decimal::ONE + slippage,
    )?;
    Ok(AdjustDecreaseCalcs {
        repay: borrow_delta,
        withdraw,
    })
}

// ========== REPAY WITH COLLATERAL ==========

/// Debt a given collateral amount can repay after swap, fee and accrual
pub fn estimate_debt_repayment_with_coll(
    collateral: Decimal,
    price_debt_to_coll: Decimal,
    slippage_pct: Decimal,
    flash_loan_fee_pct: Decimal,
    accrual_ratio: Decimal,
    debt_decimals: u8,
) -> MultiplyResult<Decimal> {
    let debt_after_swap = checked_div(
        checked_div(collateral, one_plus_pct(slippage_pct))?,
        price_debt_to_coll,
    )?;
    let debt_after_fee = checked_div(debt_after_swap, one_plus_pct(flash_loan_fee_pct))?;
    let repayable = checked_div(
        debt_after_fee,
        checked_mul(accrual_ratio.max(Decimal::ONE), REPAY_ESTIMATE_MARGIN)?,
    )?;
    Ok(ceil_to_decimals(repayable, debt_decimals))
}

pub fn estimate_coll_needed_for_debt_repayment(
    debt: Decimal,
    price_debt_to_coll: Decimal,
    slippage_pct: Decimal,
    flash_loan_fee_pct: Decimal,
) -> MultiplyResult<Decimal> {
    checked_mul(
        checked_mul(
            checked_mul(debt, one_plus_pct(flash_loan_fee_pct))?,
            one_plus_pct(slippage_pct),
        )?,
        price_debt_to_coll,
    )
}

/// Liquidity tokens behind the obligation's deposit in `reserve`
pub fn deposited_tokens(reserve: &Reserve, obligation: &Obligation) -> MultiplyResult<Decimal> {
    match obligation.deposit(&reserve.address) {
        Some(deposit) => {
            let lamports = reserve.collateral_to_liquidity(Decimal::from(deposit.deposited_amount))?;
            checked_div(lamports, multiply_core::math::mint_factor(reserve.liquidity_decimals)?)
        }
        None => Ok(Decimal::ZERO),
    }
}

/// Borrowed tokens of the obligation in `reserve`
pub fn borrowed_tokens(reserve: &Reserve, obligation: &Obligation) -> MultiplyResult<Decimal> {
    match obligation.borrow(&reserve.address) {
        Some(borrow) => checked_div(
            borrow.borrowed_amount,
            multiply_core::math::mint_factor(reserve.liquidity_decimals)?,
        ),
        None => Ok(Decimal::ZERO),
    }
}

/// Collateral that can leave `obligation` without pushing LTV past max LTV
pub fn max_withdrawable_collateral(
    market: &Market,
    obligation: &Obligation,
    collateral: &Reserve,
) -> MultiplyResult<Decimal> {
    let deposited = deposited_tokens(collateral, obligation)?;
    let stats = market.obligation_stats(obligation, obligation.elevation_group)?;
    if stats.adjusted_borrow_value.is_zero() {
        return Ok(deposited);
    }

    let headroom = stats.borrow_limit - stats.adjusted_borrow_value;
    if headroom <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let group = market.elevation_group(obligation.elevation_group)?;
    let ltv = market.get_effective_max_ltv(collateral, group);
    if ltv.is_zero() {
        return Ok(deposited);
    }

    let value = checked_div(headroom, ltv)?;
    let tokens = checked_div(value, collateral.market_price)?;
    Ok(floor_to_decimals(tokens.min(deposited), collateral.liquidity_decimals))
}

// ========== EFFECTS ==========

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EffectsMode {
    Deposit {
        amount: Decimal,
        deposit_is_collateral: bool,
        target_leverage: Decimal,
    },
    Withdraw {
        amount: Decimal,
        amount_in_coll: bool,
        is_closing: bool,
    },
    Adjust {
        target_leverage: Decimal,
    },
}

/// Resulting position for display, before any quote
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MultiplyEffects {
    pub total_deposit: Decimal,
    pub total_borrow: Decimal,
    pub net_value_usd: Decimal,
    pub ltv: Decimal,
    pub leverage: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectsPrices {
    pub collateral_usd: Decimal,
    pub debt_usd: Decimal,
}

pub fn calculate_multiply_effects(
    current: PositionAmounts,
    mode: EffectsMode,
    prices: EffectsPrices,
    flash_loan_fee: Decimal,
    slippage: Decimal,
) -> MultiplyResult<MultiplyEffects> {
    require_positive(prices.collateral_usd)?;
    require_positive(prices.debt_usd)?;
    let price_debt_to_coll = checked_div(prices.debt_usd, prices.collateral_usd)?;
    let price_coll_to_debt = checked_div(prices.collateral_usd, prices.debt_usd)?;

    let total = match mode {
        EffectsMode::Deposit {
            amount,
            deposit_is_collateral,
            target_leverage,
        } => {
            let added = estimate_deposit_mode(
                amount,
                deposit_is_collateral,
                target_leverage,
                price_debt_to_coll,
                flash_loan_fee,
                slippage,
            )?;
            PositionAmounts {
                deposit: current.deposit + added.deposit,
                borrow: current.borrow + added.borrow,
            }
        }
        EffectsMode::Withdraw { is_closing: true, .. } => PositionAmounts::default(),
        EffectsMode::Withdraw {
            amount,
            amount_in_coll,
            is_closing: false,
        } => {
            let removed = calc_withdraw_amounts(
                current.deposit,
                current.borrow,
                amount,
                amount_in_coll,
                price_coll_to_debt,
            )?;
            PositionAmounts {
                deposit: current.deposit - removed.deposit,
                borrow: current.borrow - removed.borrow,
            }
        }
        EffectsMode::Adjust { target_leverage } => {
            let deltas = calc_adjust_amounts(
                current.deposit,
                current.borrow,
                target_leverage,
                price_coll_to_debt,
                flash_loan_fee,
            )?;
            PositionAmounts {
                deposit: current.deposit + deltas.deposit,
                borrow: current.borrow + deltas.borrow,
            }
        }
    };

    let deposit_value = checked_mul(total.deposit, prices.collateral_usd)?;
    let borrow_value = checked_mul(total.borrow, prices.debt_usd)?;
    let net_value_usd = deposit_value - borrow_value;
    let ltv = if deposit_value.is_zero() {
        Decimal::ZERO
    } else {
        checked_div(borrow_value, deposit_value)?
    };
    let leverage = if net_value_usd <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        checked_div(deposit_value, net_value_usd)?
    };

    Ok(MultiplyEffects {
        total_deposit: total.deposit,
        total_borrow: total.borrow,
        net_value_usd,
        ltv,
        leverage,
    })
}
