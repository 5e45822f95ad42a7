use anchor_lang::prelude::Pubkey;
use anchor_lang::solana_program::instruction::Instruction;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use multiply_core::{math::checked_mul, Market, MultiplyError, MultiplyResult, Obligation, Reserve};

pub mod instructions;
pub mod token;

pub use instructions::*;
pub use token::*;

/// Lending steps against one obligation, each preceded by the refreshes klend
/// requires. Tracks the obligation as it will look after every step so later
/// refreshes list the right reserves.
pub struct LendingSequence<'a> {
    market: &'a Market,
    obligation: Obligation,
    instructions: Vec<Instruction>,
}

impl<'a> LendingSequence<'a> {
    pub fn new(market: &'a Market, obligation: &Obligation) -> Self {
        Self {
            market,
            obligation: obligation.clone(),
            instructions: Vec::new(),
        }
    }

    /// Projected obligation after the steps added so far
    pub fn obligation(&self) -> &Obligation {
        &self.obligation
    }

    pub fn finish(self) -> (Vec<Instruction>, Obligation) {
        (self.instructions, self.obligation)
    }

    /// Refresh every obligation reserve plus `action_reserve`, then the obligation
    fn refresh(&mut self, action_reserve: Option<&Reserve>) -> MultiplyResult<()> {
        let mut reserves: Vec<Pubkey> = self.obligation.deposit_reserves();
        for reserve in self.obligation.borrow_reserves() {
            if !reserves.contains(&reserve) {
                reserves.push(reserve);
            }
        }
        if let Some(reserve) = action_reserve {
            if !reserves.contains(&reserve.address) {
                reserves.push(reserve.address);
            }
        }

        for address in reserves {
            let reserve = self.market.validated_reserve(&address)?;
            self.instructions.push(refresh_reserve_ix(reserve));
        }
        self.instructions.push(refresh_obligation_ix(&self.obligation));
        Ok(())
    }

    pub fn deposit(&mut self, reserve: &Reserve, user_source: Pubkey, liquidity_amount: u64) -> MultiplyResult<()> {
        self.refresh(Some(reserve))?;
        self.instructions
            .push(deposit_ix(&self.obligation, reserve, user_source, liquidity_amount)?);

        let collateral = reserve
            .liquidity_to_collateral(Decimal::from(liquidity_amount))
            .floor()
            .to_u64()
            .ok_or(MultiplyError::MathOverflow)?;
        self.obligation.add_deposit(reserve.address, collateral)
    }

    /// Borrowed amount is recorded with the origination fee on top
    pub fn borrow(&mut self, reserve: &Reserve, user_destination: Pubkey, liquidity_amount: u64) -> MultiplyResult<()> {
        self.refresh(Some(reserve))?;
        self.instructions
            .push(borrow_ix(&self.obligation, reserve, user_destination, liquidity_amount)?);

        let owed = checked_mul(
            Decimal::from(liquidity_amount),
            Decimal::ONE + reserve.borrow_fee(),
        )?;
        self.obligation
            .add_borrow(reserve.address, owed, reserve.cumulative_borrow_rate)
    }

    /// `U64_MAX` repays the whole borrow
    pub fn repay(&mut self, reserve: &Reserve, user_source: Pubkey, liquidity_amount: u64) -> MultiplyResult<()> {
        self.obligation
            .borrow(&reserve.address)
            .ok_or(MultiplyError::BorrowNotFound(reserve.address))?;
        self.refresh(Some(reserve))?;
        self.instructions
            .push(repay_ix(&self.obligation, reserve, user_source, liquidity_amount)?);
        self.obligation.repay(reserve.address, liquidity_amount)
    }

    /// Collateral token amount; `U64_MAX` withdraws the whole deposit
    pub fn withdraw(&mut self, reserve: &Reserve, user_destination: Pubkey, collateral_amount: u64) -> MultiplyResult<()> {
        self.obligation
            .deposit(&reserve.address)
            .ok_or(MultiplyError::DepositNotFound(reserve.address))?;
        self.refresh(Some(reserve))?;
        self.instructions
            .push(withdraw_ix(&self.obligation, reserve, user_destination, collateral_amount)?);
        self.obligation.withdraw(reserve.address, collateral_amount)
    }

    pub fn request_elevation_group(&mut self, elevation_group: u8) -> MultiplyResult<()> {
        self.refresh(None)?;
        self.instructions
            .push(request_elevation_group_ix(&self.obligation, elevation_group)?);
        self.obligation.elevation_group = elevation_group;
        Ok(())
    }
}
