//! Ordered bundle assembly.
//!
//! Steps are appended stage by stage; a stage may not be entered after a later
//! one. The flash borrow index is the builder's running count at the moment
//! the borrow is appended, so the repay step always names the real position.

use anchor_lang::solana_program::instruction::Instruction;

use multiply_core::{MultiplyError, MultiplyResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Price refreshes and compute budget
    Setup,
    CreateAccounts,
    /// Native SOL into the wSOL account
    Wrap,
    FlashBorrow,
    Lending,
    Swap,
    FlashRepay,
    Cleanup,
}

/// Where the swap sits relative to the lending leg
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceLayout {
    pub swap_before_lending: bool,
}

impl SequenceLayout {
    fn rank(&self, stage: Stage) -> u8 {
        match stage {
            Stage::Setup => 0,
            Stage::CreateAccounts => 1,
            Stage::Wrap => 2,
            Stage::FlashBorrow => 3,
            Stage::Lending if self.swap_before_lending => 5,
            Stage::Lending => 4,
            Stage::Swap if self.swap_before_lending => 4,
            Stage::Swap => 5,
            Stage::FlashRepay => 6,
            Stage::Cleanup => 7,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BundleBuilder {
    layout: SequenceLayout,
    instructions: Vec<Instruction>,
    last: Option<Stage>,
    flash_borrow_index: Option<u8>,
    flash_repaid: bool,
}

impl BundleBuilder {
    pub fn new(layout: SequenceLayout) -> Self {
        Self {
            layout,
            instructions: Vec::new(),
            last: None,
            flash_borrow_index: None,
            flash_repaid: false,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    fn enter(&mut self, stage: Stage) -> MultiplyResult<()> {
        if let Some(last) = self.last {
            multiply_core::require!(
                self.layout.rank(stage) >= self.layout.rank(last),
                MultiplyError::StepOutOfOrder {
                    stage: format!("{stage:?}"),
                    last: format!("{last:?}"),
                }
            );
        }
        self.last = Some(stage);
        Ok(())
    }

    pub fn push(&mut self, stage: Stage, ix: Instruction) -> MultiplyResult<()> {
        self.extend(stage, [ix])
    }

    pub fn extend<I>(&mut self, stage: Stage, ixs: I) -> MultiplyResult<()>
    where
        I: IntoIterator<Item = Instruction>,
    {
        multiply_core::require!(
            !matches!(stage, Stage::FlashBorrow | Stage::FlashRepay),
            MultiplyError::StepOutOfOrder {
                stage: format!("{stage:?}"),
                last: "flash steps go through flash_borrow/flash_repay".to_string(),
            }
        );
        self.enter(stage)?;
        self.instructions.extend(ixs);
        Ok(())
    }

    /// Append the flash borrow; returns its index for the repay step
    pub fn flash_borrow(&mut self, ix: Instruction) -> MultiplyResult<u8> {
        multiply_core::require!(
            self.flash_borrow_index.is_none(),
            MultiplyError::StepOutOfOrder {
                stage: "FlashBorrow".to_string(),
                last: "FlashBorrow".to_string(),
            }
        );
        self.enter(Stage::FlashBorrow)?;
        let position = self.instructions.len();
        let index = u8::try_from(position).map_err(|_| MultiplyError::FlashBorrowIndexOverflow(position))?;
        self.instructions.push(ix);
        self.flash_borrow_index = Some(index);
        Ok(index)
    }

    pub fn flash_repay(&mut self, ix: Instruction) -> MultiplyResult<()> {
        multiply_core::require!(self.flash_borrow_index.is_some(), MultiplyError::MissingFlashBorrow);
        self.enter(Stage::FlashRepay)?;
        self.instructions.push(ix);
        self.flash_repaid = true;
        Ok(())
    }

    /// Steps plus the flash borrow index
    pub fn finish(self) -> MultiplyResult<(Vec<Instruction>, u8)> {
        let index = self.flash_borrow_index.ok_or(MultiplyError::MissingFlashBorrow)?;
        multiply_core::require!(self.flash_repaid, MultiplyError::MissingFlashBorrow);
        Ok((self.instructions, index))
    }
}
