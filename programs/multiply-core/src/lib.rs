//! Snapshot model, risk math and interest estimation for klend multiply
//! positions. Everything here is pure; I/O sits behind [`SnapshotProvider`].

use anchor_lang::declare_id;

// klend program
declare_id!("KLend2g3cP87fffoy8q1mQqGKjrxjC8boSyAYavgmjD");

pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod instruction;
pub mod interest;
pub mod market;
pub mod math;
pub mod snapshot;
pub mod state;

pub use config::*;
pub use constants::*;
pub use errors::*;
pub use events::*;
pub use instruction::*;
pub use interest::*;
pub use market::*;
pub use snapshot::*;
pub use state::*;
