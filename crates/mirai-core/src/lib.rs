//! Mirai DAO treasury engine.
//!
//! A ledger custodies pooled funds and releases them to recipients through
//! continuous payment streams and linear or cliff vesting grants, while
//! tracking aggregate allocation and payout under governance limits.
//!
//! Engines are pure: they read records and return a [`Transition`] describing
//! the next records and the single value transfer that goes with them.
//! Committing is left to a [`Treasury`] (in memory) or a persistent store,
//! both of which compare record versions before applying anything.
//!
//! Zero I/O. Time is always an argument.

pub mod address;
pub mod category;
pub mod constants;
pub mod custody;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod reconcile;
pub mod release;
pub mod serde_compat;
pub mod stream;
pub mod time;
pub mod transition;
pub mod treasury;
pub mod vesting;

pub use address::{
    ADDRESS_LEN, Address, AddressError, derive, ledger_address, stream_address, vesting_address,
};
pub use category::PaymentCategory;
pub use constants::{BPS_DENOMINATOR, INITIAL_VERSION, MAX_DESCRIPTION_LEN};
pub use custody::{Custody, CustodyError, InMemoryCustody};
pub use error::{ErrorKind, Result, TreasuryError};
pub use ledger::{GovernanceSettings, Ledger};
pub use reconcile::{Reconciliation, check_entity, check_ledger, reconcile};
pub use release::{Schedule, unlocked};
pub use serde_compat::{
    BalanceEntry, CURRENT_VERSION, SnapshotError, TreasurySnapshot, export_json, import_json,
};
pub use stream::{CreateStream, Stream, StreamStatus};
pub use transition::{
    Entity, EntityKind, GovernanceUpdate, Record, Transfer, Transition, check_successor,
};
pub use treasury::Treasury;
pub use vesting::{CreateVesting, Vesting, VestingStatus, VestingType};
