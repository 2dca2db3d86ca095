pub mod config;
pub mod error;
pub mod home;
mod json_bridge;
pub mod schema;
pub mod store;

pub use config::{Config, GovernanceDefaults, LogConfig};
pub use error::{Result, StoreError};
pub use home::TreasuryHome;
pub use store::Store;
