pub mod config;
pub mod error;
pub mod exchange;
pub mod types;
pub mod universe;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::{ExchangeClient, MarketDataSource, SnapshotStore};
pub use types::*;
pub use universe::Universe;
