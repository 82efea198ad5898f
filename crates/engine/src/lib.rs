pub mod binance;
pub mod driver;
pub mod executor;
pub mod history;
pub mod lifecycle;
pub mod snapshot;

pub use binance::{BinanceClient, BinanceStream};
pub use driver::{DriverConfig, PipelineDriver};
pub use executor::OrderExecutor;
pub use lifecycle::MarketFeed;
pub use snapshot::{JsonFileStore, SqliteSnapshotStore};
