use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use common::{Bar, Resolution, Symbol};

use crate::binance::BinanceStream;

const BAR_CHANNEL_CAPACITY: usize = 1024;

/// Owns the live market-data streams and the bar broadcast they publish on.
///
/// One [`BinanceStream`] task per symbol, each subscribed to every requested
/// resolution. Dropping the feed aborts the streams.
pub struct MarketFeed {
    symbols: Vec<Symbol>,
    resolutions: Vec<Resolution>,
    bar_tx: broadcast::Sender<Bar>,
    streams: Vec<JoinHandle<()>>,
}

impl MarketFeed {
    pub fn new(symbols: Vec<Symbol>, resolutions: Vec<Resolution>) -> Self {
        let (bar_tx, _) = broadcast::channel(BAR_CHANNEL_CAPACITY);
        let mut unique = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            if !unique.contains(&resolution) {
                unique.push(resolution);
            }
        }
        Self {
            symbols,
            resolutions: unique,
            bar_tx,
            streams: Vec::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bar> {
        self.bar_tx.subscribe()
    }

    /// Sender side of the bar channel, for tasks that publish bars alongside
    /// the streams.
    pub fn sender(&self) -> broadcast::Sender<Bar> {
        self.bar_tx.clone()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn is_running(&self) -> bool {
        !self.streams.is_empty()
    }

    /// Spawn the streams. Calling again while running is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            info!("Market feed already running");
            return;
        }
        info!(symbols = ?self.symbols, resolutions = ?self.resolutions, "Starting market data streams");
        for symbol in &self.symbols {
            let stream =
                BinanceStream::new(symbol.clone(), self.resolutions.clone(), self.bar_tx.clone());
            self.streams.push(tokio::spawn(stream.run()));
        }
    }

    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        info!("Market feed stopping, aborting stream tasks");
        for handle in self.streams.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for MarketFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
