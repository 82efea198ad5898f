use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::{ExchangeClient, Order, TradeUpdate, TradingMode};

/// Receives planned orders from the pipeline driver and submits them to the
/// exchange, reporting every outcome back as a [`TradeUpdate`].
///
/// This is the ONLY component that calls `ExchangeClient::submit_order`.
pub struct OrderExecutor {
    order_rx: mpsc::Receiver<Order>,
    update_tx: mpsc::Sender<TradeUpdate>,
    client: Arc<dyn ExchangeClient>,
    mode: TradingMode,
}

impl OrderExecutor {
    pub fn new(
        order_rx: mpsc::Receiver<Order>,
        update_tx: mpsc::Sender<TradeUpdate>,
        client: Arc<dyn ExchangeClient>,
        mode: TradingMode,
    ) -> Self {
        Self {
            order_rx,
            update_tx,
            client,
            mode,
        }
    }

    /// Run the executor loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("OrderExecutor running in {} mode", self.mode);
        while let Some(order) = self.order_rx.recv().await {
            info!(symbol = %order.symbol, side = %order.side, qty = order.quantity, "Executing order");

            let update = match self.client.submit_order(&order).await {
                Ok(fill) => {
                    info!(
                        symbol = %fill.symbol,
                        price = fill.fill_price,
                        qty = fill.quantity,
                        "Order filled"
                    );
                    TradeUpdate::Filled(fill)
                }
                Err(e) => {
                    error!(symbol = %order.symbol, error = %e, "Order submission failed");
                    TradeUpdate::Failed {
                        order,
                        error: e.to_string(),
                    }
                }
            };

            if self.update_tx.send(update).await.is_err() {
                warn!("OrderExecutor: trade update channel closed");
            }
        }
        warn!("OrderExecutor: order channel closed");
    }
}
