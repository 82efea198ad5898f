use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use common::{
    AssetClass, Bar, Error, ExchangeClient, MarketDataSource, Order, Resolution, Result,
    SnapshotStore, TradeUpdate,
};
use strategy::{AccountSnapshot, Context, ContextDelta, Pipeline};

use crate::history;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Bars at this resolution run a full pipeline cycle; all others are intrabar.
    pub cycle_resolution: Resolution,
    pub asset_class: AssetClass,
    /// Pause before the single retry of a failed history fetch.
    pub retry_delay: Duration,
}

/// Single consumer of market bars and trade updates.
///
/// Owns the [`Context`] exclusively. Each cycle bar runs selection, warmup,
/// the trading stages and order submission; everything else only refreshes
/// prices and indicators. Errors end the current cycle, never the loop.
pub struct PipelineDriver {
    ctx: Context,
    pipeline: Pipeline,
    config: DriverConfig,
    data: Arc<dyn MarketDataSource>,
    broker: Arc<dyn ExchangeClient>,
    store: Arc<dyn SnapshotStore>,
    order_tx: mpsc::Sender<Order>,
}

impl PipelineDriver {
    pub fn new(
        ctx: Context,
        pipeline: Pipeline,
        config: DriverConfig,
        data: Arc<dyn MarketDataSource>,
        broker: Arc<dyn ExchangeClient>,
        store: Arc<dyn SnapshotStore>,
        order_tx: mpsc::Sender<Order>,
    ) -> Self {
        Self {
            ctx,
            pipeline,
            config,
            data,
            broker,
            store,
            order_tx,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Process events until the bar feed closes. Call from `tokio::spawn` or
    /// await directly as the last task of the process.
    pub async fn run(
        mut self,
        mut bar_rx: broadcast::Receiver<Bar>,
        mut update_rx: mpsc::Receiver<TradeUpdate>,
    ) {
        info!(pipeline = %self.pipeline.describe(), cycle = %self.config.cycle_resolution, "Pipeline driver running");
        let mut updates_open = true;

        loop {
            tokio::select! {
                received = bar_rx.recv() => match received {
                    Ok(bar) => self.handle_bar(bar).await,
                    Err(broadcast::error::RecvError::Lagged(dropped)) => {
                        warn!(dropped, "Driver lagged behind the bar feed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Bar feed closed, driver stopping");
                        break;
                    }
                },
                update = update_rx.recv(), if updates_open => match update {
                    Some(update) => self.handle_trade_update(update).await,
                    None => {
                        warn!("Trade update channel closed");
                        updates_open = false;
                    }
                },
            }
        }
    }

    pub async fn handle_bar(&mut self, bar: Bar) {
        if bar.resolution != self.config.cycle_resolution {
            self.handle_intrabar(&bar);
            return;
        }

        debug!(symbol = %bar.symbol, ts = %bar.timestamp, "Cycle bar");
        if let Err(e) = self.run_cycle(&bar).await {
            error!(symbol = %bar.symbol, error = %e, "Pipeline cycle failed");
        }
        self.ctx.clear_transient();
    }

    async fn run_cycle(&mut self, bar: &Bar) -> Result<()> {
        // ── Universe ───────────────────────────────────────────────────────────
        let targets = self.pipeline.selection.select(&self.ctx)?;
        self.ctx.apply(ContextDelta::Universe(targets));
        let universe = self.ctx.universe();
        if !universe.added().is_empty() || !universe.removed().is_empty() {
            info!(added = ?universe.added(), removed = ?universe.removed(), "Universe changed");
        }
        self.ctx.reconcile_indicators();

        // ── Warmup ─────────────────────────────────────────────────────────────
        // History ends just before this bar opens; the bar itself is ingested live.
        if !self.ctx.registry().is_ready() {
            self.warm_up(bar.timestamp - chrono::Duration::milliseconds(1)).await?;
        }

        self.ctx.ingest_bar(bar);
        self.ctx.record_price(&bar.symbol, bar.close);
        self.refresh_account().await?;

        if !self.ctx.registry().is_ready() {
            warn!(unready = ?self.ctx.registry().unready_symbols(), "Indicators not ready, skipping trading stages");
            return Ok(());
        }

        // ── Stages ─────────────────────────────────────────────────────────────
        let signals = self.pipeline.signal.generate(&self.ctx)?;
        self.ctx.apply(ContextDelta::Signals(signals));

        let allocations = self.pipeline.portfolio.build(&self.ctx, self.ctx.signals())?;
        self.ctx.apply(ContextDelta::Allocations(allocations));

        let allocations = self
            .pipeline
            .risk
            .filter(&self.ctx, self.ctx.allocations().to_vec())?;
        self.ctx.apply(ContextDelta::Allocations(allocations));

        let orders = self.pipeline.execution.plan(&self.ctx, self.ctx.allocations())?;
        self.submit(orders).await
    }

    async fn warm_up(&mut self, end: DateTime<Utc>) -> Result<()> {
        let symbols = self.ctx.registry().unready_symbols();
        if symbols.is_empty() {
            return Ok(());
        }
        let history = history::fetch_with_retry(
            self.data.as_ref(),
            &symbols,
            self.ctx.registry().required_warmup_length(),
            self.ctx.registry().resolution(),
            self.config.asset_class,
            end,
            self.config.retry_delay,
        )
        .await?;

        let report = self.ctx.warmup(&history);
        info!(
            warmed = report.warmed,
            skipped = report.skipped_ready,
            missing = report.missing.len(),
            "Warmup complete"
        );
        Ok(())
    }

    async fn refresh_account(&mut self) -> Result<()> {
        let equity = self.broker.equity().await?;
        let positions = self.broker.open_positions().await?;
        self.ctx.set_account(AccountSnapshot { equity, positions });
        Ok(())
    }

    async fn submit(&mut self, orders: Vec<Order>) -> Result<()> {
        for order in orders {
            info!(symbol = %order.symbol, side = %order.side, qty = order.quantity, "Submitting planned order");
            self.ctx.mark_pending([&order.symbol]);
            self.order_tx
                .send(order)
                .await
                .map_err(|_| Error::Other("order executor channel closed".into()))?;
        }
        Ok(())
    }

    fn handle_intrabar(&mut self, bar: &Bar) {
        self.ctx.record_price(&bar.symbol, bar.close);
        if self.ctx.registry().instances(bar.symbol.as_str()).is_some() {
            self.ctx.ingest_bar(bar);
        }
        self.write_snapshot();
    }

    async fn handle_trade_update(&mut self, update: TradeUpdate) {
        self.ctx.clear_pending(update.symbol());
        match &update {
            TradeUpdate::Filled(fill) => info!(
                symbol = %fill.symbol,
                side = %fill.side,
                price = fill.fill_price,
                qty = fill.quantity,
                "Trade filled"
            ),
            TradeUpdate::Failed { order, error } => {
                warn!(symbol = %order.symbol, error = %error, "Trade failed")
            }
        }
        if let Err(e) = self.refresh_account().await {
            warn!(error = %e, "Account refresh after trade failed");
        }
        self.write_snapshot();
    }

    /// Persist a snapshot without blocking the event loop.
    fn write_snapshot(&self) {
        let snapshot = self.ctx.snapshot();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.save(&snapshot).await {
                warn!(error = %e, "Snapshot write failed");
            }
        });
    }
}
