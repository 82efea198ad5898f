use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    Config, ExchangeClient, MarketDataSource, Order, SnapshotStore, Symbol, TradeUpdate,
    TradingMode,
};
use engine::{
    BinanceClient, DriverConfig, JsonFileStore, MarketFeed, OrderExecutor, PipelineDriver,
    SqliteSnapshotStore,
};
use paper::PaperClient;
use strategy::config::param_str_list;
use strategy::{Context, PipelineConfig};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let pipeline_cfg = PipelineConfig::load(&cfg.pipeline_config_path);
    info!(mode = %cfg.trading_mode, config = %cfg.pipeline_config_path, "Barwatch starting");

    // ── Pipeline ──────────────────────────────────────────────────────────────
    let risk = risk::build_risk(&pipeline_cfg.risk)
        .unwrap_or_else(|e| panic!("Invalid risk configuration: {e}"));
    let (registry, pipeline) = pipeline_cfg
        .build(risk)
        .unwrap_or_else(|e| panic!("Invalid pipeline configuration: {e}"));
    info!(
        stages = %pipeline.describe(),
        indicators = registry.prototype().len(),
        warmup = registry.required_warmup_length(),
        "Pipeline built"
    );

    // ── Market data ───────────────────────────────────────────────────────────
    let binance = Arc::new(
        BinanceClient::new(&cfg.binance_api_key, &cfg.binance_secret)
            .unwrap_or_else(|e| panic!("Failed to create Binance client: {e}")),
    );
    let data: Arc<dyn MarketDataSource> = binance.clone();

    let symbols: Vec<Symbol> = param_str_list(&pipeline_cfg.selection.params, "symbols")
        .unwrap_or_default()
        .into_iter()
        .map(Symbol::from)
        .collect();
    let mut feed = MarketFeed::new(
        symbols,
        vec![pipeline_cfg.resolution, pipeline_cfg.cycle_resolution()],
    );

    // ── Exchange client (injected based on TRADING_MODE) ──────────────────────
    let broker: Arc<dyn ExchangeClient> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode, using BinanceClient");
            binance
        }
        TradingMode::Paper => {
            info!(
                slippage_bps = cfg.paper_slippage_bps,
                balance = cfg.paper_initial_balance_usd,
                "Paper trading mode, using PaperClient"
            );
            let paper = Arc::new(PaperClient::new(
                cfg.paper_initial_balance_usd,
                cfg.paper_slippage_bps,
            ));
            tokio::spawn(paper_prices(paper.clone(), feed.subscribe()));
            paper
        }
    };

    // ── Snapshots ─────────────────────────────────────────────────────────────
    let store: Arc<dyn SnapshotStore> = match &cfg.database_url {
        Some(url) => {
            let store = SqliteSnapshotStore::connect(url)
                .await
                .unwrap_or_else(|e| panic!("Failed to open snapshot database: {e}"));
            info!("Snapshots go to SQLite");
            Arc::new(store)
        }
        None => {
            info!(path = %cfg.snapshot_path, "Snapshots go to a JSON file");
            Arc::new(JsonFileStore::new(&cfg.snapshot_path))
        }
    };

    // ── Channels ──────────────────────────────────────────────────────────────
    let (order_tx, order_rx) = mpsc::channel::<Order>(128);
    let (update_tx, update_rx) = mpsc::channel::<TradeUpdate>(128);
    let bar_rx = feed.subscribe();

    // ── Spawn tasks ───────────────────────────────────────────────────────────
    let executor = OrderExecutor::new(order_rx, update_tx, broker.clone(), cfg.trading_mode);
    tokio::spawn(executor.run());

    let driver = PipelineDriver::new(
        Context::new(registry),
        pipeline,
        DriverConfig {
            cycle_resolution: pipeline_cfg.cycle_resolution(),
            asset_class: pipeline_cfg.asset_class,
            retry_delay: cfg.history_retry_delay,
        },
        data,
        broker,
        store,
        order_tx,
    );
    let driver_task = tokio::spawn(driver.run(bar_rx, update_rx));

    feed.start();

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received. Exiting.");
        }
        _ = driver_task => warn!("Pipeline driver stopped"),
    }
    feed.stop();
}

/// Keep the paper client's marks in line with the live feed.
async fn paper_prices(paper: Arc<PaperClient>, mut bar_rx: broadcast::Receiver<common::Bar>) {
    loop {
        match bar_rx.recv().await {
            Ok(bar) => paper.update_price(&bar.symbol, bar.close).await,
            Err(broadcast::error::RecvError::Lagged(dropped)) => {
                warn!(dropped, "Paper price updater lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
