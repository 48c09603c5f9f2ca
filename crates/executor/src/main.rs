use dotenvy::dotenv;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use common::actors::ActorType;
use common::config::{BotConfig, StoreBackend};
use common::logger;
use common::models::SignalDraft;
use exchange::{BinanceClient, ExchangeAdapter, RetryPolicy};
use storage::{JsonFileStore, SignalStore, SqliteSignalStore};

use crate::actors::intake_actor::SignalIntakeActor;
use crate::actors::supervisor::Supervisor;
use crate::actors::trading_actor::TradingActor;
use crate::services::draft_inbox::DraftInbox;
use crate::services::order_executor::OrderExecutor;
use crate::services::position_reconciler::PositionReconciler;

mod actors;
mod services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    logger::setup_logger();
    debug!("System starting up...");

    let config = BotConfig::from_env()?;
    info!(
        base_url = %config.exchange.base_url,
        store = ?config.storage.backend,
        store_path = %config.storage.path.display(),
        inbox = %config.storage.inbox_dir.display(),
        allow_short = config.trading.allow_short,
        "Configuration loaded"
    );

    let exchange: Arc<dyn ExchangeAdapter> = Arc::new(BinanceClient::new(&config.exchange)?);
    let store: Arc<dyn SignalStore> = match config.storage.backend {
        StoreBackend::Json => Arc::new(JsonFileStore::new(config.storage.path.clone())),
        StoreBackend::Sqlite => Arc::new(SqliteSignalStore::open(&config.storage.path).await?),
    };
    let retry = RetryPolicy::from(&config.retry);

    let executor = Arc::new(OrderExecutor::new(
        exchange.clone(),
        config.trading.clone(),
        retry.clone(),
    ));
    let reconciler = Arc::new(PositionReconciler::new(
        exchange.clone(),
        config.trading.clone(),
        retry,
    ));

    let (drafts_tx, _) = broadcast::channel::<SignalDraft>(1_024);
    let mut supervisor = Supervisor::new();

    // One receiver for every trading actor incarnation, so a restart never drops queued drafts.
    let drafts_for_trading = Arc::new(Mutex::new(drafts_tx.subscribe()));
    let poll_interval = config.poll_interval;
    let max_history_size = config.storage.max_history_size;
    supervisor.register_actor(
        ActorType::TradingActor,
        Box::new(move || {
            Box::new(TradingActor::new(
                executor.clone(),
                reconciler.clone(),
                store.clone(),
                drafts_for_trading.clone(),
                poll_interval,
                max_history_size,
            ))
        }),
    );

    let tx_for_intake = drafts_tx.clone();
    let inbox_dir = config.storage.inbox_dir.clone();
    supervisor.register_actor(
        ActorType::SignalIntakeActor,
        Box::new(move || {
            Box::new(SignalIntakeActor::new(
                DraftInbox::new(inbox_dir.clone()),
                tx_for_intake.clone(),
                poll_interval,
            ))
        }),
    );

    tokio::select! {
        _ = supervisor.start() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }
    Ok(())
}
