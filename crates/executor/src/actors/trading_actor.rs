use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{
    actors::{Actor, ActorType, ControlMessage},
    models::SignalDraft,
};
use storage::{SignalHistory, SignalStore, StoreError};
use tokio::{
    sync::{
        Mutex,
        broadcast::{self, error::TryRecvError},
        mpsc,
    },
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::services::{order_executor::OrderExecutor, position_reconciler::PositionReconciler};

/// Receiver shared by every incarnation of the trading actor, so drafts
/// queued while one instance is restarted are drained by the next.
pub type DraftFeed = Arc<Mutex<broadcast::Receiver<SignalDraft>>>;

/// Owns the signal collection. Every tick it loads the store, opens
/// positions for new drafts, reconciles the open ones and saves once.
pub struct TradingActor {
    executor: Arc<OrderExecutor>,
    reconciler: Arc<PositionReconciler>,
    store: Arc<dyn SignalStore>,
    drafts: DraftFeed,
    poll_interval: Duration,
    max_history_size: usize,
    /// History whose save failed. It is newer than the store and replaces
    /// the next load.
    unsaved: Option<SignalHistory>,
}

impl TradingActor {
    pub fn new(
        executor: Arc<OrderExecutor>,
        reconciler: Arc<PositionReconciler>,
        store: Arc<dyn SignalStore>,
        drafts: DraftFeed,
        poll_interval: Duration,
        max_history_size: usize,
    ) -> Self {
        Self {
            executor,
            reconciler,
            store,
            drafts,
            poll_interval,
            max_history_size,
            unsaved: None,
        }
    }

    async fn drain_drafts(&self) -> Vec<SignalDraft> {
        let mut drafts_rx = self.drafts.lock().await;
        let mut drafts = Vec::new();
        loop {
            match drafts_rx.try_recv() {
                Ok(draft) => drafts.push(draft),
                Err(TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "Trading actor lagged behind the draft feed");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    warn!("Draft feed closed");
                    break;
                }
            }
        }
        drafts
    }

    /// One full cycle. The store is written exactly once, after every
    /// signal has been handled. Drafts are only taken once the history is
    /// loaded, and a history that failed to save is kept for the next tick.
    pub async fn tick(&mut self) -> Result<(), StoreError> {
        let mut history = match self.unsaved.take() {
            Some(history) => history,
            None => SignalHistory::new(self.store.load().await?, self.max_history_size),
        };
        let drafts = self.drain_drafts().await;

        for draft in drafts {
            let currency = draft.currency.clone();
            match self.executor.execute(draft, &history).await {
                Ok(signal) => {
                    info!(
                        currency = %signal.currency,
                        real_entry = ?signal.real_entry,
                        real_amount = ?signal.real_amount,
                        "Position opened"
                    );
                    history.push(signal);
                }
                Err(rejection) => {
                    warn!(currency = %currency, reason = %rejection, "Signal rejected");
                }
            }
        }

        let report = self.reconciler.run_cycle(&mut history).await;
        if report.reconciled > 0 {
            info!(
                reconciled = report.reconciled,
                closed = report.closed,
                failed = report.failed,
                "Reconciliation cycle finished"
            );
        }

        history.enforce_retention();
        if let Err(e) = self.store.save(history.signals()).await {
            warn!(signals = history.len(), open = history.open_count(), "Signal history kept in memory until the store recovers");
            self.unsaved = Some(history);
            return Err(e);
        }
        debug!(signals = history.len(), open = history.open_count(), "Signal history saved");
        Ok(())
    }
}

#[async_trait]
impl Actor for TradingActor {
    fn name(&self) -> ActorType {
        ActorType::TradingActor
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let _heartbeat = self.spawn_heartbeat(supervisor_tx.clone());
        info!(interval = ?self.poll_interval, "Starting trading actor");

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                let err_msg = format!("Signal store failure: {e}");
                error!(error = %e, "Trading cycle aborted");
                supervisor_tx
                    .send(ControlMessage::Error(self.name(), err_msg))
                    .await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use common::{
        config::TradingConfig,
        models::{
            AssetBalance, Closure, ExitType, GroupListStatus, GroupStatus, MarketFill, OrderStatus, OrderType, Side,
            Signal,
        },
    };
    use exchange::{ExchangeError, MockExchangeAdapter};
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;
    use storage::JsonFileStore;

    use crate::services::test_support::{draft, fast_retry, group, leg, long_signal, rules};

    fn feed(drafts_rx: broadcast::Receiver<SignalDraft>) -> DraftFeed {
        Arc::new(Mutex::new(drafts_rx))
    }

    fn actor(mock: MockExchangeAdapter, store: Arc<dyn SignalStore>, drafts: DraftFeed) -> TradingActor {
        let exchange: Arc<dyn exchange::ExchangeAdapter> = Arc::new(mock);
        TradingActor::new(
            Arc::new(OrderExecutor::new(exchange.clone(), TradingConfig::default(), fast_retry())),
            Arc::new(PositionReconciler::new(exchange, TradingConfig::default(), fast_retry())),
            store,
            drafts,
            Duration::from_secs(30),
            50,
        )
    }

    /// In-memory store whose first `failures` saves fail.
    struct FlakyStore {
        signals: StdMutex<Vec<Signal>>,
        failures: StdMutex<u32>,
    }

    impl FlakyStore {
        fn failing(failures: u32) -> Self {
            Self {
                signals: StdMutex::new(Vec::new()),
                failures: StdMutex::new(failures),
            }
        }
    }

    #[async_trait]
    impl SignalStore for FlakyStore {
        async fn load(&self) -> Result<Vec<Signal>, StoreError> {
            Ok(self.signals.lock().unwrap().clone())
        }

        async fn save(&self, signals: &[Signal]) -> Result<(), StoreError> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            *self.signals.lock().unwrap() = signals.to_vec();
            Ok(())
        }
    }

    /// Exchange where a BTCUSDT entry fills and stays protected by group 31.
    fn protected_market() -> MockExchangeAdapter {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_get_symbol_rules().returning(|_| Ok(rules()));
        mock.expect_get_price().returning(|_| Ok(dec!(100)));
        mock.expect_get_free_balance().returning(|asset| {
            Ok(if asset == "USDT" { dec!(1000) } else { dec!(2) })
        });
        mock.expect_get_balance().returning(|_| {
            Ok(AssetBalance {
                free: dec!(0),
                locked: dec!(2),
            })
        });
        mock.expect_place_market_order().times(1).returning(|_, _, qty, _| {
            Ok(MarketFill {
                order_id: 1,
                status: OrderStatus::Filled,
                executed_qty: qty,
                fill_price: dec!(100),
            })
        });
        mock.expect_place_protective_group()
            .times(1)
            .returning(|req, _| Ok(group(31, req)));
        let legs = || {
            vec![
                leg(311, OrderType::StopLossLimit, OrderStatus::New, Side::Sell),
                leg(312, OrderType::LimitMaker, OrderStatus::New, Side::Sell),
            ]
        };
        mock.expect_get_group().returning(move |_, group_id| {
            Ok(GroupStatus {
                group_id,
                status: GroupListStatus::Executing,
                legs: legs(),
            })
        });
        mock.expect_get_open_orders().returning(move |_| Ok(legs()));
        mock
    }

    #[tokio::test]
    async fn test_failed_save_keeps_opened_position() {
        let store = Arc::new(FlakyStore::failing(1));
        let (tx, rx) = broadcast::channel(8);
        let mut actor = actor(protected_market(), store.clone(), feed(rx));

        tx.send(draft("BTCUSDT")).unwrap();
        assert!(actor.tick().await.is_err());
        assert!(store.load().await.unwrap().is_empty());

        // The same symbol again must see the position opened by the failed tick.
        tx.send(draft("BTCUSDT")).unwrap();
        actor.tick().await.unwrap();

        let saved = store.load().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].is_open());
        assert_eq!(saved[0].oco_order_id, Some(31));
    }

    #[tokio::test]
    async fn test_restarted_actor_drains_queued_drafts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("signals.json")));
        let (tx, rx) = broadcast::channel(8);
        let drafts = feed(rx);

        let first = actor(MockExchangeAdapter::new(), store.clone(), drafts.clone());
        tx.send(draft("DOGEUSDT")).unwrap();
        drop(first);

        let mut mock = MockExchangeAdapter::new();
        mock.expect_get_symbol_rules()
            .times(1)
            .returning(|s| Err(ExchangeError::UnknownSymbol(s.to_string())));
        let mut second = actor(mock, store, drafts);
        second.tick().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_draft_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("signals.json")));
        let mut mock = MockExchangeAdapter::new();
        mock.expect_get_symbol_rules()
            .times(1)
            .returning(|s| Err(ExchangeError::UnknownSymbol(s.to_string())));

        let (tx, rx) = broadcast::channel(8);
        tx.send(draft("DOGEUSDT")).unwrap();

        let mut actor = actor(mock, store.clone(), feed(rx));
        actor.tick().await.unwrap();

        assert!(store.path().exists());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_signals_survive_a_cycle_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("signals.json")));
        let mut closed = long_signal();
        closed.close(
            Closure {
                exit_type: ExitType::TakeProfit,
                exit_price: dec!(110),
                exit_quantity: dec!(2),
                description: "Take-profit filled".to_string(),
            },
            Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap(),
        );
        store.save(std::slice::from_ref(&closed)).await.unwrap();

        // No expectations: any exchange call would panic.
        let (_tx, rx) = broadcast::channel(8);
        let mut actor = actor(MockExchangeAdapter::new(), store.clone(), feed(rx));
        actor.tick().await.unwrap();

        let saved: Vec<Signal> = store.load().await.unwrap();
        assert_eq!(saved, vec![closed]);
    }
}
