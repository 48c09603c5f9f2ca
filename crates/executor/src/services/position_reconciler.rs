use std::sync::Arc;

use chrono::Utc;
use common::{
    config::TradingConfig,
    models::{Closure, ExitType, OrderRecord, Signal, SignalType},
    precision,
};
use exchange::{ExchangeAdapter, ExchangeError, RetryPolicy};
use rust_decimal::Decimal;
use storage::SignalHistory;
use tracing::{debug, error, info, warn};

use crate::services::{
    order_submission::{submit_market_order, submit_protective_group},
    reconciler::{ExchangeSnapshot, ReconcileError, Reconciliation, SideEffect, closure_from_leg, reconcile},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub reconciled: usize,
    pub closed: usize,
    pub failed: usize,
}

/// Drives every open signal towards the state its exchange orders imply.
pub struct PositionReconciler {
    exchange: Arc<dyn ExchangeAdapter>,
    trading: TradingConfig,
    retry: RetryPolicy,
}

impl PositionReconciler {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, trading: TradingConfig, retry: RetryPolicy) -> Self {
        Self {
            exchange,
            trading,
            retry,
        }
    }

    /// Reconciles open signals one after another. Closed signals are skipped.
    pub async fn run_cycle(&self, history: &mut SignalHistory) -> CycleReport {
        let mut report = CycleReport::default();
        for signal in history.signals_mut().iter_mut().filter(|s| s.is_open()) {
            self.reconcile_signal(signal).await;
            report.reconciled += 1;
            if !signal.is_open() {
                report.closed += 1;
            } else if signal.error.is_some() {
                report.failed += 1;
            }
        }
        report
    }

    pub async fn reconcile_signal(&self, signal: &mut Signal) {
        if !signal.is_open() {
            return;
        }
        if signal.failed_cycles >= self.trading.max_failed_cycles {
            let reason = format!(
                "{} consecutive failed cycles, last error: {}",
                signal.failed_cycles,
                signal.error.as_deref().unwrap_or("none")
            );
            self.force_liquidate(signal, &reason).await;
            return;
        }

        let snapshot = match self.snapshot(signal).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                record_failure(signal, &e);
                return;
            }
        };

        let previous_level = signal.current_target_level;
        let previous_group = signal.oco_order_id;
        match reconcile(signal.clone(), &snapshot, &self.trading) {
            Ok(Reconciliation {
                signal: planned,
                effects,
                closure,
            }) => {
                *signal = planned;
                match self.apply(signal, effects, closure, snapshot.price).await {
                    Ok(()) => {
                        signal.clear_error();
                        signal.failed_cycles = 0;
                    }
                    Err(e) => {
                        // The old group is still live, so the advance has to be retried next cycle.
                        if previous_group.is_some() && signal.oco_order_id == previous_group {
                            signal.current_target_level = previous_level;
                        }
                        record_failure(signal, &e);
                    }
                }
            }
            Err(ReconcileError::Inconsistent(reason)) => self.force_liquidate(signal, &reason).await,
            Err(ReconcileError::Exchange(e)) => record_failure(signal, &e),
        }

        if !signal.is_open() {
            info!(
                symbol = %signal.currency,
                exit_type = ?signal.exit_type,
                exit_price = ?signal.exit_price,
                profit = ?signal.profit,
                "Position closed"
            );
        }
    }

    pub async fn snapshot(&self, signal: &Signal) -> Result<ExchangeSnapshot, ExchangeError> {
        let symbol = signal.currency.as_str();
        let exchange = &self.exchange;

        let rules = self
            .retry
            .run("get_symbol_rules", |_| exchange.get_symbol_rules(symbol))
            .await?;
        let price = self.retry.run("get_price", |_| exchange.get_price(symbol)).await?;
        let balance = self
            .retry
            .run("get_balance", |_| exchange.get_balance(&rules.base_asset))
            .await?;

        let group = match signal.oco_order_id {
            None => None,
            Some(group_id) => match self
                .retry
                .run("get_group", |_| exchange.get_group(symbol, group_id))
                .await
            {
                Ok(group) => Some(group),
                Err(e) if e.is_unknown_order() => {
                    warn!(symbol, group_id, "Recorded protective group is unknown to the exchange");
                    None
                }
                Err(e) => return Err(e),
            },
        };
        let open_orders = self
            .retry
            .run("get_open_orders", |_| exchange.get_open_orders(symbol))
            .await?;
        let group_legs: Vec<u64> = group
            .iter()
            .flat_map(|g| g.legs.iter().map(|leg| leg.order_id))
            .collect();
        let refreshed_orders = self.refresh_exit_orders(signal, &group_legs).await?;

        Ok(ExchangeSnapshot {
            price,
            balance,
            rules,
            group,
            open_orders,
            refreshed_orders,
        })
    }

    /// Current state of exit orders the log still shows as open, except those
    /// in `skip`. Orders the exchange no longer knows are left out.
    async fn refresh_exit_orders(&self, signal: &Signal, skip: &[u64]) -> Result<Vec<OrderRecord>, ExchangeError> {
        let symbol = signal.currency.as_str();
        let exit_side = signal.exit_side();
        let mut refreshed = Vec::new();
        for order in signal
            .orders
            .iter()
            .filter(|o| o.side == exit_side && o.status.is_open() && !skip.contains(&o.order_id))
        {
            match self
                .retry
                .run("get_order_status", |_| self.exchange.get_order_status(symbol, order.order_id))
                .await
            {
                Ok(current) => refreshed.push(current),
                Err(e) if e.is_unknown_order() => {
                    debug!(symbol, order_id = order.order_id, "Logged order is unknown to the exchange");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(refreshed)
    }

    /// Executes effects in order and stops at the first failure, so a new
    /// group is never placed while an old one may still be live. The signal
    /// is closed only after the last effect went through.
    async fn apply(
        &self,
        signal: &mut Signal,
        effects: Vec<SideEffect>,
        mut closure: Option<Closure>,
        price: Decimal,
    ) -> Result<(), ExchangeError> {
        let symbol = signal.currency.clone();
        // Set once a leg of a group the exchange had already retired turns out filled.
        let mut settled = false;
        for effect in effects {
            match effect {
                SideEffect::CancelGroup { group_id } => {
                    let gone = self.cancel_group_quietly(&symbol, group_id).await?;
                    if signal.oco_order_id == Some(group_id) {
                        signal.oco_order_id = None;
                    }
                    if gone {
                        for order in self.refresh_exit_orders(signal, &[]).await? {
                            signal.record_order(order);
                        }
                        if let Some(leg) = signal.filled_exit_order().cloned() {
                            info!(symbol, group_id, order_id = leg.order_id, "Group was consumed before the cancel");
                            if closure.as_ref().is_none_or(|c| c.exit_type == ExitType::Dust) {
                                closure = Some(closure_from_leg(signal, &leg, price));
                            }
                            settled = true;
                        }
                    }
                }
                SideEffect::CancelOrder { order_id } => {
                    info!(symbol, order_id, "Canceling stray order");
                    self.cancel_order_quietly(&symbol, order_id).await?;
                }
                SideEffect::PlaceGroup { .. } | SideEffect::MarketExit { .. } if settled => {}
                SideEffect::PlaceGroup { request, level } => {
                    let group = submit_protective_group(&self.exchange, &self.retry, &request).await?;
                    info!(
                        symbol,
                        group_id = group.group_id,
                        level,
                        stop = %request.stop_trigger,
                        take_profit = %request.take_profit,
                        "Protective group placed"
                    );
                    signal.oco_order_id = Some(group.group_id);
                    for leg in group.legs {
                        signal.record_order(leg);
                    }
                }
                SideEffect::MarketExit {
                    side,
                    quantity,
                    exit_type,
                    description,
                } => {
                    let fill = submit_market_order(&self.exchange, &self.retry, &symbol, side, quantity).await?;
                    signal.record_order(fill.to_record(side, quantity, Utc::now()));
                    if fill.executed_qty <= Decimal::ZERO {
                        return Err(ExchangeError::Rejected {
                            code: 0,
                            msg: format!("market exit order {} executed nothing", fill.order_id),
                        });
                    }
                    closure = Some(Closure {
                        exit_type,
                        exit_price: fill.fill_price,
                        exit_quantity: fill.executed_qty,
                        description,
                    });
                }
            }
        }

        if let Some(closure) = closure {
            signal.close(closure, Utc::now());
        }
        Ok(())
    }

    async fn cancel_order_quietly(&self, symbol: &str, order_id: u64) -> Result<(), ExchangeError> {
        match self
            .retry
            .run("cancel_order", |_| self.exchange.cancel_order(symbol, order_id))
            .await
        {
            Err(e) if e.is_unknown_order() => Ok(()),
            other => other,
        }
    }

    /// Returns true when the exchange no longer knew the group, which means
    /// it may have been consumed by a fill.
    async fn cancel_group_quietly(&self, symbol: &str, group_id: u64) -> Result<bool, ExchangeError> {
        match self
            .retry
            .run("cancel_group", |_| self.exchange.cancel_group(symbol, group_id))
            .await
        {
            Ok(()) => Ok(false),
            Err(e) if e.is_unknown_order() => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Flattens the position and closes the signal as a critical error.
    /// On failure the signal stays open with the error recorded.
    async fn force_liquidate(&self, signal: &mut Signal, reason: &str) {
        error!(symbol = %signal.currency, reason, "Forcing liquidation");
        if let Err(e) = self.liquidate(signal, reason).await {
            error!(symbol = %signal.currency, error = %e, "Forced liquidation failed");
            signal.mark_error(format!("Forced liquidation failed: {e}"));
        }
    }

    async fn liquidate(&self, signal: &mut Signal, reason: &str) -> Result<(), ExchangeError> {
        let symbol = signal.currency.clone();
        let exchange = &self.exchange;
        let rules = self
            .retry
            .run("get_symbol_rules", |_| exchange.get_symbol_rules(&symbol))
            .await?;

        if let Some(group_id) = signal.oco_order_id {
            self.cancel_group_quietly(&symbol, group_id).await?;
            signal.oco_order_id = None;
        }
        let open_orders = self
            .retry
            .run("get_open_orders", |_| exchange.get_open_orders(&symbol))
            .await?;
        for order in open_orders {
            self.cancel_order_quietly(&symbol, order.order_id).await?;
        }

        let price = self.retry.run("get_price", |_| exchange.get_price(&symbol)).await?;
        let held = match signal.signal_type {
            SignalType::Long => {
                self.retry
                    .run("get_balance", |_| exchange.get_balance(&rules.base_asset))
                    .await?
                    .free
            }
            SignalType::Short => signal.real_amount.unwrap_or_default(),
        };
        let quantity = precision::floor_quantity(&rules, held);

        let side = signal.exit_side();
        let (exit_price, exit_quantity) =
            if quantity > Decimal::ZERO && precision::meets_min_notional(&rules, price, quantity) {
                let fill = submit_market_order(&self.exchange, &self.retry, &symbol, side, quantity).await?;
                signal.record_order(fill.to_record(side, quantity, Utc::now()));
                let exit_price = if fill.fill_price > Decimal::ZERO { fill.fill_price } else { price };
                (exit_price, fill.executed_qty)
            } else {
                (price, Decimal::ZERO)
            };

        signal.close(
            Closure {
                exit_type: ExitType::CriticalError,
                exit_price,
                exit_quantity,
                description: format!("Forced liquidation: {reason}"),
            },
            Utc::now(),
        );
        signal.error = Some(reason.to_string());
        Ok(())
    }
}

fn record_failure(signal: &mut Signal, error: &ExchangeError) {
    signal.failed_cycles += 1;
    warn!(
        symbol = %signal.currency,
        error = %error,
        failed_cycles = signal.failed_cycles,
        "Reconciliation failed"
    );
    signal.mark_error(error.to_string());
}
