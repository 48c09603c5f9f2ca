use std::sync::Arc;

use chrono::Utc;
use common::{
    config::TradingConfig,
    models::{DraftError, MarketFill, Signal, SignalDraft, SignalType, SymbolTradingRules},
    precision,
};
use exchange::{ExchangeAdapter, ExchangeError, RetryPolicy};
use rust_decimal::Decimal;
use storage::SignalHistory;
use thiserror::Error;
use tracing::{info, warn};

use crate::services::{
    order_submission::{submit_market_order, submit_protective_group},
    protection::protective_levels,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("Invalid draft: {0}")]
    InvalidDraft(#[from] DraftError),
    #[error("{0} already has an open signal")]
    AlreadyOpen(String),
    #[error("Signal for {0} was already processed")]
    Duplicate(String),
    #[error("{0:?} signals are disabled")]
    UnsupportedDirection(SignalType),
    #[error("Unknown pair {symbol}: {reason}")]
    UnknownPair { symbol: String, reason: String },
    #[error("Price {price} is {deviation}% away from entry {entry}")]
    PriceOutOfTolerance {
        price: Decimal,
        entry: Decimal,
        deviation: Decimal,
    },
    #[error("Insufficient {asset}: need {required}, have {available}")]
    InsufficientBalance {
        asset: String,
        required: Decimal,
        available: Decimal,
    },
    #[error("Entry order for {0} was not filled")]
    NotFilled(String),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Turns a validated draft into an open, protected position.
pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeAdapter>,
    trading: TradingConfig,
    retry: RetryPolicy,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, trading: TradingConfig, retry: RetryPolicy) -> Self {
        Self {
            exchange,
            trading,
            retry,
        }
    }

    pub async fn execute(&self, draft: SignalDraft, history: &SignalHistory) -> Result<Signal, Rejection> {
        let draft = draft.normalized();
        draft.validate()?;
        let symbol = draft.currency.clone();

        if history.open_for(&symbol).is_some() {
            return Err(Rejection::AlreadyOpen(symbol));
        }
        if history.is_duplicate(&draft) {
            return Err(Rejection::Duplicate(symbol));
        }
        if draft.signal_type == SignalType::Short && !self.trading.allow_short {
            return Err(Rejection::UnsupportedDirection(SignalType::Short));
        }

        let rules = match self
            .retry
            .run("get_symbol_rules", |_| self.exchange.get_symbol_rules(&symbol))
            .await
        {
            Ok(rules) => rules,
            Err(e @ (ExchangeError::UnknownSymbol(_) | ExchangeError::InvalidResponse(_))) => {
                return Err(Rejection::UnknownPair {
                    symbol,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let price = self
            .retry
            .run("get_price", |_| self.exchange.get_price(&symbol))
            .await?;
        let deviation = ((price - draft.entry).abs() / draft.entry * Decimal::ONE_HUNDRED).round_dp(2);
        if deviation > self.trading.price_tolerance_percent {
            return Err(Rejection::PriceOutOfTolerance {
                price,
                entry: draft.entry,
                deviation,
            });
        }

        let quantity = self.entry_quantity(&draft, &rules, price).await?;
        let side = draft.signal_type.entry_side();
        let fill = submit_market_order(&self.exchange, &self.retry, &symbol, side, quantity).await?;
        if fill.executed_qty <= Decimal::ZERO {
            warn!(symbol, order_id = fill.order_id, status = ?fill.status, "Entry order executed nothing");
            return Err(Rejection::NotFilled(symbol));
        }
        let fill = if fill.fill_price > Decimal::ZERO {
            fill
        } else {
            MarketFill {
                fill_price: price,
                ..fill
            }
        };

        let now = Utc::now();
        let entry_order = fill.to_record(side, quantity, now);
        let mut signal = Signal::opened(&draft, draft.date.unwrap_or(now), entry_order, &fill);
        info!(
            symbol,
            signal_type = ?signal.signal_type,
            real_entry = %fill.fill_price,
            real_amount = %fill.executed_qty,
            "Position opened"
        );

        if let Err(e) = self.protect(&mut signal, &rules).await {
            // The position stays open; the next reconciliation cycle places the group.
            warn!(symbol, error = %e, "Initial protective group failed");
            signal.mark_error(format!("Protective group placement failed: {e}"));
        }
        Ok(signal)
    }

    /// Sizes the entry from the configured share of the spendable balance,
    /// bumped to the minimum notional when needed.
    async fn entry_quantity(
        &self,
        draft: &SignalDraft,
        rules: &SymbolTradingRules,
        price: Decimal,
    ) -> Result<Decimal, Rejection> {
        let allocation = self.trading.allocation_percent / Decimal::ONE_HUNDRED;
        let (asset, available) = match draft.signal_type {
            SignalType::Long => (rules.quote_asset.clone(), self.free_balance(&rules.quote_asset).await?),
            SignalType::Short => (rules.base_asset.clone(), self.free_balance(&rules.base_asset).await?),
        };
        let budget_qty = match draft.signal_type {
            SignalType::Long => available * allocation / price,
            SignalType::Short => available * allocation,
        };

        let mut quantity = precision::adjust_quantity(rules, budget_qty);
        if !precision::meets_min_notional(rules, price, quantity) {
            let bumped = rules.min_notional * (Decimal::ONE + self.trading.min_notional_margin) / price;
            quantity = precision::ceil_quantity(rules, bumped);
        }

        let required = match draft.signal_type {
            SignalType::Long => precision::notional(price, quantity),
            SignalType::Short => quantity,
        };
        if required > available {
            return Err(Rejection::InsufficientBalance {
                asset,
                required,
                available,
            });
        }
        Ok(quantity)
    }

    async fn free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        self.retry
            .run("get_free_balance", |_| self.exchange.get_free_balance(asset))
            .await
    }

    async fn protect(&self, signal: &mut Signal, rules: &SymbolTradingRules) -> Result<(), ExchangeError> {
        let executed = signal.real_amount.unwrap_or_default();
        let quantity = match signal.signal_type {
            // Fees are taken from the bought asset, so the free balance can be below the fill.
            SignalType::Long => executed.min(self.free_balance(&rules.base_asset).await?),
            SignalType::Short => executed,
        };
        let quantity = precision::floor_quantity(rules, quantity);
        let levels = protective_levels(signal, 0, &self.trading, rules)
            .ok_or_else(|| ExchangeError::InvalidResponse("signal has no protective levels".to_string()))?;
        if quantity.is_zero() || !precision::meets_min_notional(rules, levels.stop_trigger, quantity) {
            return Err(ExchangeError::Rejected {
                code: 0,
                msg: format!("protective quantity {quantity} is below the trading minimums"),
            });
        }

        let request = levels.request(signal, quantity);
        let group = submit_protective_group(&self.exchange, &self.retry, &request).await?;

        info!(
            symbol = %signal.currency,
            group_id = group.group_id,
            stop = %levels.stop_trigger,
            take_profit = %levels.take_profit,
            "Position protected"
        );
        signal.oco_order_id = Some(group.group_id);
        for leg in group.legs {
            signal.record_order(leg);
        }
        signal.status_description = Some("Protected at level 0".to_string());
        Ok(())
    }
}
