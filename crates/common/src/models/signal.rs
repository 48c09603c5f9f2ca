use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::order::{MarketFill, OrderRecord, OrderStatus, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Long,
    Short,
}

impl SignalType {
    pub fn entry_side(self) -> Side {
        match self {
            Self::Long => Side::Buy,
            Self::Short => Side::Sell,
        }
    }

    pub fn exit_side(self) -> Side {
        self.entry_side().opposite()
    }

    /// True when `price` has reached `level` in the profitable direction.
    pub fn has_reached(self, price: Decimal, level: Decimal) -> bool {
        match self {
            Self::Long => price >= level,
            Self::Short => price <= level,
        }
    }

    pub fn more_favorable(self, a: Decimal, b: Decimal) -> Decimal {
        match self {
            Self::Long => a.max(b),
            Self::Short => a.min(b),
        }
    }

    /// The tighter of two stop levels.
    pub fn more_protective(self, a: Decimal, b: Decimal) -> Decimal {
        self.more_favorable(a, b)
    }

    /// Signed gain of moving from `entry` to `exit` with `qty` units.
    pub fn pnl(self, entry: Decimal, exit: Decimal, qty: Decimal) -> Decimal {
        match self {
            Self::Long => (exit - entry) * qty,
            Self::Short => (entry - exit) * qty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitType {
    StopLoss,
    TakeProfit,
    Dust,
    CriticalError,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DraftError {
    #[error("Currency is empty")]
    EmptyCurrency,
    #[error("Signal has no targets")]
    NoTargets,
    #[error("Prices must be positive")]
    NonPositivePrice,
    #[error("Stop-loss {stop_loss} is on the wrong side of entry {entry} for {signal_type:?}")]
    StopLossSide {
        signal_type: SignalType,
        entry: Decimal,
        stop_loss: Decimal,
    },
    #[error("Target {target} is on the wrong side of entry {entry} for {signal_type:?}")]
    TargetSide {
        signal_type: SignalType,
        entry: Decimal,
        target: Decimal,
    },
    #[error("Targets for {0:?} are not ordered in the profitable direction")]
    TargetOrder(SignalType),
}

/// Canonical signal as delivered by the parsing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDraft {
    pub currency: String,
    pub signal_type: SignalType,
    pub entry: Decimal,
    pub targets: Vec<Decimal>,
    pub stop_loss: Decimal,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

impl SignalDraft {
    /// Upper-cases the symbol and strips pair separators (`btc/usdt` -> `BTCUSDT`).
    pub fn normalized(mut self) -> Self {
        self.currency = self
            .currency
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase();
        self
    }

    pub fn validate(&self) -> Result<(), DraftError> {
        if self.currency.trim().is_empty() {
            return Err(DraftError::EmptyCurrency);
        }
        if self.targets.is_empty() {
            return Err(DraftError::NoTargets);
        }
        if self.entry <= Decimal::ZERO
            || self.stop_loss <= Decimal::ZERO
            || self.targets.iter().any(|t| *t <= Decimal::ZERO)
        {
            return Err(DraftError::NonPositivePrice);
        }

        let kind = self.signal_type;
        if kind.has_reached(self.stop_loss, self.entry) {
            return Err(DraftError::StopLossSide {
                signal_type: kind,
                entry: self.entry,
                stop_loss: self.stop_loss,
            });
        }
        if let Some(target) = self
            .targets
            .iter()
            .find(|t| !kind.has_reached(**t, self.entry) || **t == self.entry)
        {
            return Err(DraftError::TargetSide {
                signal_type: kind,
                entry: self.entry,
                target: *target,
            });
        }
        if self
            .targets
            .windows(2)
            .any(|pair| !kind.has_reached(pair[1], pair[0]))
        {
            return Err(DraftError::TargetOrder(kind));
        }
        Ok(())
    }
}

/// How a position left the market.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub exit_type: ExitType,
    pub exit_price: Decimal,
    pub exit_quantity: Decimal,
    pub description: String,
}

/// One trade idea and everything the bot did about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub currency: String,
    pub signal_type: SignalType,
    pub entry: Decimal,
    pub targets: Vec<Decimal>,
    pub stop_loss: Decimal,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub current_target_level: usize,
    #[serde(default)]
    pub highest_price: Option<Decimal>,
    #[serde(default)]
    pub real_entry: Option<Decimal>,
    #[serde(default)]
    pub real_amount: Option<Decimal>,
    #[serde(default)]
    pub oco_order_id: Option<u64>,
    #[serde(default)]
    pub orders: Vec<OrderRecord>,
    pub status: SignalStatus,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_type: Option<ExitType>,
    #[serde(default)]
    pub profit: Option<Decimal>,
    #[serde(default)]
    pub profit_percentage: Option<Decimal>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status_description: Option<String>,
    #[serde(default)]
    pub failed_cycles: u32,
}

impl Signal {
    /// Builds an OPEN signal from a filled entry order.
    pub fn opened(draft: &SignalDraft, date: DateTime<Utc>, entry_order: OrderRecord, fill: &MarketFill) -> Self {
        Self {
            currency: draft.currency.clone(),
            signal_type: draft.signal_type,
            entry: draft.entry,
            targets: draft.targets.clone(),
            stop_loss: draft.stop_loss,
            date,
            current_target_level: 0,
            highest_price: Some(fill.fill_price),
            real_entry: Some(fill.fill_price),
            real_amount: Some(fill.executed_qty),
            oco_order_id: None,
            orders: vec![entry_order],
            status: SignalStatus::Open,
            exit_price: None,
            exit_time: None,
            exit_type: None,
            profit: None,
            profit_percentage: None,
            error: None,
            status_description: Some("Entry filled".to_string()),
            failed_cycles: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SignalStatus::Open
    }

    pub fn has_identity(&self, currency: &str, date: &DateTime<Utc>) -> bool {
        self.currency == currency && self.date == *date
    }

    pub fn entry_side(&self) -> Side {
        self.signal_type.entry_side()
    }

    pub fn exit_side(&self) -> Side {
        self.signal_type.exit_side()
    }

    /// Moves the favourable extreme; never lets it regress.
    pub fn ratchet(&mut self, price: Decimal) {
        self.highest_price = Some(match self.highest_price {
            Some(previous) => self.signal_type.more_favorable(previous, price),
            None => price,
        });
    }

    /// Number of targets `price` has reached, counted from the first.
    pub fn targets_reached(&self, price: Decimal) -> usize {
        self.targets
            .iter()
            .take_while(|target| self.signal_type.has_reached(price, **target))
            .count()
    }

    /// Raises the escalation level. Lower levels are ignored.
    pub fn advance_level(&mut self, level: usize) -> bool {
        if level > self.current_target_level {
            self.current_target_level = level;
            true
        } else {
            false
        }
    }

    /// Inserts or refreshes an order in the log. FILLED entries are frozen.
    pub fn record_order(&mut self, record: OrderRecord) {
        match self.orders.iter_mut().find(|o| o.order_id == record.order_id) {
            Some(existing) if existing.status == OrderStatus::Filled => {}
            Some(existing) => *existing = record,
            None => self.orders.push(record),
        }
    }

    /// Most recent FILLED order on the exit side.
    pub fn filled_exit_order(&self) -> Option<&OrderRecord> {
        let exit_side = self.exit_side();
        self.orders
            .iter()
            .rev()
            .find(|o| o.side == exit_side && o.is_filled())
    }

    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// OPEN -> CLOSED. Returns false when the signal was already closed.
    pub fn close(&mut self, closure: Closure, now: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }

        let (profit, percentage) = match (closure.exit_type, self.real_entry) {
            (ExitType::Dust, _) if closure.exit_quantity.is_zero() => (Decimal::ZERO, Decimal::ZERO),
            (_, Some(entry)) if !entry.is_zero() => {
                let profit = self.signal_type.pnl(entry, closure.exit_price, closure.exit_quantity);
                let pct = self
                    .signal_type
                    .pnl(entry, closure.exit_price, Decimal::ONE_HUNDRED)
                    / entry;
                (profit, pct.round_dp(4))
            }
            _ => (Decimal::ZERO, Decimal::ZERO),
        };

        self.status = SignalStatus::Closed;
        self.exit_price = Some(closure.exit_price);
        self.exit_time = Some(now);
        self.exit_type = Some(closure.exit_type);
        self.profit = Some(profit);
        self.profit_percentage = Some(percentage);
        self.oco_order_id = None;
        self.status_description = Some(closure.description);
        true
    }
}
