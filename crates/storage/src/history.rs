use chrono::{DateTime, Utc};
use common::models::{Signal, SignalDraft};
use tracing::info;

/// Ordered signal collection loaded from a store for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalHistory {
    signals: Vec<Signal>,
    max_size: usize,
}

impl SignalHistory {
    pub fn new(signals: Vec<Signal>, max_size: usize) -> Self {
        Self { signals, max_size }
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut [Signal] {
        &mut self.signals
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Signal with the `(currency, date)` identity, open or closed.
    pub fn find(&self, currency: &str, date: &DateTime<Utc>) -> Option<&Signal> {
        self.signals.iter().find(|s| s.has_identity(currency, date))
    }

    pub fn open_for(&self, currency: &str) -> Option<&Signal> {
        self.signals
            .iter()
            .find(|s| s.is_open() && s.currency == currency)
    }

    pub fn open_count(&self) -> usize {
        self.signals.iter().filter(|s| s.is_open()).count()
    }

    /// True when the draft matches a stored signal by identity or by content.
    pub fn is_duplicate(&self, draft: &SignalDraft) -> bool {
        if draft.date.is_some_and(|date| self.find(&draft.currency, &date).is_some()) {
            return true;
        }
        self.signals.iter().any(|s| {
            s.currency == draft.currency
                && s.signal_type == draft.signal_type
                && s.entry == draft.entry
                && s.stop_loss == draft.stop_loss
                && s.targets == draft.targets
        })
    }

    pub fn push(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    /// Drops the oldest closed signals until the collection fits `max_size`.
    /// Open signals are never dropped, so the result may still exceed the cap.
    pub fn enforce_retention(&mut self) -> usize {
        let mut dropped = 0;
        while self.signals.len() > self.max_size {
            let oldest_closed = self
                .signals
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.is_open())
                .min_by_key(|(_, s)| s.date)
                .map(|(index, _)| index);

            match oldest_closed {
                Some(index) => {
                    self.signals.remove(index);
                    dropped += 1;
                }
                None => break,
            }
        }
        if dropped > 0 {
            info!(dropped, kept = self.signals.len(), "Trimmed signal history");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{closed_signal, signal};
    use common::models::SignalType;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_lookup_ignores_closed() {
        let history = SignalHistory::new(vec![closed_signal("BTCUSDT", 1), signal("ETHUSDT", 2)], 50);
        assert!(history.open_for("BTCUSDT").is_none());
        assert_eq!(history.open_for("ETHUSDT").map(|s| s.date), Some(signal("ETHUSDT", 2).date));
        assert_eq!(history.open_count(), 1);
    }

    #[test]
    fn test_find_by_identity() {
        let history = SignalHistory::new(vec![closed_signal("BTCUSDT", 1), signal("BTCUSDT", 2)], 50);
        let second = signal("BTCUSDT", 2).date;

        assert!(history.find("BTCUSDT", &second).is_some_and(|s| s.is_open()));
        assert!(history.find("BTCUSDT", &signal("BTCUSDT", 1).date).is_some_and(|s| !s.is_open()));
        assert!(history.find("ETHUSDT", &second).is_none());
        assert!(!history.is_empty());
    }

    #[test]
    fn test_duplicate_detection() {
        let stored = signal("BTCUSDT", 1);
        let history = SignalHistory::new(vec![stored.clone()], 50);

        let same_content = SignalDraft {
            currency: "BTCUSDT".to_string(),
            signal_type: SignalType::Long,
            entry: stored.entry,
            targets: stored.targets.clone(),
            stop_loss: stored.stop_loss,
            date: None,
        };
        assert!(history.is_duplicate(&same_content));

        let same_identity = SignalDraft {
            entry: dec!(101),
            date: Some(stored.date),
            ..same_content.clone()
        };
        assert!(history.is_duplicate(&same_identity));

        let fresh = SignalDraft {
            entry: dec!(101),
            ..same_content
        };
        assert!(!history.is_duplicate(&fresh));
    }

    #[test]
    fn test_retention_drops_oldest_closed_first() {
        let mut history = SignalHistory::new(
            vec![
                signal("BTCUSDT", 1),
                closed_signal("ETHUSDT", 3),
                closed_signal("SOLUSDT", 2),
                closed_signal("XRPUSDT", 4),
            ],
            2,
        );

        assert_eq!(history.enforce_retention(), 2);
        let currencies: Vec<_> = history.signals().iter().map(|s| s.currency.as_str()).collect();
        assert_eq!(currencies, vec!["BTCUSDT", "XRPUSDT"]);
    }

    #[test]
    fn test_retention_never_drops_open_signals() {
        let mut history = SignalHistory::new(
            vec![signal("BTCUSDT", 1), signal("ETHUSDT", 2), closed_signal("SOLUSDT", 3)],
            1,
        );

        assert_eq!(history.enforce_retention(), 1);
        assert_eq!(history.len(), 2);
        assert!(history.signals().iter().all(|s| s.is_open()));
    }
}
