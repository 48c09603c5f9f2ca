pub mod draft_inbox;
pub mod order_executor;
pub mod order_submission;
pub mod position_reconciler;
pub mod protection;
pub mod reconciler;

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use common::models::{
        MarketFill, OrderRecord, OrderStatus, OrderType, ProtectiveGroup, Side, Signal, SignalDraft,
        SignalType, SymbolTradingRules,
    };
    use exchange::{ProtectiveGroupRequest, RetryPolicy};
    use rust_decimal_macros::dec;

    pub fn rules() -> SymbolTradingRules {
        SymbolTradingRules {
            symbol: "BTCUSDT".to_string(),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            tick_size: dec!(0.01),
            min_notional: dec!(5),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
        }
    }

    pub fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    pub fn draft(currency: &str) -> SignalDraft {
        SignalDraft {
            currency: currency.to_string(),
            signal_type: SignalType::Long,
            entry: dec!(100),
            targets: vec![dec!(110), dec!(120), dec!(130)],
            stop_loss: dec!(95),
            date: None,
        }
    }

    fn opened(draft: &SignalDraft) -> Signal {
        let date = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let fill = MarketFill {
            order_id: 1,
            status: OrderStatus::Filled,
            executed_qty: dec!(2),
            fill_price: dec!(100),
        };
        let record = fill.to_record(draft.signal_type.entry_side(), dec!(2), date);
        Signal::opened(draft, date, record, &fill)
    }

    /// LONG BTCUSDT: entry 100, targets 110/120/130, stop 95, 2 filled at 100.
    pub fn long_signal() -> Signal {
        opened(&draft("BTCUSDT"))
    }

    /// SHORT BTCUSDT: entry 100, targets 90/80/70, stop 105, 2 filled at 100.
    pub fn short_signal() -> Signal {
        opened(&SignalDraft {
            signal_type: SignalType::Short,
            targets: vec![dec!(90), dec!(80), dec!(70)],
            stop_loss: dec!(105),
            ..draft("BTCUSDT")
        })
    }

    pub fn leg(order_id: u64, order_type: OrderType, status: OrderStatus, side: Side) -> OrderRecord {
        OrderRecord {
            order_id,
            order_type,
            status,
            side,
            quantity: dec!(2),
            executed_qty: if status == OrderStatus::Filled { dec!(2) } else { dec!(0) },
            price: None,
            stop_price: None,
            avg_price: None,
            oco_group_id: None,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap(),
        }
    }

    /// Group `group_id` whose legs are numbered `group_id * 10 + 1` (stop) and `+ 2` (take-profit).
    pub fn group(group_id: u64, request: &ProtectiveGroupRequest) -> ProtectiveGroup {
        let mut stop = leg(group_id * 10 + 1, OrderType::StopLossLimit, OrderStatus::New, request.side);
        stop.price = Some(request.stop_limit);
        stop.stop_price = Some(request.stop_trigger);
        stop.quantity = request.quantity;
        stop.oco_group_id = Some(group_id);

        let mut take_profit = leg(group_id * 10 + 2, OrderType::LimitMaker, OrderStatus::New, request.side);
        take_profit.price = Some(request.take_profit);
        take_profit.quantity = request.quantity;
        take_profit.oco_group_id = Some(group_id);

        ProtectiveGroup {
            group_id,
            legs: vec![stop, take_profit],
        }
    }
}
