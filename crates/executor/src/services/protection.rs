//! Stop and take-profit levels for each escalation step.

use common::{
    config::{StopPolicy, TradingConfig},
    models::{Side, Signal, SymbolTradingRules},
    precision,
};
use exchange::ProtectiveGroupRequest;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveLevels {
    pub stop_trigger: Decimal,
    pub stop_limit: Decimal,
    pub take_profit: Decimal,
}

impl ProtectiveLevels {
    pub fn request(&self, signal: &Signal, quantity: Decimal) -> ProtectiveGroupRequest {
        ProtectiveGroupRequest {
            symbol: signal.currency.clone(),
            side: signal.exit_side(),
            quantity,
            stop_trigger: self.stop_trigger,
            stop_limit: self.stop_limit,
            take_profit: self.take_profit,
        }
    }
}

/// Levels protecting `signal` once `level` targets have been crossed.
/// `None` when every target is crossed or the signal has no entry fill.
pub fn protective_levels(
    signal: &Signal,
    level: usize,
    trading: &TradingConfig,
    rules: &SymbolTradingRules,
) -> Option<ProtectiveLevels> {
    let targets = &signal.targets;
    if level >= targets.len() {
        return None;
    }
    let real_entry = signal.real_entry?;
    let kind = signal.signal_type;

    let floor = match (level, trading.stop_policy) {
        (0, _) => signal.stop_loss,
        (_, StopPolicy::Breakeven) | (1, StopPolicy::BreakevenThenPreviousTarget) => real_entry,
        (_, StopPolicy::BreakevenThenPreviousTarget) => targets[level - 2],
        (_, StopPolicy::Midpoint) => {
            let anchor = if level == 1 { real_entry } else { targets[level - 2] };
            (anchor + targets[level - 1]) / Decimal::TWO
        }
    };
    let stop = kind.more_protective(floor, signal.stop_loss);

    let take_profit = match level {
        0 => targets.get(1).copied().unwrap_or(targets[0]),
        _ => targets[level],
    };

    let slippage = trading.stop_limit_slippage_percent / Decimal::ONE_HUNDRED;
    // The limit trails the trigger in the direction the exit trades.
    let stop_limit = match signal.exit_side() {
        Side::Sell => stop * (Decimal::ONE - slippage),
        Side::Buy => stop * (Decimal::ONE + slippage),
    };

    Some(ProtectiveLevels {
        stop_trigger: precision::adjust_price(rules, stop),
        stop_limit: precision::adjust_price(rules, stop_limit),
        take_profit: precision::adjust_price(rules, take_profit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{long_signal, rules, short_signal};
    use rust_decimal_macros::dec;

    fn policy(stop_policy: StopPolicy) -> TradingConfig {
        TradingConfig {
            stop_policy,
            ..TradingConfig::default()
        }
    }

    #[test]
    fn test_initial_levels_use_second_target() {
        let levels = protective_levels(&long_signal(), 0, &TradingConfig::default(), &rules()).unwrap();
        assert_eq!(levels.stop_trigger, dec!(95));
        assert_eq!(levels.stop_limit, dec!(94.53));
        assert_eq!(levels.take_profit, dec!(120));
    }

    #[test]
    fn test_single_target_falls_back_to_first() {
        let mut signal = long_signal();
        signal.targets = vec![dec!(110)];
        let levels = protective_levels(&signal, 0, &TradingConfig::default(), &rules()).unwrap();
        assert_eq!(levels.take_profit, dec!(110));
    }

    #[test]
    fn test_first_target_moves_stop_to_breakeven() {
        let levels = protective_levels(&long_signal(), 1, &TradingConfig::default(), &rules()).unwrap();
        assert_eq!(levels.stop_trigger, dec!(100));
        assert_eq!(levels.take_profit, dec!(120));
    }

    #[test]
    fn test_later_levels_trail_previous_target() {
        let levels = protective_levels(&long_signal(), 2, &TradingConfig::default(), &rules()).unwrap();
        assert_eq!(levels.stop_trigger, dec!(110));
        assert_eq!(levels.take_profit, dec!(130));
    }

    #[test]
    fn test_exhausted_targets_have_no_levels() {
        assert!(protective_levels(&long_signal(), 3, &TradingConfig::default(), &rules()).is_none());
    }

    #[test]
    fn test_alternative_policies() {
        let breakeven = protective_levels(&long_signal(), 2, &policy(StopPolicy::Breakeven), &rules()).unwrap();
        assert_eq!(breakeven.stop_trigger, dec!(100));

        let midpoint = protective_levels(&long_signal(), 1, &policy(StopPolicy::Midpoint), &rules()).unwrap();
        assert_eq!(midpoint.stop_trigger, dec!(105));
        let midpoint = protective_levels(&long_signal(), 2, &policy(StopPolicy::Midpoint), &rules()).unwrap();
        assert_eq!(midpoint.stop_trigger, dec!(115));
    }

    #[test]
    fn test_stop_never_looser_than_stop_loss() {
        let mut signal = long_signal();
        signal.real_entry = Some(dec!(90));
        let levels = protective_levels(&signal, 1, &TradingConfig::default(), &rules()).unwrap();
        assert_eq!(levels.stop_trigger, dec!(95));
    }

    #[test]
    fn test_short_levels_are_mirrored() {
        let signal = short_signal();
        let levels = protective_levels(&signal, 0, &TradingConfig::default(), &rules()).unwrap();
        assert_eq!(levels.stop_trigger, dec!(105));
        assert_eq!(levels.stop_limit, dec!(105.53));
        assert_eq!(levels.take_profit, dec!(80));

        let levels = protective_levels(&signal, 1, &TradingConfig::default(), &rules()).unwrap();
        assert_eq!(levels.stop_trigger, dec!(100));
        assert_eq!(levels.take_profit, dec!(80));
    }
}
