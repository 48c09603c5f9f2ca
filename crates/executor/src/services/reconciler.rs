//! Pure reconciliation planning. Given what the exchange reports right now,
//! decides how a signal changes and which orders must be canceled or placed.
//! Nothing here performs I/O; `position_reconciler` applies the plan.

use common::{
    config::TradingConfig,
    models::{
        AssetBalance, Closure, ExitType, GroupStatus, OrderRecord, OrderType, Side, Signal, SignalType,
        SymbolTradingRules,
    },
    precision,
};
use exchange::{ExchangeError, ProtectiveGroupRequest};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::services::protection::protective_levels;

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSnapshot {
    pub price: Decimal,
    /// Base asset balance.
    pub balance: AssetBalance,
    pub rules: SymbolTradingRules,
    /// State of the recorded protective group. `None` when no group is
    /// recorded or the exchange no longer knows it.
    pub group: Option<GroupStatus>,
    pub open_orders: Vec<OrderRecord>,
    /// Current state of exit orders the log still shows as open but that are
    /// not legs of `group`.
    pub refreshed_orders: Vec<OrderRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    CancelGroup { group_id: u64 },
    CancelOrder { order_id: u64 },
    PlaceGroup {
        request: ProtectiveGroupRequest,
        level: usize,
    },
    MarketExit {
        side: Side,
        quantity: Decimal,
        exit_type: ExitType,
        description: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub signal: Signal,
    pub effects: Vec<SideEffect>,
    /// How the position ended. Only applied once every effect succeeded,
    /// so a signal never turns CLOSED while its orders may still be live.
    pub closure: Option<Closure>,
}

impl Reconciliation {
    fn unchanged(signal: Signal) -> Self {
        Self::open(signal, Vec::new())
    }

    fn open(signal: Signal, effects: Vec<SideEffect>) -> Self {
        Self {
            signal,
            effects,
            closure: None,
        }
    }

    fn closing(signal: Signal, effects: Vec<SideEffect>, closure: Closure) -> Self {
        Self {
            signal,
            effects,
            closure: Some(closure),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("Inconsistent signal state: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

pub fn reconcile(
    mut signal: Signal,
    snapshot: &ExchangeSnapshot,
    trading: &TradingConfig,
) -> Result<Reconciliation, ReconcileError> {
    if !signal.is_open() {
        return Ok(Reconciliation::unchanged(signal));
    }
    let real_amount = match (signal.real_entry, signal.real_amount) {
        (Some(entry), Some(amount)) if entry > Decimal::ZERO && amount > Decimal::ZERO => amount,
        _ => return Err(ReconcileError::Inconsistent("open signal has no entry fill".to_string())),
    };
    if signal.targets.is_empty() {
        return Err(ReconcileError::Inconsistent("open signal has no targets".to_string()));
    }

    let price = snapshot.price;
    let rules = &snapshot.rules;
    signal.ratchet(price);
    for order in &snapshot.refreshed_orders {
        signal.record_order(order.clone());
    }
    if let Some(group) = &snapshot.group {
        for leg in &group.legs {
            signal.record_order(leg.clone());
        }
    }

    let exit_side = signal.exit_side();
    let active_group = snapshot.group.as_ref().filter(|g| g.is_active());
    let strays: Vec<SideEffect> = snapshot
        .open_orders
        .iter()
        .filter(|o| o.side == exit_side)
        .filter(|o| !active_group.is_some_and(|g| g.legs.iter().any(|leg| leg.order_id == o.order_id)))
        .map(|o| SideEffect::CancelOrder { order_id: o.order_id })
        .collect();
    let filled_leg = snapshot
        .group
        .as_ref()
        .and_then(GroupStatus::filled_leg)
        .filter(|leg| leg.side == exit_side)
        .cloned();

    let exposure = match signal.signal_type {
        SignalType::Long => snapshot.balance.total(),
        SignalType::Short => real_amount,
    };
    let mut effects = Vec::new();

    if precision::notional(price, exposure) < rules.min_notional * trading.dust_safety_factor {
        if let Some(group) = active_group {
            effects.push(SideEffect::CancelGroup {
                group_id: group.group_id,
            });
        }
        let closure = match filled_leg.or_else(|| signal.filled_exit_order().cloned()) {
            Some(leg) => closure_from_leg(&signal, &leg, price),
            None => Closure {
                exit_type: ExitType::Dust,
                exit_price: price,
                exit_quantity: Decimal::ZERO,
                description: format!("Holding {exposure} is below the tradable minimum"),
            },
        };
        return Ok(Reconciliation::closing(signal, effects, closure));
    }

    if let Some(leg) = filled_leg {
        effects.extend(strays);
        let closure = closure_from_leg(&signal, &leg, price);
        return Ok(Reconciliation::closing(signal, effects, closure));
    }

    let level = signal.current_target_level.max(signal.targets_reached(price));
    let advanced = signal.advance_level(level);
    if active_group.is_some() && !advanced {
        effects.extend(strays);
        return Ok(Reconciliation::open(signal, effects));
    }

    match active_group {
        Some(group) => effects.push(SideEffect::CancelGroup {
            group_id: group.group_id,
        }),
        None => signal.oco_order_id = None,
    }
    effects.extend(strays);

    let held = match signal.signal_type {
        SignalType::Long => snapshot.balance.total(),
        SignalType::Short => real_amount,
    };
    let quantity = precision::floor_quantity(rules, held);

    if level >= signal.targets.len() {
        signal.status_description = Some(format!("All {} targets reached", signal.targets.len()));
        effects.push(SideEffect::MarketExit {
            side: exit_side,
            quantity,
            exit_type: ExitType::TakeProfit,
            description: "All targets reached, exited at market".to_string(),
        });
    } else {
        let levels = protective_levels(&signal, level, trading, rules)
            .ok_or_else(|| ReconcileError::Inconsistent(format!("no protective levels for level {level}")))?;
        if stop_breached(signal.signal_type, price, levels.stop_trigger) {
            // The exchange refuses a stop that would trigger immediately.
            signal.status_description = Some(format!(
                "Price {price} is through the level {level} stop {}",
                levels.stop_trigger
            ));
            effects.push(SideEffect::MarketExit {
                side: exit_side,
                quantity,
                exit_type: ExitType::StopLoss,
                description: format!("Stop {} already breached, exited at market", levels.stop_trigger),
            });
        } else {
            signal.status_description = Some(if advanced {
                format!("Target {level} reached, protection moved")
            } else {
                "Protection missing, replacing".to_string()
            });
            effects.push(SideEffect::PlaceGroup {
                request: levels.request(&signal, quantity),
                level,
            });
        }
    }

    Ok(Reconciliation::open(signal, effects))
}

fn stop_breached(signal_type: SignalType, price: Decimal, stop_trigger: Decimal) -> bool {
    match signal_type {
        SignalType::Long => price <= stop_trigger,
        SignalType::Short => price >= stop_trigger,
    }
}

/// Classifies a filled exit order by its type, falling back to the sign of the result.
pub fn closure_from_leg(signal: &Signal, leg: &OrderRecord, fallback_price: Decimal) -> Closure {
    let exit_price = leg.execution_price().unwrap_or(fallback_price);
    let exit_quantity = if leg.executed_qty > Decimal::ZERO {
        leg.executed_qty
    } else {
        leg.quantity
    };
    let exit_type = match leg.order_type {
        OrderType::StopLossLimit => ExitType::StopLoss,
        OrderType::LimitMaker => ExitType::TakeProfit,
        _ => {
            let entry = signal.real_entry.unwrap_or(signal.entry);
            if signal.signal_type.pnl(entry, exit_price, exit_quantity) >= Decimal::ZERO {
                ExitType::TakeProfit
            } else {
                ExitType::StopLoss
            }
        }
    };

    Closure {
        exit_type,
        exit_price,
        exit_quantity,
        description: format!("Order {} filled at {exit_price}", leg.order_id),
    }
}
