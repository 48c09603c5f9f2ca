//! Conversion of raw quantities and prices into exchange-legal values.
//!
//! Every function here is pure. A zero `step_size` or `tick_size` means the
//! exchange does not constrain that dimension and the value passes through.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::SymbolTradingRules;

/// Decimal places implied by a step such as `0.00100000` (3).
pub fn step_precision(step: Decimal) -> u32 {
    step.normalize().scale()
}

fn to_step(value: Decimal, step: Decimal, strategy: RoundingStrategy) -> Decimal {
    let units = (value / step).round_dp_with_strategy(0, strategy);
    let mut snapped = units * step;
    snapped.rescale(step_precision(step));
    snapped
}

/// Clamps to `min_qty`, rounds to the nearest `step_size` multiple and
/// formats at the step's precision.
pub fn adjust_quantity(rules: &SymbolTradingRules, raw: Decimal) -> Decimal {
    let step = rules.step_size;
    let clamped = raw.max(rules.min_qty);
    if step <= Decimal::ZERO {
        return clamped;
    }

    let quantity = to_step(clamped, step, RoundingStrategy::MidpointAwayFromZero);
    if quantity < rules.min_qty {
        return to_step(rules.min_qty, step, RoundingStrategy::ToPositiveInfinity);
    }
    quantity
}

/// Rounds down to a `step_size` multiple. Returns zero below `min_qty`.
pub fn floor_quantity(rules: &SymbolTradingRules, raw: Decimal) -> Decimal {
    let step = rules.step_size;
    let quantity = if step <= Decimal::ZERO {
        raw
    } else {
        to_step(raw, step, RoundingStrategy::ToZero)
    };
    if quantity < rules.min_qty || quantity <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        quantity
    }
}

/// Rounds up to a `step_size` multiple, never below `min_qty`.
pub fn ceil_quantity(rules: &SymbolTradingRules, raw: Decimal) -> Decimal {
    let step = rules.step_size;
    let clamped = raw.max(rules.min_qty);
    if step <= Decimal::ZERO {
        return clamped;
    }
    to_step(clamped, step, RoundingStrategy::ToPositiveInfinity)
}

/// Rounds to the nearest `tick_size` multiple at the tick's precision.
pub fn adjust_price(rules: &SymbolTradingRules, raw: Decimal) -> Decimal {
    let tick = rules.tick_size;
    if tick <= Decimal::ZERO {
        return raw;
    }
    let price = to_step(raw, tick, RoundingStrategy::MidpointAwayFromZero);
    if price <= Decimal::ZERO { to_step(tick, tick, RoundingStrategy::ToZero) } else { price }
}

pub fn notional(price: Decimal, qty: Decimal) -> Decimal {
    price * qty
}

pub fn meets_min_notional(rules: &SymbolTradingRules, price: Decimal, qty: Decimal) -> bool {
    notional(price, qty) >= rules.min_notional
}
