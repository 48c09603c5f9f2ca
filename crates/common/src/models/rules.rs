use rust_decimal::Decimal;

/// LOT_SIZE, PRICE_FILTER and NOTIONAL filters of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTradingRules {
    pub symbol: String,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub tick_size: Decimal,
    pub min_notional: Decimal,
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AssetBalance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}
