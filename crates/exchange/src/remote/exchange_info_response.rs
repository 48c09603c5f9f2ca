use common::models::SymbolTradingRules;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{ExchangeError, traits::RemoteResponse};

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
pub enum FilterResponse {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: Decimal, min_qty: Decimal },
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    PriceFilter { tick_size: Decimal },
    #[serde(rename = "NOTIONAL", rename_all = "camelCase")]
    Notional { min_notional: Decimal },
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional { min_notional: Decimal },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfoResponse {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub filters: Vec<FilterResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfoResponse>,
}

impl RemoteResponse<SymbolTradingRules> for SymbolInfoResponse {
    fn to_domain(&self) -> Result<SymbolTradingRules, ExchangeError> {
        if self.status != "TRADING" {
            return Err(ExchangeError::UnknownSymbol(format!(
                "{} is not trading ({})",
                self.symbol, self.status
            )));
        }

        let mut lot = None;
        let mut tick_size = Decimal::ZERO;
        let mut min_notional = Decimal::ZERO;
        for filter in &self.filters {
            match filter {
                FilterResponse::LotSize { step_size, min_qty } => lot = Some((*step_size, *min_qty)),
                FilterResponse::PriceFilter { tick_size: tick } => tick_size = *tick,
                FilterResponse::Notional { min_notional: min }
                | FilterResponse::MinNotional { min_notional: min } => min_notional = *min,
                FilterResponse::Other => {}
            }
        }
        let (step_size, min_qty) = lot.ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("{} has no LOT_SIZE filter", self.symbol))
        })?;

        Ok(SymbolTradingRules {
            symbol: self.symbol.clone(),
            step_size: step_size.normalize(),
            min_qty: min_qty.normalize(),
            tick_size: tick_size.normalize(),
            min_notional: min_notional.normalize(),
            base_asset: self.base_asset.clone(),
            quote_asset: self.quote_asset.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const EXCHANGE_INFO: &str = r#"{
        "timezone": "UTC",
        "symbols": [{
            "symbol": "ETHUSDT", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "USDT",
            "baseAssetPrecision": 8,
            "filters": [
                {"filterType": "PRICE_FILTER", "minPrice": "0.01000000", "maxPrice": "1000000.00000000", "tickSize": "0.01000000"},
                {"filterType": "LOT_SIZE", "minQty": "0.00010000", "maxQty": "9000.00000000", "stepSize": "0.00010000"},
                {"filterType": "ICEBERG_PARTS", "limit": 10},
                {"filterType": "NOTIONAL", "minNotional": "5.00000000", "applyMinToMarket": true,
                 "maxNotional": "9000000.00000000", "applyMaxToMarket": false, "avgPriceMins": 5}
            ]
        }]
    }"#;

    #[test]
    fn test_rules_from_filters() {
        let info: ExchangeInfoResponse = serde_json::from_str(EXCHANGE_INFO).unwrap();
        let rules = info.symbols[0].to_domain().unwrap();
        assert_eq!(rules.step_size, dec!(0.0001));
        assert_eq!(rules.min_qty, dec!(0.0001));
        assert_eq!(rules.tick_size, dec!(0.01));
        assert_eq!(rules.min_notional, dec!(5));
        assert_eq!(rules.base_asset, "ETH");
        assert_eq!(rules.quote_asset, "USDT");
    }

    #[test]
    fn test_halted_symbol_is_unknown() {
        let halted = EXCHANGE_INFO.replace("\"TRADING\"", "\"BREAK\"");
        let info: ExchangeInfoResponse = serde_json::from_str(&halted).unwrap();
        assert!(matches!(info.symbols[0].to_domain(), Err(ExchangeError::UnknownSymbol(_))));
    }
}
