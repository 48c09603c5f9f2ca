use std::sync::Arc;

use common::models::{MarketFill, ProtectiveGroup, Side};
use exchange::{ExchangeAdapter, ExchangeError, ProtectiveGroupRequest, RetryPolicy};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

/// Places a market order under the retry policy without ever filling twice.
/// Every attempt after the first checks whether the exchange already accepted
/// the order under the same client id before submitting again.
pub async fn submit_market_order(
    exchange: &Arc<dyn ExchangeAdapter>,
    retry: &RetryPolicy,
    symbol: &str,
    side: Side,
    quantity: Decimal,
) -> Result<MarketFill, ExchangeError> {
    let client_order_id = Uuid::new_v4().simple().to_string();

    retry
        .run("place_market_order", |attempt| {
            let exchange = exchange.clone();
            let client_order_id = client_order_id.clone();
            async move {
                if attempt > 0 {
                    if let Some(fill) = exchange.find_order_by_client_id(symbol, &client_order_id).await? {
                        info!(symbol, client_order_id = %client_order_id, order_id = fill.order_id, "Market order was already accepted");
                        return Ok(fill);
                    }
                }
                exchange
                    .place_market_order(symbol, side, quantity, &client_order_id)
                    .await
            }
        })
        .await
}

/// Places a protective group under the retry policy. A retry first looks the
/// group up by its list client id, so a timeout after the exchange accepted
/// it never leaves a second group behind.
pub async fn submit_protective_group(
    exchange: &Arc<dyn ExchangeAdapter>,
    retry: &RetryPolicy,
    request: &ProtectiveGroupRequest,
) -> Result<ProtectiveGroup, ExchangeError> {
    let list_client_order_id = Uuid::new_v4().simple().to_string();
    let symbol = request.symbol.as_str();

    retry
        .run("place_protective_group", |attempt| {
            let exchange = exchange.clone();
            let list_client_order_id = list_client_order_id.clone();
            async move {
                if attempt > 0 {
                    if let Some(group) = exchange.find_group_by_client_id(symbol, &list_client_order_id).await? {
                        info!(symbol, list_client_order_id = %list_client_order_id, group_id = group.group_id, "Protective group was already accepted");
                        return Ok(group);
                    }
                }
                exchange.place_protective_group(request, &list_client_order_id).await
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::OrderStatus;
    use exchange::MockExchangeAdapter;
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;
    use std::{sync::Mutex, time::Duration};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    fn fill() -> MarketFill {
        MarketFill {
            order_id: 7,
            status: OrderStatus::Filled,
            executed_qty: dec!(2),
            fill_price: dec!(100),
        }
    }

    #[tokio::test]
    async fn test_retry_reuses_accepted_order() {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_place_market_order()
            .times(1)
            .returning(|_, _, _, _| Err(ExchangeError::Network("timeout".to_string())));
        mock.expect_find_order_by_client_id()
            .with(eq("BTCUSDT"), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(Some(fill())));
        let exchange: Arc<dyn ExchangeAdapter> = Arc::new(mock);

        let result = submit_market_order(&exchange, &fast_retry(), "BTCUSDT", Side::Buy, dec!(2)).await;
        assert_eq!(result.unwrap().order_id, 7);
    }

    #[tokio::test]
    async fn test_retry_resubmits_when_order_unknown() {
        let mut mock = MockExchangeAdapter::new();
        let mut placed = 0;
        mock.expect_place_market_order().times(2).returning(move |_, _, _, _| {
            placed += 1;
            if placed == 1 {
                Err(ExchangeError::RateLimited("429".to_string()))
            } else {
                Ok(fill())
            }
        });
        mock.expect_find_order_by_client_id()
            .times(1)
            .returning(|_, _| Ok(None));
        let exchange: Arc<dyn ExchangeAdapter> = Arc::new(mock);

        let result = submit_market_order(&exchange, &fast_retry(), "BTCUSDT", Side::Buy, dec!(2)).await;
        assert_eq!(result.unwrap(), fill());
    }

    fn request() -> ProtectiveGroupRequest {
        ProtectiveGroupRequest {
            symbol: "BTCUSDT".to_string(),
            side: Side::Sell,
            quantity: dec!(2),
            stop_trigger: dec!(95),
            stop_limit: dec!(94.53),
            take_profit: dec!(120),
        }
    }

    #[tokio::test]
    async fn test_group_retry_reuses_accepted_group() {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_place_protective_group()
            .times(1)
            .returning(|_, _| Err(ExchangeError::Network("timeout".to_string())));
        mock.expect_find_group_by_client_id()
            .with(eq("BTCUSDT"), mockall::predicate::always())
            .times(1)
            .returning(|_, _| {
                Ok(Some(ProtectiveGroup {
                    group_id: 31,
                    legs: Vec::new(),
                }))
            });
        let exchange: Arc<dyn ExchangeAdapter> = Arc::new(mock);

        let group = submit_protective_group(&exchange, &fast_retry(), &request()).await.unwrap();
        assert_eq!(group.group_id, 31);
    }

    #[tokio::test]
    async fn test_group_retry_keeps_the_same_client_id() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut mock = MockExchangeAdapter::new();
        let placed = seen.clone();
        mock.expect_place_protective_group().times(2).returning(move |_, id| {
            let mut ids = placed.lock().unwrap();
            ids.push(id.to_string());
            if ids.len() == 1 {
                Err(ExchangeError::RateLimited("429".to_string()))
            } else {
                Ok(ProtectiveGroup {
                    group_id: 32,
                    legs: Vec::new(),
                })
            }
        });
        let looked_up = seen.clone();
        mock.expect_find_group_by_client_id()
            .withf(move |_, id| looked_up.lock().unwrap().first().is_some_and(|first| first == id))
            .times(1)
            .returning(|_, _| Ok(None));
        let exchange: Arc<dyn ExchangeAdapter> = Arc::new(mock);

        let group = submit_protective_group(&exchange, &fast_retry(), &request()).await.unwrap();
        assert_eq!(group.group_id, 32);
        let ids = seen.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_place_market_order().times(1).returning(|_, _, _, _| {
            Err(ExchangeError::Rejected {
                code: -2010,
                msg: "Account has insufficient balance".to_string(),
            })
        });
        mock.expect_find_order_by_client_id().never();
        let exchange: Arc<dyn ExchangeAdapter> = Arc::new(mock);

        let result = submit_market_order(&exchange, &fast_retry(), "BTCUSDT", Side::Sell, dec!(2)).await;
        assert!(matches!(result, Err(ExchangeError::Rejected { .. })));
    }
}
