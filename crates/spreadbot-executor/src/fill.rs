//! Fill confirmation.
//!
//! Two strategies: poll the order by id until it completes with a position,
//! then (or instead) scan open positions for a holding on the symbol and
//! side. The scan always runs when polling gives up.

use spreadbot_core::{EntryOrderType, FillConfirmationSettings, OrderState, PositionType, Price, Size};
use spreadbot_exchange::{holding_positions, ExchangeApi};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How the fill was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSource {
    OrderStatus,
    PositionScan,
}

/// A confirmed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub position_id: i64,
    /// Average fill price when the exchange reported one.
    pub price: Option<Price>,
    /// Filled volume when the exchange reported one.
    pub volume: Option<Size>,
    pub source: FillSource,
}

/// Waits for an entry order to turn into a position.
pub struct FillConfirmer<'a> {
    api: &'a dyn ExchangeApi,
    settings: &'a FillConfirmationSettings,
    order_type: EntryOrderType,
}

impl<'a> FillConfirmer<'a> {
    pub fn new(api: &'a dyn ExchangeApi, settings: &'a FillConfirmationSettings, order_type: EntryOrderType) -> Self {
        Self {
            api,
            settings,
            order_type,
        }
    }

    /// Resolve the position created by `order_id` on `symbol`.
    pub async fn confirm(&self, order_id: Option<&str>, symbol: &str, side: PositionType) -> Option<Fill> {
        if self.settings.poll_order_status {
            if let Some(order_id) = order_id {
                if let Some(fill) = self.poll_order(order_id).await {
                    return Some(fill);
                }
            }
        }
        self.scan_positions(symbol, side).await
    }

    /// Poll order-by-id until it completes with a position or the deadline passes.
    pub async fn poll_order(&self, order_id: &str) -> Option<Fill> {
        let deadline = Instant::now() + self.settings.order_wait(self.order_type);
        let delay = self.settings.poll_delay();

        while Instant::now() < deadline {
            match self.api.order_by_id(order_id.to_string()).await {
                Ok(resp) if resp.is_ok() => {
                    if let Some(detail) = resp.data {
                        if let Some(position_id) = detail.filled_position() {
                            info!(order_id, position_id, "Order filled");
                            return Some(Fill {
                                position_id,
                                price: detail.fill_price(),
                                volume: detail.filled_volume(),
                                source: FillSource::OrderStatus,
                            });
                        }
                        match detail.order_state() {
                            Some(state @ (OrderState::Cancelled | OrderState::Invalid)) => {
                                warn!(order_id, ?state, "Order ended without a fill");
                                return None;
                            }
                            state => debug!(order_id, ?state, "Order not filled yet"),
                        }
                    }
                }
                Ok(resp) => debug!(order_id, code = resp.code, "order_by_id rejected"),
                Err(e) => warn!(order_id, error = %e, "order_by_id failed"),
            }
            tokio::time::sleep(delay).await;
        }

        warn!(order_id, "Order status wait timed out");
        None
    }

    /// Look for a holding position on `symbol` and `side`.
    pub async fn scan_positions(&self, symbol: &str, side: PositionType) -> Option<Fill> {
        let (attempts, delay) = self.settings.scan_plan(self.order_type);

        for attempt in 1..=attempts {
            match holding_positions(self.api).await {
                Ok(Some(positions)) => {
                    if let Some(position) = positions
                        .into_iter()
                        .find(|p| p.symbol == symbol && p.position_type == side)
                    {
                        info!(%symbol, position_id = position.position_id, attempt, "Position found by scan");
                        return Some(Fill {
                            position_id: position.position_id,
                            price: Some(position.open_avg_price).filter(|p| p.is_positive()),
                            volume: None,
                            source: FillSource::PositionScan,
                        });
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(%symbol, error = %e, "Position scan failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        warn!(%symbol, attempts, "No position found for entry");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spreadbot_core::RawPosition;
    use spreadbot_exchange::{ApiResponse, MockCall, MockExchange, OrderDetail};

    fn detail(state: i64, position_id: Option<i64>) -> OrderDetail {
        OrderDetail {
            order_id: Some("1".into()),
            state: Some(state),
            position_id,
            deal_avg_price: Some(dec!(2.01)),
            deal_vol: Some(dec!(250)),
            ..OrderDetail::default()
        }
    }

    fn holding(symbol: &str, id: i64, side: PositionType) -> RawPosition {
        RawPosition {
            symbol: Some(symbol.into()),
            position_id: Some(id),
            position_type: Some(side.code()),
            open_avg_price: Some(dec!(2)),
            leverage: Some(10),
            hold_vol: Some(dec!(250)),
            create_time: Some(0),
            state: Some(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_completed() {
        let mock = MockExchange::new();
        mock.push_order_detail(ApiResponse::ok(detail(2, None)));
        mock.push_order_detail(ApiResponse::ok(detail(3, Some(42))));
        let settings = FillConfirmationSettings::default();

        let fill = FillConfirmer::new(&mock, &settings, EntryOrderType::Limit)
            .confirm(Some("1"), "ABC_USDT", PositionType::Long)
            .await
            .unwrap();
        assert_eq!(fill.position_id, 42);
        assert_eq!(fill.source, FillSource::OrderStatus);
        assert_eq!(fill.price.unwrap().inner(), dec!(2.01));
        assert_eq!(mock.count(|c| matches!(c, MockCall::OrderById(_))), 2);
        assert_eq!(mock.count(|c| matches!(c, MockCall::OpenPositions)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_order_falls_back_to_scan() {
        let mock = MockExchange::new();
        mock.push_order_detail(ApiResponse::ok(detail(4, None)));
        mock.set_positions(vec![holding("ABC_USDT", 7, PositionType::Short)]);
        let settings = FillConfirmationSettings::default();

        let fill = FillConfirmer::new(&mock, &settings, EntryOrderType::Market)
            .confirm(Some("1"), "ABC_USDT", PositionType::Short)
            .await
            .unwrap();
        assert_eq!(fill.position_id, 7);
        assert_eq!(fill.source, FillSource::PositionScan);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_attempts_bounded() {
        let mock = MockExchange::new();
        mock.set_positions(vec![holding("ABC_USDT", 7, PositionType::Short)]);
        let settings = FillConfirmationSettings {
            poll_order_status: false,
            ..FillConfirmationSettings::default()
        };

        let fill = FillConfirmer::new(&mock, &settings, EntryOrderType::Market)
            .confirm(Some("1"), "ABC_USDT", PositionType::Long)
            .await;
        assert!(fill.is_none());
        assert_eq!(mock.count(|c| matches!(c, MockCall::OpenPositions)), 20);
        assert_eq!(mock.count(|c| matches!(c, MockCall::OrderById(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_deadline() {
        let mock = MockExchange::new();
        let settings = FillConfirmationSettings {
            market_wait_ms: 2_000,
            poll_delay_ms: 500,
            ..FillConfirmationSettings::default()
        };
        let start = Instant::now();
        let fill = FillConfirmer::new(&mock, &settings, EntryOrderType::Market)
            .poll_order("1")
            .await;
        assert!(fill.is_none());
        assert!(start.elapsed() >= std::time::Duration::from_secs(2));
        assert_eq!(mock.count(|c| matches!(c, MockCall::OrderById(_))), 4);
    }
}
