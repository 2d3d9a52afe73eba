//! Order payload builders.
//!
//! Every price that leaves this module is floored to the symbol's tick.

use crate::wire::{OrderRequest, PlanOrderRequest, EXECUTE_CYCLE_7_DAYS, TREND_LATEST_PRICE};
use rust_decimal::Decimal;
use spreadbot_core::sizing::normalize_price;
use spreadbot_core::{
    EntryOrderType, MarginMode, OrderKind, OrderSide, Position, PositionType, Price, Size,
    TriggerType,
};

/// Opening order.
#[derive(Debug, Clone)]
pub struct EntryOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub leverage: u32,
    pub volume: Size,
    pub margin_mode: MarginMode,
    pub order_type: EntryOrderType,
    /// Limit price before normalization.
    pub price: Price,
    pub price_scale: u32,
}

impl EntryOrder {
    /// Market entries carry no price.
    pub fn into_request(self) -> OrderRequest {
        let kind = self.order_type.order_kind();
        let price = kind
            .needs_price()
            .then(|| normalize_price(self.price, self.price_scale));
        OrderRequest {
            symbol: self.symbol,
            side: self.side,
            leverage: Some(self.leverage),
            vol: self.volume,
            open_type: Some(self.margin_mode),
            kind,
            price,
            position_id: None,
            reduce_only: None,
        }
    }
}

/// Reduce-only market-to-current close for `position`.
///
/// `volume` is capped at the held volume; `None` when nothing is left to close.
pub fn close_request(position: &Position, volume: Size) -> Option<OrderRequest> {
    let volume = volume.min(position.hold_vol);
    if !volume.is_positive() {
        return None;
    }
    Some(OrderRequest {
        symbol: position.symbol.clone(),
        side: position.position_type.close_side(),
        leverage: None,
        vol: volume,
        open_type: None,
        kind: OrderKind::MarketToCurrent,
        price: None,
        position_id: Some(position.position_id),
        reduce_only: Some(true),
    })
}

/// Which protective order a plan order is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectiveKind {
    TakeProfit,
    StopLoss,
}

impl ProtectiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TakeProfit => "take_profit",
            Self::StopLoss => "stop_loss",
        }
    }
}

/// Inputs for the exchange-side stop-loss / take-profit pair.
#[derive(Debug, Clone)]
pub struct ProtectiveSpec {
    pub symbol: String,
    pub position_type: PositionType,
    pub position_id: i64,
    pub fill_price: Price,
    pub volume: Size,
    pub price_scale: u32,
    pub margin_mode: MarginMode,
    pub leverage: u32,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
}

/// Trigger price and comparison for a protective order.
///
/// Long TP above the fill (>=), long SL below (<=); mirrored for shorts.
pub fn trigger_for(
    kind: ProtectiveKind,
    position_type: PositionType,
    fill: Price,
    pct: Decimal,
    price_scale: u32,
) -> (Price, TriggerType) {
    let pct = pct.abs();
    let (offset, trigger) = match (kind, position_type) {
        (ProtectiveKind::TakeProfit, PositionType::Long) => (pct, TriggerType::GreaterOrEqual),
        (ProtectiveKind::StopLoss, PositionType::Long) => (-pct, TriggerType::LessOrEqual),
        (ProtectiveKind::TakeProfit, PositionType::Short) => (-pct, TriggerType::LessOrEqual),
        (ProtectiveKind::StopLoss, PositionType::Short) => (pct, TriggerType::GreaterOrEqual),
    };
    (normalize_price(fill.offset_pct(offset), price_scale), trigger)
}

/// Plan orders for every configured percent. Zero percents are ignored.
pub fn protective_requests(spec: &ProtectiveSpec) -> Vec<(ProtectiveKind, PlanOrderRequest)> {
    let configured = [
        (ProtectiveKind::TakeProfit, spec.take_profit_pct),
        (ProtectiveKind::StopLoss, spec.stop_loss_pct),
    ];
    configured
        .into_iter()
        .filter_map(|(kind, pct)| pct.filter(|p| !p.is_zero()).map(|p| (kind, p)))
        .map(|(kind, pct)| {
            let (trigger_price, trigger_type) =
                trigger_for(kind, spec.position_type, spec.fill_price, pct, spec.price_scale);
            let req = PlanOrderRequest {
                symbol: spec.symbol.clone(),
                vol: spec.volume,
                side: spec.position_type.close_side(),
                open_type: Some(spec.margin_mode),
                leverage: Some(spec.leverage),
                trigger_price,
                trigger_type,
                execute_cycle: EXECUTE_CYCLE_7_DAYS,
                order_type: OrderKind::Market,
                trend: TREND_LATEST_PRICE,
                position_id: spec.position_id,
                reduce_only: true,
            };
            (kind, req)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec(position_type: PositionType) -> ProtectiveSpec {
        ProtectiveSpec {
            symbol: "ABC_USDT".into(),
            position_type,
            position_id: 42,
            fill_price: Price::new(dec!(2.0)),
            volume: Size::new(dec!(250)),
            price_scale: 4,
            margin_mode: MarginMode::Isolated,
            leverage: 10,
            stop_loss_pct: Some(dec!(5)),
            take_profit_pct: Some(dec!(10)),
        }
    }

    #[test]
    fn test_long_protective_triggers() {
        let reqs = protective_requests(&spec(PositionType::Long));
        assert_eq!(reqs.len(), 2);
        let (kind, tp) = &reqs[0];
        assert_eq!(*kind, ProtectiveKind::TakeProfit);
        assert_eq!(tp.trigger_price.inner(), dec!(2.2));
        assert_eq!(tp.trigger_type, TriggerType::GreaterOrEqual);
        assert_eq!(tp.side, OrderSide::CloseLong);
        assert!(tp.reduce_only);

        let (_, sl) = &reqs[1];
        assert_eq!(sl.trigger_price.inner(), dec!(1.9));
        assert_eq!(sl.trigger_type, TriggerType::LessOrEqual);
    }

    #[test]
    fn test_short_protective_triggers() {
        let reqs = protective_requests(&spec(PositionType::Short));
        let (_, tp) = &reqs[0];
        assert_eq!(tp.trigger_price.inner(), dec!(1.8));
        assert_eq!(tp.trigger_type, TriggerType::LessOrEqual);
        assert_eq!(tp.side, OrderSide::CloseShort);
        let (_, sl) = &reqs[1];
        assert_eq!(sl.trigger_price.inner(), dec!(2.1));
        assert_eq!(sl.trigger_type, TriggerType::GreaterOrEqual);
    }

    #[test]
    fn test_trigger_floors_to_tick() {
        let (price, _) = trigger_for(
            ProtectiveKind::StopLoss,
            PositionType::Short,
            Price::new(dec!(0.123456)),
            dec!(3),
            4,
        );
        // 0.123456 * 1.03 = 0.12715968
        assert_eq!(price.inner(), dec!(0.1271));
    }

    #[test]
    fn test_only_configured_orders_built() {
        let mut s = spec(PositionType::Long);
        s.take_profit_pct = None;
        let reqs = protective_requests(&s);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].0, ProtectiveKind::StopLoss);
    }

    #[test]
    fn test_market_entry_drops_price() {
        let entry = EntryOrder {
            symbol: "ABC_USDT".into(),
            side: OrderSide::OpenShort,
            leverage: 10,
            volume: Size::new(dec!(250)),
            margin_mode: MarginMode::Isolated,
            order_type: EntryOrderType::Market,
            price: Price::new(dec!(2.0)),
            price_scale: 4,
        };
        let req = entry.into_request();
        assert_eq!(req.kind, OrderKind::Market);
        assert!(req.price.is_none());
    }

    #[test]
    fn test_limit_entry_price_floored() {
        let entry = EntryOrder {
            symbol: "ABC_USDT".into(),
            side: OrderSide::OpenLong,
            leverage: 10,
            volume: Size::new(dec!(250)),
            margin_mode: MarginMode::Isolated,
            order_type: EntryOrderType::Limit,
            price: Price::new(dec!(2.034567)),
            price_scale: 3,
        };
        let req = entry.into_request();
        assert_eq!(req.price.unwrap().inner(), dec!(2.034));
    }

    #[test]
    fn test_close_request_caps_volume() {
        let position = Position {
            symbol: "ABC_USDT".into(),
            position_id: 9,
            position_type: PositionType::Long,
            open_avg_price: Price::new(dec!(2)),
            leverage: 10,
            hold_vol: Size::new(dec!(100)),
            create_time: 0,
            state: 1,
        };
        let req = close_request(&position, Size::new(dec!(500))).unwrap();
        assert_eq!(req.vol.inner(), dec!(100));
        assert_eq!(req.kind, OrderKind::MarketToCurrent);
        assert_eq!(req.side, OrderSide::CloseLong);
        assert_eq!(req.reduce_only, Some(true));
        assert_eq!(req.position_id, Some(9));

        assert!(close_request(&position, Size::ZERO).is_none());
    }
}
