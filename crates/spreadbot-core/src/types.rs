//! Exchange-reported records and pipeline messages.
//!
//! Contains `Position` (validated from a loose wire row), `Ticker`, and
//! `OrderCandidate` (the hand-off between the signal source and the
//! order processing engine).

use crate::error::{CoreError, Result};
use crate::order::PositionType;
use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position state code for an active holding.
pub const POSITION_STATE_HOLDING: i64 = 1;

/// Position row as it arrives from `open_positions`.
///
/// Every field is optional so one bad row cannot fail the whole response;
/// `Position::try_from` enforces the required set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub symbol: Option<String>,
    pub position_id: Option<i64>,
    pub position_type: Option<i64>,
    pub open_avg_price: Option<Decimal>,
    pub leverage: Option<u32>,
    pub hold_vol: Option<Decimal>,
    pub create_time: Option<i64>,
    pub state: Option<i64>,
}

/// Open position, validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub position_id: i64,
    pub position_type: PositionType,
    pub open_avg_price: Price,
    pub leverage: u32,
    pub hold_vol: Size,
    /// Open time, Unix milliseconds.
    pub create_time: i64,
    pub state: i64,
}

impl TryFrom<RawPosition> for Position {
    type Error = CoreError;

    fn try_from(raw: RawPosition) -> Result<Self> {
        let position_type = raw
            .position_type
            .ok_or(CoreError::MissingField("positionType"))?;
        Ok(Self {
            symbol: raw.symbol.ok_or(CoreError::MissingField("symbol"))?,
            position_id: raw.position_id.ok_or(CoreError::MissingField("positionId"))?,
            position_type: PositionType::from_code(position_type)?,
            open_avg_price: Price::new(
                raw.open_avg_price
                    .ok_or(CoreError::MissingField("openAvgPrice"))?,
            ),
            leverage: raw.leverage.ok_or(CoreError::MissingField("leverage"))?,
            hold_vol: Size::new(raw.hold_vol.ok_or(CoreError::MissingField("holdVol"))?),
            create_time: raw.create_time.ok_or(CoreError::MissingField("createTime"))?,
            state: raw.state.unwrap_or(POSITION_STATE_HOLDING),
        })
    }
}

impl Position {
    pub fn is_holding(&self) -> bool {
        self.state == POSITION_STATE_HOLDING
    }

    /// Unleveraged PnL percent at `current`; sign flips for shorts.
    pub fn base_pnl_pct(&self, current: Price) -> Option<Decimal> {
        let raw = current.pct_from(self.open_avg_price)?;
        Some(match self.position_type {
            PositionType::Long => raw,
            PositionType::Short => -raw,
        })
    }

    /// Leveraged PnL percent.
    pub fn pnl_pct(&self, current: Price) -> Option<Decimal> {
        self.base_pnl_pct(current)
            .map(|base| base * Decimal::from(self.leverage))
    }

    /// Age in milliseconds at `now_ms` (never negative).
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.create_time).max(0)
    }
}

/// Market ticker subset used by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Price,
    #[serde(default)]
    pub bid1: Option<Price>,
    #[serde(default)]
    pub ask1: Option<Price>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Spread opportunity handed from the signal source to the order engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCandidate {
    /// Correlation id for log spans.
    pub id: Uuid,
    pub symbol: String,
    pub base_coin: String,
    /// Venue mid price; used as the limit price.
    pub reference_price: Price,
    /// Secondary-market price the spread was measured against.
    pub counterparty_price: Price,
    /// `(counterparty - reference) / reference * 100`.
    pub spread_percent: Decimal,
    pub contract_size: Decimal,
    pub price_scale: u32,
    pub max_volume: Option<Size>,
    pub received_at: DateTime<Utc>,
}

impl OrderCandidate {
    pub fn new(
        symbol: impl Into<String>,
        reference_price: Price,
        counterparty_price: Price,
        spread_percent: Decimal,
    ) -> Self {
        let symbol = symbol.into();
        let base_coin = symbol
            .split_once('_')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| symbol.clone());
        Self {
            id: Uuid::new_v4(),
            symbol,
            base_coin,
            reference_price,
            counterparty_price,
            spread_percent,
            contract_size: Decimal::ONE,
            price_scale: 8,
            max_volume: None,
            received_at: Utc::now(),
        }
    }

    /// Attach sizing hints from the token configuration.
    #[must_use]
    pub fn with_sizing(mut self, contract_size: Decimal, price_scale: u32, max_volume: Option<Size>) -> Self {
        self.contract_size = contract_size;
        self.price_scale = price_scale;
        self.max_volume = max_volume;
        self
    }

    /// Age of this candidate in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.received_at).num_milliseconds()
    }
}

/// Spread percent of `counterparty` against `reference`.
///
/// Returns `None` when the reference is zero.
pub fn spread_pct(reference: Price, counterparty: Price) -> Option<Decimal> {
    counterparty.pct_from(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw_position() -> RawPosition {
        serde_json::from_str(
            r#"{"symbol":"ABC_USDT","positionId":42,"positionType":2,"openAvgPrice":2.0,
                "leverage":10,"holdVol":250,"createTime":1700000000000,"state":1}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_position_from_wire() {
        let pos = Position::try_from(raw_position()).unwrap();
        assert_eq!(pos.position_id, 42);
        assert_eq!(pos.position_type, PositionType::Short);
        assert_eq!(pos.hold_vol.inner(), dec!(250));
        assert!(pos.is_holding());
    }

    #[test]
    fn test_position_missing_field_rejected() {
        let mut raw = raw_position();
        raw.open_avg_price = None;
        let err = Position::try_from(raw).unwrap_err();
        assert!(matches!(err, CoreError::MissingField("openAvgPrice")));
    }

    #[test]
    fn test_pnl_sign_flips_for_short() {
        let pos = Position::try_from(raw_position()).unwrap();
        // Short from 2.0, price rises to 2.02: -1% base, -10% leveraged
        let pnl = pos.pnl_pct(Price::new(dec!(2.02))).unwrap();
        assert_eq!(pnl, dec!(-10));
    }

    #[test]
    fn test_spread_pct() {
        let spread = spread_pct(Price::new(dec!(100)), Price::new(dec!(102.5))).unwrap();
        assert_eq!(spread, dec!(2.5));
        assert!(spread_pct(Price::ZERO, Price::ONE).is_none());
    }

    #[test]
    fn test_candidate_base_coin() {
        let c = OrderCandidate::new("ABC_USDT", Price::ONE, Price::ONE, dec!(1));
        assert_eq!(c.base_coin, "ABC");
    }
}
