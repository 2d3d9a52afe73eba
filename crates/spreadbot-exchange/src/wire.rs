//! Request and response bodies for the futures API.
//!
//! Field order in request structs is the order the exchange signs, so
//! reordering fields changes signatures.

use crate::error::{ExchangeError, ExchangeResult};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use spreadbot_core::decimal::{serialize_price_number, serialize_price_str, serialize_size};
use spreadbot_core::{
    MarginMode, OrderKind, OrderSide, OrderState, PositionType, Price, Size, TriggerType,
};
use tracing::warn;

/// Success.
pub const CODE_OK: i64 = 0;
/// Rate limited.
pub const CODE_RATE_LIMITED: i64 = 510;
/// Wrong position mode / parameter mode.
pub const CODE_WRONG_MODE: i64 = 600;
/// Insufficient balance.
pub const CODE_INSUFFICIENT_BALANCE: i64 = 2005;
/// Open orders exist for the symbol.
pub const CODE_OPEN_ORDERS: i64 = 2019;

/// Response envelope: `{success, code, data, message}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            code: CODE_OK,
            data: Some(data),
            message: None,
        }
    }

    /// Successful response without data.
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            code: CODE_OK,
            data: None,
            message: None,
        }
    }

    /// Business failure with `code`.
    pub fn err(code: i64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.success && self.code == CODE_OK
    }

    pub fn has_code(&self, code: i64) -> bool {
        !self.success && self.code == code
    }

    /// Turn a business failure into `ExchangeError::Rejected`.
    pub fn into_result(self) -> ExchangeResult<Option<T>> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err(ExchangeError::Rejected {
                code: self.code,
                message: self.message.unwrap_or_default(),
            })
        }
    }
}

impl ApiResponse<Value> {
    /// Decode `data` into `T`; a payload that does not fit is logged and
    /// treated as absent.
    pub fn typed<T: DeserializeOwned>(self) -> ApiResponse<T> {
        let data = match self.data {
            None | Some(Value::Null) => None,
            Some(value) => match serde_json::from_value(value) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(error = %e, code = self.code, "Unexpected response data shape");
                    None
                }
            },
        };
        ApiResponse {
            success: self.success,
            code: self.code,
            data,
            message: self.message,
        }
    }

    /// Decode `data` as an array of `T`, dropping rows that do not fit.
    pub fn rows<T: DeserializeOwned>(self) -> ApiResponse<Vec<T>> {
        let data = match self.data {
            Some(Value::Array(rows)) => Some(
                rows.into_iter()
                    .filter_map(|row| match serde_json::from_value(row) {
                        Ok(row) => Some(row),
                        Err(e) => {
                            warn!(error = %e, "Dropping malformed response row");
                            None
                        }
                    })
                    .collect(),
            ),
            None | Some(Value::Null) => None,
            Some(other) => {
                warn!(kind = %value_kind(&other), "Expected array in response data");
                None
            }
        };
        ApiResponse {
            success: self.success,
            code: self.code,
            data,
            message: self.message,
        }
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accept an id sent either as a JSON number or string.
fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Num(i64),
        Str(String),
    }

    Ok(match Option::<Id>::deserialize(deserializer)? {
        Some(Id::Num(n)) => Some(n.to_string()),
        Some(Id::Str(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}

/// Create-order body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(serialize_with = "serialize_size")]
    pub vol: Size,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_type: Option<MarginMode>,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    #[serde(
        serialize_with = "serialize_price_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
}

/// Plan (trigger) order execution window.
pub const EXECUTE_CYCLE_7_DAYS: i64 = 2;
/// Trigger on the latest traded price.
pub const TREND_LATEST_PRICE: i64 = 1;

/// Conditional order body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOrderRequest {
    pub symbol: String,
    #[serde(serialize_with = "serialize_size")]
    pub vol: Size,
    pub side: OrderSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_type: Option<MarginMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(serialize_with = "serialize_price_number")]
    pub trigger_price: Price,
    pub trigger_type: TriggerType,
    pub execute_cycle: i64,
    pub order_type: OrderKind,
    pub trend: i64,
    pub position_id: i64,
    pub reduce_only: bool,
}

/// Change-leverage body.
///
/// An existing position is addressed by id; otherwise the symbol, side and
/// margin mode are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LeverageRequest {
    #[serde(rename_all = "camelCase")]
    ByPosition { position_id: i64, leverage: u32 },
    #[serde(rename_all = "camelCase")]
    ByParams {
        open_type: MarginMode,
        leverage: u32,
        symbol: String,
        position_type: PositionType,
    },
}

impl LeverageRequest {
    pub fn is_by_position(&self) -> bool {
        matches!(self, Self::ByPosition { .. })
    }

    /// Side this request targets, when addressed by parameters.
    pub fn position_type(&self) -> Option<PositionType> {
        match self {
            Self::ByPosition { .. } => None,
            Self::ByParams { position_type, .. } => Some(*position_type),
        }
    }

    /// Same request with the margin mode flipped.
    pub fn with_flipped_open_type(&self) -> Option<Self> {
        match self {
            Self::ByPosition { .. } => None,
            Self::ByParams {
                open_type,
                leverage,
                symbol,
                position_type,
            } => Some(Self::ByParams {
                open_type: open_type.flipped(),
                leverage: *leverage,
                symbol: symbol.clone(),
                position_type: *position_type,
            }),
        }
    }
}

/// Cancel-all body (orders or plan orders).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelAllRequest {
    pub symbol: String,
}

/// Create-order response data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderData {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub order_id: Option<String>,
}

/// Change-leverage response data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageData {
    #[serde(default)]
    pub leverage: Option<u32>,
}

/// Order-by-id response data.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub state: Option<i64>,
    #[serde(default)]
    pub position_id: Option<i64>,
    #[serde(default)]
    pub deal_avg_price: Option<Decimal>,
    #[serde(default)]
    pub deal_vol: Option<Decimal>,
}

impl OrderDetail {
    pub fn order_state(&self) -> Option<OrderState> {
        self.state.and_then(|s| OrderState::from_code(s).ok())
    }

    /// Filled with a known position.
    pub fn filled_position(&self) -> Option<i64> {
        match (self.order_state(), self.position_id) {
            (Some(OrderState::Completed), Some(id)) if id > 0 => Some(id),
            _ => None,
        }
    }

    pub fn fill_price(&self) -> Option<Price> {
        self.deal_avg_price
            .filter(|p| *p > Decimal::ZERO)
            .map(Price::new)
    }

    pub fn filled_volume(&self) -> Option<Size> {
        self.deal_vol.filter(|v| *v > Decimal::ZERO).map(Size::new)
    }
}

/// Contract details row (bootstrap).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetail {
    pub symbol: String,
    #[serde(default)]
    pub base_coin: Option<String>,
    #[serde(default)]
    pub contract_size: Option<Decimal>,
    #[serde(default)]
    pub price_scale: Option<u32>,
    #[serde(default)]
    pub vol_scale: Option<u32>,
    #[serde(default)]
    pub max_leverage: Option<u32>,
    #[serde(default)]
    pub max_vol: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_request_field_order() {
        let req = OrderRequest {
            symbol: "ABC_USDT".into(),
            side: OrderSide::OpenLong,
            leverage: Some(10),
            vol: Size::new(dec!(250)),
            open_type: Some(MarginMode::Isolated),
            kind: OrderKind::Limit,
            price: Some(Price::new(dec!(2.0))),
            position_id: None,
            reduce_only: None,
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"symbol":"ABC_USDT","side":1,"leverage":10,"vol":250,"openType":1,"type":1,"price":"2"}"#
        );
    }

    #[test]
    fn test_leverage_request_shapes() {
        let by_pos = LeverageRequest::ByPosition {
            position_id: 7,
            leverage: 10,
        };
        assert_eq!(
            serde_json::to_string(&by_pos).unwrap(),
            r#"{"positionId":7,"leverage":10}"#
        );

        let by_params = LeverageRequest::ByParams {
            open_type: MarginMode::Isolated,
            leverage: 10,
            symbol: "ABC_USDT".into(),
            position_type: PositionType::Short,
        };
        assert_eq!(
            serde_json::to_string(&by_params).unwrap(),
            r#"{"openType":1,"leverage":10,"symbol":"ABC_USDT","positionType":2}"#
        );
        let flipped = by_params.with_flipped_open_type().unwrap();
        assert!(serde_json::to_string(&flipped).unwrap().starts_with(r#"{"openType":2"#));
        assert!(by_pos.with_flipped_open_type().is_none());
    }

    #[test]
    fn test_envelope_typed_and_rows() {
        let raw: ApiResponse<Value> = serde_json::from_str(
            r#"{"success":true,"code":0,"data":{"orderId":"7391"}}"#,
        )
        .unwrap();
        let typed = raw.typed::<CreateOrderData>();
        assert!(typed.is_ok());
        assert_eq!(typed.data.unwrap().order_id.as_deref(), Some("7391"));

        let raw: ApiResponse<Value> = serde_json::from_str(
            r#"{"success":true,"code":0,"data":[{"symbol":"A_USDT","lastPrice":1.5},{"bogus":true}]}"#,
        )
        .unwrap();
        let rows = raw.rows::<spreadbot_core::Ticker>();
        assert_eq!(rows.data.unwrap().len(), 1);
    }

    #[test]
    fn test_business_failure_keeps_code() {
        let raw: ApiResponse<Value> =
            serde_json::from_str(r#"{"success":false,"code":2019,"message":"open orders"}"#).unwrap();
        let typed = raw.typed::<LeverageData>();
        assert!(typed.has_code(CODE_OPEN_ORDERS));
        assert!(matches!(
            typed.into_result(),
            Err(ExchangeError::Rejected { code: 2019, .. })
        ));
    }

    #[test]
    fn test_order_detail_fill() {
        let detail: OrderDetail = serde_json::from_str(
            r#"{"orderId":123,"state":3,"positionId":99,"dealAvgPrice":2.01,"dealVol":250}"#,
        )
        .unwrap();
        assert_eq!(detail.order_id.as_deref(), Some("123"));
        assert_eq!(detail.filled_position(), Some(99));
        assert_eq!(detail.fill_price(), Some(Price::new(dec!(2.01))));

        let pending: OrderDetail = serde_json::from_str(r#"{"state":2,"positionId":99}"#).unwrap();
        assert!(pending.filled_position().is_none());
    }
}
