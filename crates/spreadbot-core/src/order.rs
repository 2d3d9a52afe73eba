//! Order-related enums and their exchange wire codes.
//!
//! The futures API encodes every enum as a small integer; `Serialize`
//! is implemented by hand so payload structs can embed these types directly.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

macro_rules! wire_code {
    ($ty:ident, $kind:literal, { $($variant:ident = $code:literal),+ $(,)? }) => {
        impl $ty {
            /// Integer code used on the wire.
            pub fn code(&self) -> i64 {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            /// Parse from the wire integer.
            pub fn from_code(code: i64) -> Result<Self> {
                match code {
                    $($code => Ok(Self::$variant),)+
                    other => Err(CoreError::UnknownCode { kind: $kind, code: other }),
                }
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_i64(self.code())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let code = i64::deserialize(deserializer)?;
                Self::from_code(code).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Order side as the futures API understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    OpenLong,
    CloseShort,
    OpenShort,
    CloseLong,
}

wire_code!(OrderSide, "order side", {
    OpenLong = 1,
    CloseShort = 2,
    OpenShort = 3,
    CloseLong = 4,
});

impl OrderSide {
    /// Opening side for a spread: positive spread opens long.
    pub fn open_for_spread(spread_percent: rust_decimal::Decimal) -> Self {
        if spread_percent > rust_decimal::Decimal::ZERO {
            Self::OpenLong
        } else {
            Self::OpenShort
        }
    }

    /// Direction of the position this side acts on.
    pub fn position_type(&self) -> PositionType {
        match self {
            Self::OpenLong | Self::CloseLong => PositionType::Long,
            Self::OpenShort | Self::CloseShort => PositionType::Short,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::OpenLong | Self::OpenShort)
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenLong => write!(f, "open_long"),
            Self::CloseShort => write!(f, "close_short"),
            Self::OpenShort => write!(f, "open_short"),
            Self::CloseLong => write!(f, "close_long"),
        }
    }
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionType {
    Long,
    Short,
}

wire_code!(PositionType, "position type", {
    Long = 1,
    Short = 2,
});

impl PositionType {
    /// Side that closes a position of this type.
    pub fn close_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::CloseLong,
            Self::Short => OrderSide::CloseShort,
        }
    }

    /// Side that adds to a position of this type.
    pub fn open_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::OpenLong,
            Self::Short => OrderSide::OpenShort,
        }
    }

    /// 1 for long, -1 for short (for PnL calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
        }
    }
}

impl fmt::Display for PositionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Order type (`type` on create-order, `orderType` on plan orders).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    Limit,
    PostOnly,
    ImmediateOrCancel,
    FillOrKill,
    Market,
    /// Market order converted to a limit at the current price. Used for closes.
    MarketToCurrent,
}

wire_code!(OrderKind, "order kind", {
    Limit = 1,
    PostOnly = 2,
    ImmediateOrCancel = 3,
    FillOrKill = 4,
    Market = 5,
    MarketToCurrent = 6,
});

impl OrderKind {
    pub fn needs_price(&self) -> bool {
        !matches!(self, Self::Market | Self::MarketToCurrent)
    }
}

/// Margin mode (`openType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MarginMode {
    #[default]
    Isolated,
    Cross,
}

wire_code!(MarginMode, "margin mode", {
    Isolated = 1,
    Cross = 2,
});

impl MarginMode {
    pub fn flipped(&self) -> Self {
        match self {
            Self::Isolated => Self::Cross,
            Self::Cross => Self::Isolated,
        }
    }
}

/// Comparison used by a trigger order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerType {
    /// Fire when price rises to or above the trigger.
    GreaterOrEqual,
    /// Fire when price falls to or below the trigger.
    LessOrEqual,
}

wire_code!(TriggerType, "trigger type", {
    GreaterOrEqual = 1,
    LessOrEqual = 2,
});

/// Entry order style configured in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryOrderType {
    #[default]
    Limit,
    Market,
}

impl EntryOrderType {
    pub fn order_kind(&self) -> OrderKind {
        match self {
            Self::Limit => OrderKind::Limit,
            Self::Market => OrderKind::Market,
        }
    }
}

/// Order state reported by order-by-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderState {
    Uninformed,
    Uncompleted,
    Completed,
    Cancelled,
    Invalid,
}

wire_code!(OrderState, "order state", {
    Uninformed = 1,
    Uncompleted = 2,
    Completed = 3,
    Cancelled = 4,
    Invalid = 5,
});

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_from_spread_sign() {
        assert_eq!(OrderSide::open_for_spread(dec!(2.5)), OrderSide::OpenLong);
        assert_eq!(OrderSide::open_for_spread(dec!(-1.3)), OrderSide::OpenShort);
    }

    #[test]
    fn test_close_side_matches_position() {
        assert_eq!(PositionType::Long.close_side(), OrderSide::CloseLong);
        assert_eq!(PositionType::Short.close_side(), OrderSide::CloseShort);
        assert_eq!(OrderSide::CloseShort.position_type(), PositionType::Short);
    }

    #[test]
    fn test_wire_codes_serialize_as_integers() {
        assert_eq!(serde_json::to_string(&OrderSide::OpenShort).unwrap(), "3");
        assert_eq!(serde_json::to_string(&OrderKind::MarketToCurrent).unwrap(), "6");
        let state: OrderState = serde_json::from_str("3").unwrap();
        assert_eq!(state, OrderState::Completed);
        assert!(serde_json::from_str::<PositionType>("7").is_err());
    }

    #[test]
    fn test_margin_mode_flip() {
        assert_eq!(MarginMode::Isolated.flipped(), MarginMode::Cross);
        assert_eq!(MarginMode::default().code(), 1);
    }
}
