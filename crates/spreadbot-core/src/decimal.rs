//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Exchange precision is
//! expressed as a number of decimal places (`priceScale` / `volScale`), so
//! both types expose floor-to-scale helpers that never round up.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Smallest increment for a given number of decimal places (`10^-scale`).
#[inline]
pub fn unit_for_scale(scale: u32) -> Decimal {
    Decimal::new(1, scale)
}

/// Price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Tick size for a price scale.
    #[inline]
    pub fn tick(price_scale: u32) -> Self {
        Self(unit_for_scale(price_scale))
    }

    /// Round down to tick size.
    #[inline]
    pub fn round_to_tick(&self, tick_size: Price) -> Self {
        if tick_size.is_zero() {
            return *self;
        }
        Self((self.0 / tick_size.0).floor() * tick_size.0)
    }

    /// Floor to `price_scale` decimal places via the tick size.
    ///
    /// The result never exceeds `self` and carries at most `price_scale`
    /// fractional digits.
    #[inline]
    pub fn floor_to_scale(&self, price_scale: u32) -> Self {
        Self(self.round_to_tick(Self::tick(price_scale)).0.round_dp(price_scale))
    }

    /// Scale by `(1 + pct / 100)`. Negative `pct` moves the price down.
    #[inline]
    pub fn offset_pct(&self, pct: Decimal) -> Self {
        Self(self.0 * (Decimal::ONE + pct / Decimal::ONE_HUNDRED))
    }

    /// Calculate percentage difference from another price.
    #[inline]
    pub fn pct_from(&self, other: Price) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        Some((self.0 - other.0) / other.0 * Decimal::ONE_HUNDRED)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Volume (contracts) with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Volume step for a volume scale.
    #[inline]
    pub fn step(vol_scale: u32) -> Self {
        Self(unit_for_scale(vol_scale))
    }

    /// Round down to lot size.
    #[inline]
    pub fn round_to_lot(&self, lot_size: Size) -> Self {
        if lot_size.is_zero() {
            return *self;
        }
        Self((self.0 / lot_size.0).floor() * lot_size.0)
    }

    /// Floor to the nearest multiple of `10^-vol_scale`.
    ///
    /// With `vol_scale == 0` the result is a whole number of contracts.
    #[inline]
    pub fn floor_to_scale(&self, vol_scale: u32) -> Self {
        Self(self.round_to_lot(Self::step(vol_scale)).0.round_dp(vol_scale))
    }

    #[inline]
    pub fn min(self, other: Size) -> Size {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Size {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Size {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Serialize a decimal as a JSON number in plain notation.
///
/// The exchange expects `vol` and `triggerPrice` as numbers and rejects
/// exponent forms, so the normalized decimal text is written verbatim
/// (`250`, `1.5`, `0.00001234`).
pub fn serialize_number<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    let text = value.normalize().to_string();
    match RawValue::from_string(text) {
        Ok(raw) => raw.serialize(serializer),
        Err(_) => serializer.serialize_str(&value.to_string()),
    }
}

/// `serialize_number` for newtypes over `Decimal`.
pub fn serialize_size<S: Serializer>(value: &Size, serializer: S) -> Result<S::Ok, S::Error> {
    serialize_number(&value.0, serializer)
}

/// `serialize_number` for `Price`.
pub fn serialize_price_number<S: Serializer>(
    value: &Price,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_number(&value.0, serializer)
}

/// Serialize a `Price` as its decimal string (limit order `price` field).
pub fn serialize_price_str<S: Serializer>(
    value: &Option<Price>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(p) => serializer.serialize_str(&p.0.normalize().to_string()),
        None => serializer.serialize_none(),
    }
}
