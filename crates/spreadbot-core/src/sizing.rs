//! Order sizing and price normalization.

use crate::error::{CoreError, Result};
use crate::{Price, Size};
use rust_decimal::Decimal;

/// Inputs for converting margin into a contract volume.
#[derive(Debug, Clone, Copy)]
pub struct VolumeSpec {
    pub contract_size: Decimal,
    pub vol_scale: u32,
    pub max_volume: Option<Size>,
}

/// Convert margin into a volume floored to the symbol's step.
///
/// `raw = margin * leverage / price / contract_size`. The result is capped
/// at `max_volume` when known and is always a multiple of `10^-vol_scale`.
/// Anything below one step is rejected.
pub fn compute_volume(margin: Decimal, leverage: u32, price: Price, spec: VolumeSpec) -> Result<Size> {
    if !price.is_positive() {
        return Err(CoreError::InvalidPrice(price.to_string()));
    }
    if spec.contract_size <= Decimal::ZERO {
        return Err(CoreError::InvalidSize(format!(
            "contract size {}",
            spec.contract_size
        )));
    }

    let raw = margin * Decimal::from(leverage) / price.inner() / spec.contract_size;
    let mut volume = Size::new(raw).floor_to_scale(spec.vol_scale);
    if let Some(max) = spec.max_volume.filter(|m| m.is_positive()) {
        volume = volume.min(max).floor_to_scale(spec.vol_scale);
    }

    let step = Size::step(spec.vol_scale);
    if volume < step {
        return Err(CoreError::InsufficientMargin {
            volume: raw.normalize().to_string(),
            step: step.to_string(),
        });
    }
    Ok(volume)
}

/// Fraction of a baseline volume, floored to the step. May be zero.
pub fn fraction_of(volume: Size, fraction: Decimal, vol_scale: u32) -> Size {
    (volume * fraction).floor_to_scale(vol_scale)
}

/// Normalize a price to the symbol's scale (floor, never up).
pub fn normalize_price(price: Price, price_scale: u32) -> Price {
    price.floor_to_scale(price_scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec(vol_scale: u32) -> VolumeSpec {
        VolumeSpec {
            contract_size: Decimal::ONE,
            vol_scale,
            max_volume: None,
        }
    }

    #[test]
    fn test_reference_volume() {
        let vol = compute_volume(dec!(50), 10, Price::new(dec!(2.0)), spec(0)).unwrap();
        assert_eq!(vol.inner(), dec!(250));
        assert_eq!(vol.inner().scale(), 0);
    }

    #[test]
    fn test_volume_floors_to_step() {
        // 10 * 3 / 7 = 4.2857...
        let vol = compute_volume(dec!(10), 3, Price::new(dec!(7)), spec(2)).unwrap();
        assert_eq!(vol.inner(), dec!(4.28));

        let vol = compute_volume(dec!(10), 3, Price::new(dec!(7)), spec(0)).unwrap();
        assert_eq!(vol.inner(), dec!(4));
    }

    #[test]
    fn test_volume_below_step_rejected() {
        let err = compute_volume(dec!(1), 1, Price::new(dec!(50000)), spec(0)).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientMargin { .. }));
    }

    #[test]
    fn test_volume_capped_at_max() {
        let mut s = spec(0);
        s.max_volume = Some(Size::new(dec!(100)));
        let vol = compute_volume(dec!(50), 10, Price::new(dec!(2.0)), s).unwrap();
        assert_eq!(vol.inner(), dec!(100));
    }

    #[test]
    fn test_contract_size_divides() {
        let s = VolumeSpec {
            contract_size: dec!(10),
            vol_scale: 0,
            max_volume: None,
        };
        let vol = compute_volume(dec!(50), 10, Price::new(dec!(2.0)), s).unwrap();
        assert_eq!(vol.inner(), dec!(25));
    }

    #[test]
    fn test_zero_price_rejected() {
        assert!(compute_volume(dec!(50), 10, Price::ZERO, spec(0)).is_err());
    }

    #[test]
    fn test_fraction_of_floors() {
        assert_eq!(fraction_of(Size::new(dec!(250)), dec!(0.33), 0).inner(), dec!(82));
        assert!(fraction_of(Size::new(dec!(1)), dec!(0.5), 0).is_zero());
    }
}
