//! Fixed-point helpers built on `rust_decimal`.
//!
//! Prices, sizes and volumes travel as `Decimal` end to end (wire,
//! storage, arithmetic) rather than `f64`, so that rounding to a tick
//! size or summing traded volume never drifts. Internal GBM/statistics
//! math still runs in `f64` (the formulas in `price_engine.rs` and
//! `detector.rs` are float-native) and is converted at the boundary.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Round `value` to the nearest multiple of `tick`, ties away from zero —
/// mirrors Python's `round(price / tick) * tick` used by the simulator.
pub fn round_to_tick(value: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return value;
    }
    (value / tick).round() * tick
}

/// Convert an `f64` price/size into a `Decimal` at a fixed scale, saturating
/// to zero on non-finite input rather than panicking.
pub fn decimal_from_f64(value: f64, scale: u32) -> Decimal {
    Decimal::from_f64(value)
        .unwrap_or(Decimal::ZERO)
        .round_dp(scale)
}

pub fn f64_from_decimal(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_tick() {
        assert_eq!(round_to_tick(185.037, 0.01), 185.04);
        assert_eq!(round_to_tick(185.034, 0.01), 185.03);
    }

    #[test]
    fn decimal_roundtrip_preserves_scale() {
        let d = decimal_from_f64(185.0412345, 8);
        assert_eq!(d.scale(), 8);
    }
}
