//! Stock quantities in fixed-point micro-units.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Micro-units per whole unit.
const SCALE: i64 = 1_000_000;

/// A stock quantity held as an integer count of micro-units (six decimal places).
///
/// Fractional units (litres, kilograms) add and subtract exactly, so a reserve
/// followed by a release of the same amount always lands back on the same value.
/// Serialized as a plain JSON number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    micros: i64,
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { micros: 0 };

    pub const fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// A whole number of units.
    pub const fn units(units: i64) -> Self {
        Self {
            micros: units * SCALE,
        }
    }

    /// Converts a decimal amount, rounding to the nearest micro-unit.
    ///
    /// Returns `None` for NaN, infinities and values out of range.
    pub fn from_f64(value: f64) -> Option<Self> {
        let scaled = (value * SCALE as f64).round();
        if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Self {
            micros: scaled as i64,
        })
    }

    pub fn micros(&self) -> i64 {
        self.micros
    }

    pub fn as_f64(&self) -> f64 {
        self.micros as f64 / SCALE as f64
    }

    pub fn is_positive(&self) -> bool {
        self.micros > 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.micros.checked_add(rhs.micros).map(Self::from_micros)
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

impl std::ops::Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Self) -> Self::Output {
        Quantity::from_micros(self.micros + rhs.micros)
    }
}

impl std::ops::AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Self) {
        self.micros += rhs.micros;
    }
}

impl std::ops::Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Self) -> Self::Output {
        Quantity::from_micros(self.micros - rhs.micros)
    }
}

impl std::ops::SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Self) {
        self.micros -= rhs.micros;
    }
}

impl std::iter::Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Quantity::from_f64(value)
            .ok_or_else(|| serde::de::Error::custom(format!("quantity out of range: {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(value: f64) -> Quantity {
        Quantity::from_f64(value).unwrap()
    }

    #[test]
    fn fractions_add_up_exactly() {
        let total = qty(0.1) + qty(0.2);
        assert_eq!(total, qty(0.3));
        assert_eq!(total - qty(0.3), Quantity::ZERO);
        assert_eq!(total.as_f64(), 0.3);
    }

    #[test]
    fn rounds_to_micro_units() {
        assert_eq!(qty(1.5).micros(), 1_500_000);
        assert_eq!(qty(0.0000004).micros(), 0);
        assert_eq!(qty(0.0000005).micros(), 1);
        assert_eq!(Quantity::units(-3).as_f64(), -3.0);
    }

    #[test]
    fn rejects_unrepresentable_values() {
        assert!(Quantity::from_f64(f64::NAN).is_none());
        assert!(Quantity::from_f64(f64::INFINITY).is_none());
        assert!(Quantity::from_f64(1e20).is_none());
        assert!(Quantity::units(i64::MAX / 1_000_000).checked_add(Quantity::units(1)).is_none());
    }

    #[test]
    fn serializes_as_number() {
        let json = serde_json::to_value(qty(2.25)).unwrap();
        assert_eq!(json, serde_json::json!(2.25));
        let back: Quantity = serde_json::from_value(json).unwrap();
        assert_eq!(back, qty(2.25));
    }

    #[test]
    fn sum_of_quantities() {
        let total: Quantity = [0.1, 0.1, 0.1].into_iter().map(qty).sum();
        assert_eq!(total, qty(0.3));
    }
}
