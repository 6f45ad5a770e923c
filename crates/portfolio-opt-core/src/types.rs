use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Portfolio weights as fractions of capital (0.05 = 5%). Never as percentages.
pub type Weight = f64;

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata.
///
/// Solver numerics run in f64; only monetary amounts in the result are Decimal.
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "ieee754_f64".to_string(),
        },
    }
}

/// Convert an f64 amount into Money, rounded to cents.
///
/// Non-finite inputs map to zero.
pub fn money_from_f64(value: f64) -> Money {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp(2))
        .unwrap_or(Decimal::ZERO)
}

/// Convert Money into f64 for solver arithmetic.
pub fn money_to_f64(value: Money) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_from_f64_rounds_to_cents() {
        assert_eq!(money_from_f64(1234.5678), dec!(1234.57));
        assert_eq!(money_from_f64(f64::NAN), Decimal::ZERO);
    }

    #[test]
    fn test_money_round_trip() {
        assert!((money_to_f64(dec!(10000)) - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_metadata_precision() {
        let out = with_metadata("m", &serde_json::json!({}), vec![], 5, 1u32);
        assert_eq!(out.metadata.precision, "ieee754_f64");
        assert_eq!(out.metadata.computation_time_us, 5);
    }
}
