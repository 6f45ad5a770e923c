use serde_json::Value;

use super::{branches, format_scalar, result_of};

/// Print just the headline numbers.
///
/// One `branch: score` line per solver branch, one `lambda: return
/// volatility` line per frontier point, otherwise the first field.
pub fn print_minimal(value: &Value) {
    let result = result_of(value);
    let found = branches(result);

    if !found.is_empty() {
        for (label, branch) in found {
            let score = branch
                .get("metrics")
                .and_then(|m| m.get("score"))
                .map(format_scalar)
                .unwrap_or_else(|| "null".to_string());
            println!("{}: {}", label, score);
        }
        return;
    }

    if let Some(Value::Array(points)) = result.get("points") {
        for p in points {
            let get = |k: &str| p.get(k).map(format_scalar).unwrap_or_default();
            println!(
                "{}: {} {}",
                get("risk_aversion"),
                get("expected_return"),
                get("volatility")
            );
        }
        return;
    }

    if let Value::Object(map) = result {
        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_scalar(val));
            return;
        }
    }

    println!("{}", format_scalar(result));
}
