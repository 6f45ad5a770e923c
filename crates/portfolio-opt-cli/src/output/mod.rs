pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::Value;

/// Keys of a comparison result that hold one solver branch each.
pub const BRANCH_KEYS: [&str; 3] = ["genetic", "exact_warm", "exact_cold"];

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// The `result` of an envelope, or the value itself.
pub fn result_of(value: &Value) -> &Value {
    value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value)
}

/// Branch reports contained in a result: the three comparison branches, or
/// the result itself when it is a single branch.
pub fn branches(result: &Value) -> Vec<(&str, &Value)> {
    if result.get("allocation").is_some() {
        let label = result
            .get("solver")
            .and_then(Value::as_str)
            .unwrap_or("solution");
        return vec![(label, result)];
    }
    BRANCH_KEYS
        .iter()
        .filter_map(|k| result.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
        .collect()
}

pub fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
