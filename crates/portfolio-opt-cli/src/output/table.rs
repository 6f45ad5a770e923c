use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

use super::{branches, format_scalar, result_of};

/// Format output as tables using the tabled crate.
pub fn print_table(value: &Value) {
    let result = result_of(value);
    let found = branches(result);

    if !found.is_empty() {
        print_metrics_table(&found);
        for (label, branch) in &found {
            if let Some(Value::Array(lines)) = branch.get("allocation") {
                println!("\nAllocation ({}):", label);
                print_array_table(lines);
            }
        }
    } else if let Some(Value::Array(points)) = result.get("points") {
        print_frontier_table(points);
    } else if let Value::Object(map) = result {
        print_flat_object(map);
    } else {
        println!("{}", result);
    }

    if let Value::Object(envelope) = value {
        print_footer(envelope);
    }
}

/// One column per branch, one row per metric.
fn print_metrics_table(found: &[(&str, &Value)]) {
    let Some(Value::Object(first)) = found.first().and_then(|(_, b)| b.get("metrics")) else {
        return;
    };
    let mut builder = Builder::default();
    let mut header = vec!["Metric".to_string()];
    header.extend(found.iter().map(|(label, _)| label.to_string()));
    builder.push_record(header);

    for key in first.keys() {
        let mut row = vec![key.clone()];
        for (_, branch) in found {
            row.push(
                branch
                    .get("metrics")
                    .and_then(|m| m.get(key))
                    .map(format_value)
                    .unwrap_or_default(),
            );
        }
        builder.push_record(row);
    }
    let mut condition = vec!["condition".to_string()];
    condition.extend(
        found
            .iter()
            .map(|(_, b)| b.get("condition").map(format_value).unwrap_or_default()),
    );
    builder.push_record(condition);

    println!("{}", Table::from(builder));
}

fn print_frontier_table(points: &[Value]) {
    let mut builder = Builder::default();
    builder.push_record(["risk_aversion", "return", "volatility", "objective", "genetic"]);
    for p in points {
        builder.push_record(
            ["risk_aversion", "expected_return", "volatility", "objective", "genetic_objective"]
                .iter()
                .map(|k| p.get(*k).map(format_value).unwrap_or_default()),
        );
    }
    println!("{}", Table::from(builder));
}

fn print_flat_object(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        builder.push_record([key.as_str(), &format_value(val)]);
    }
    println!("{}", Table::from(builder));
}

fn print_array_table(arr: &[Value]) {
    if arr.is_empty() {
        println!("(empty)");
        return;
    }

    if let Some(Value::Object(first)) = arr.first() {
        let headers: Vec<String> = first.keys().cloned().collect();
        let mut builder = Builder::default();
        builder.push_record(&headers);

        for item in arr {
            if let Value::Object(map) = item {
                let row: Vec<String> = headers
                    .iter()
                    .map(|h| map.get(h.as_str()).map(format_value).unwrap_or_default())
                    .collect();
                builder.push_record(row);
            }
        }
        println!("{}", Table::from(builder));
    } else {
        for item in arr {
            println!("{}", format_value(item));
        }
    }
}

fn print_footer(envelope: &Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                if let Value::String(s) = w {
                    println!("  - {}", s);
                }
            }
        }
    }

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            items.join(", ")
        }
        other => format_scalar(other),
    }
}
