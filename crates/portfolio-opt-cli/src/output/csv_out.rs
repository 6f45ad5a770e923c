use serde_json::Value;
use std::io;

use super::{branches, format_scalar, result_of};

/// Write output as CSV to stdout.
///
/// Solver results become one row per allocation line, tagged with the
/// branch; frontier results one row per point.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());
    let result = result_of(value);
    let found = branches(result);

    if !found.is_empty() {
        let _ = wtr.write_record(["branch", "asset", "lots", "weight_pct", "value"]);
        for (label, branch) in found {
            let Some(Value::Array(lines)) = branch.get("allocation") else {
                continue;
            };
            for line in lines {
                let field = |k: &str| line.get(k).map(format_scalar).unwrap_or_default();
                let _ = wtr.write_record([
                    label.to_string(),
                    field("asset"),
                    field("lots"),
                    field("weight_pct"),
                    field("value"),
                ]);
            }
        }
    } else if let Some(Value::Array(points)) = result.get("points") {
        write_array_csv(&mut wtr, points);
    } else if let Value::Object(map) = result {
        let _ = wtr.write_record(["field", "value"]);
        for (key, val) in map {
            let _ = wtr.write_record([key.as_str(), &format_scalar(val)]);
        }
    } else {
        let _ = wtr.write_record([&format_scalar(result)]);
    }

    let _ = wtr.flush();
}

fn write_array_csv(wtr: &mut csv::Writer<io::StdoutLock<'_>>, arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        return;
    };
    let headers: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
    let _ = wtr.write_record(&headers);

    for item in arr {
        if let Value::Object(map) = item {
            let row: Vec<String> = headers
                .iter()
                .map(|h| map.get(*h).map(format_scalar).unwrap_or_default())
                .collect();
            let _ = wtr.write_record(&row);
        }
    }
}
