use serde_json::Value;
use std::io;

use super::{flatten, format_scalar, payload, schedule};

/// Write output as CSV to stdout: one row per installment when the output has
/// a schedule, otherwise a two-column field/value listing.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    if let Some(rows) = schedule(value) {
        write_rows(&mut wtr, rows);
    } else if let Value::Object(result) = payload(value) {
        let _ = wtr.write_record(["field", "value"]);
        for (key, val) in flatten(result) {
            let _ = wtr.write_record([key.as_str(), &format_csv_value(&val)]);
        }
    } else {
        let _ = wtr.write_record([&format_csv_value(value)]);
    }

    let _ = wtr.flush();
}

fn write_rows<W: io::Write>(wtr: &mut csv::Writer<W>, rows: &[Value]) {
    let flat: Vec<Vec<(String, Value)>> = rows
        .iter()
        .filter_map(Value::as_object)
        .map(flatten)
        .collect();

    let Some(first) = flat.first() else {
        return;
    };
    let headers: Vec<&str> = first.iter().map(|(k, _)| k.as_str()).collect();
    let _ = wtr.write_record(&headers);

    for row in &flat {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| {
                row.iter()
                    .find(|(k, _)| k == h)
                    .map(|(_, v)| format_csv_value(v))
                    .unwrap_or_default()
            })
            .collect();
        let _ = wtr.write_record(&cells);
    }
}

fn format_csv_value(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
        other => format_scalar(other),
    }
}
