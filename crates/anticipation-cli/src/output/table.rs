use colored::Colorize;
use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

use super::{flatten, format_scalar, payload};

/// Format output as tables: scalar fields first, then one table per nested
/// section, then the row lists (installments, entries).
pub fn print_table(value: &Value) {
    match payload(value) {
        Value::Object(result) => print_section(None, result),
        other => println!("{}", format_scalar(other)),
    }

    if let Some(Value::Array(warnings)) = value.get("warnings") {
        if !warnings.is_empty() {
            println!("\n{}", "Warnings:".yellow().bold());
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {}", w);
            }
        }
    }

    if let Some(Value::String(meth)) = value.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_section(title: Option<&str>, map: &Map<String, Value>) {
    let mut fields = Builder::default();
    fields.push_record(["Field", "Value"]);
    let mut field_count = 0;
    let mut sections: Vec<(&String, &Map<String, Value>)> = Vec::new();
    let mut lists: Vec<(&String, &Vec<Value>)> = Vec::new();

    for (key, val) in map {
        match val {
            Value::Object(inner) if !is_inline(inner) => sections.push((key, inner)),
            Value::Array(rows) if rows.iter().any(Value::is_object) => lists.push((key, rows)),
            _ => {
                fields.push_record([key.as_str(), &format_value(val)]);
                field_count += 1;
            }
        }
    }

    if let Some(t) = title {
        println!("\n{}", t.bold());
    }
    if field_count > 0 {
        println!("{}", Table::from(fields));
    }
    for (key, inner) in sections {
        print_section(Some(key), inner);
    }
    for (key, rows) in lists {
        println!("\n{}", key.bold());
        print_rows(rows);
    }
}

/// Small all-scalar objects (`ratio`, `debtor`) render on one line.
fn is_inline(map: &Map<String, Value>) -> bool {
    map.len() <= 2 && map.values().all(|v| !v.is_object() && !v.is_array())
}

fn print_rows(rows: &[Value]) {
    let flat: Vec<Vec<(String, Value)>> = rows
        .iter()
        .filter_map(Value::as_object)
        .map(flatten)
        .collect();

    let Some(first) = flat.first() else {
        println!("(empty)");
        return;
    };

    let headers: Vec<String> = first.iter().map(|(k, _)| k.clone()).collect();
    let mut builder = Builder::default();
    builder.push_record(headers.clone());

    for row in &flat {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| {
                row.iter()
                    .find(|(k, _)| k == h)
                    .map(|(_, v)| format_value(v))
                    .unwrap_or_default()
            })
            .collect();
        builder.push_record(cells);
    }

    println!("{}", Table::from(builder));
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::Array(arr) => arr.iter().map(format_value).collect::<Vec<_>>().join(", "),
        Value::Object(map) => map.values().map(format_value).collect::<Vec<_>>().join(" "),
        other => format_scalar(other),
    }
}
