use serde_json::Value;

use super::{format_scalar, payload};

/// Key answer per command, most specific first.
const PRIORITY_POINTERS: [&str; 3] = [
    "/allocation/totals/total_entregue",
    "/total_net_value",
    "/total_face",
];

/// Print just the key answer value from the output: cash delivered for an
/// allocation, net schedule value for an expansion.
pub fn print_minimal(value: &Value) {
    println!("{}", minimal_answer(value));
}

fn minimal_answer(value: &Value) -> String {
    let result = payload(value);

    for pointer in PRIORITY_POINTERS {
        if let Some(val) = result.pointer(pointer) {
            if !val.is_null() {
                return format_scalar(val);
            }
        }
    }

    if let Some((key, val)) = result.as_object().and_then(|m| m.iter().next()) {
        return format!("{}: {}", key, format_scalar(val));
    }

    format_scalar(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_allocation_answer() {
        let v = json!({"result": {"allocation": {"totals": {"total_entregue": "9421.18"}}}});
        assert_eq!(minimal_answer(&v), "9421.18");
    }

    #[test]
    fn test_expansion_answer() {
        let v = json!({"result": {"total_face": "10000", "total_net_value": "9000"}});
        assert_eq!(minimal_answer(&v), "9000");
    }

    #[test]
    fn test_fallback_first_field() {
        let v = json!({"result": {"installment_count": 3}});
        assert_eq!(minimal_answer(&v), "installment_count: 3");
    }
}
