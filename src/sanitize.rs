use serde_json::Value;

/// Masks a card number down to its last four digits. Anything shorter
/// than a plausible PAN is masked entirely.
pub fn mask_pan(pan: &str) -> String {
    let digits: String = pan.chars().filter(|ch| ch.is_ascii_digit()).collect();
    if digits.len() < 12 {
        return "****".to_string();
    }
    let last4 = &digits[digits.len() - 4..];
    format!("{}{}", "*".repeat(digits.len() - 4), last4)
}

/// Sanitizes sensitive fields in JSON payloads before they reach logs.
/// Card numbers keep their last four digits; everything else sensitive
/// is masked outright.
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_pan_field(key) {
                    match val {
                        Value::String(s) => Value::String(mask_pan(s)),
                        _ => Value::String("****".to_string()),
                    }
                } else if is_sensitive_field(key) {
                    Value::String("****".to_string())
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

fn is_pan_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "card_number" | "cardnumber" | "pan" | "number"
    )
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "cvv" | "cvc" | "expiry" | "password" | "secret" | "token" | "api_key" | "authorization"
    )
}
