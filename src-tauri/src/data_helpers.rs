//! Small normalization helpers shared by the record modules.

use serde_json::Value;

/// Amounts are shillings with cents; anything closer than half a cent is
/// the same amount.
const AMOUNT_EPSILON: f64 = 0.005;

/// Canonical form of an M-Pesa / bank transaction code.
pub(crate) fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        None
    } else {
        Some(code)
    }
}

/// Lowercased payment method; empty means cash, the way attendants leave it.
pub(crate) fn normalize_method(raw: Option<&str>) -> String {
    raw.map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .map(|m| match m.as_str() {
            "m-pesa" | "m pesa" | "mobile money" => "mpesa".to_string(),
            _ => m,
        })
        .unwrap_or_else(|| "cash".to_string())
}

pub(crate) fn amounts_match(a: f64, b: f64) -> bool {
    (a - b).abs() < AMOUNT_EPSILON
}

/// Round to cents for report output. Empty float sums are `-0.0`; adding
/// `0.0` keeps them from serializing with a sign.
pub(crate) fn round_money(v: f64) -> f64 {
    (v * 100.0).round() / 100.0 + 0.0
}

/// Parse a money cell: `"1,500.00"`, `"KES 1500"`, `"Ksh1,500"` or a bare
/// number. Unparsable input is `None`.
pub(crate) fn parse_amount(raw: &str) -> Option<f64> {
    let mut s = raw.trim();
    for prefix in ["KES", "Kes", "kes", "KSH", "Ksh", "ksh", "Ksh.", "KSh"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start_matches('.').trim();
            break;
        }
    }
    let cleaned: String = s.chars().filter(|c| *c != ',' && *c != ' ').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// First non-empty string under any of `keys`, trimmed.
pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// First number under any of `keys`; numeric strings are accepted because
/// form inputs arrive as text.
pub(crate) fn value_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(f) = n.as_f64() {
                    return Some(f);
                }
            }
            Some(Value::String(s)) => {
                if let Some(f) = parse_amount(s) {
                    return Some(f);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_trimmed_and_uppercased() {
        assert_eq!(normalize_code("  qgh7xyz12 ").as_deref(), Some("QGH7XYZ12"));
        assert_eq!(normalize_code("   "), None);
    }

    #[test]
    fn methods_default_to_cash_and_fold_mpesa_spellings() {
        assert_eq!(normalize_method(None), "cash");
        assert_eq!(normalize_method(Some(" ")), "cash");
        assert_eq!(normalize_method(Some("M-Pesa")), "mpesa");
        assert_eq!(normalize_method(Some("BANK")), "bank");
    }

    #[test]
    fn round_money_drops_negative_zero() {
        let empty: f64 = Vec::<f64>::new().into_iter().sum();
        let rounded = round_money(empty);
        assert_eq!(rounded, 0.0);
        assert!(rounded.is_sign_positive());
        assert_eq!(serde_json::json!(round_money(-0.0)).to_string(), "0.0");
        assert_eq!(round_money(12.346), 12.35);
    }

    #[test]
    fn amounts_parse_from_statement_cells() {
        assert_eq!(parse_amount("1,500.00"), Some(1500.0));
        assert_eq!(parse_amount("KES 2,000"), Some(2000.0));
        assert_eq!(parse_amount("Ksh1,250.50"), Some(1250.5));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn value_f64_accepts_numeric_strings() {
        let v = serde_json::json!({ "amount": "1,200", "other": 5 });
        assert_eq!(value_f64(&v, &["amount"]), Some(1200.0));
        assert_eq!(value_f64(&v, &["missing", "other"]), Some(5.0));
        assert_eq!(value_str(&v, &["amount"]).as_deref(), Some("1,200"));
    }

    #[test]
    fn amounts_match_within_half_a_cent() {
        assert!(amounts_match(100.0, 100.004));
        assert!(!amounts_match(100.0, 100.01));
    }
}
