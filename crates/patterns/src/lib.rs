//! mcpredact_patterns
//!
//! Stage 1: deterministic pattern matching + masking for cards, IBANs,
//! SSNs, emails, and phone numbers, plus the recursive walker that applies
//! it over arbitrary `serde_json::Value` trees.
//!
//! The pattern table is a process-wide constant (`PATTERNS`), built once via
//! `once_cell::sync::Lazy`. Patterns run in a fixed order and each sees the
//! previous pattern's output — this is observable and deliberate, not an
//! implementation detail to "fix".

use mcpredact_protocol::RedactionSummary;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

type MaskFn = fn(&str) -> Option<String>;

static PATTERNS: Lazy<Vec<(&'static str, Regex, MaskFn)>> = Lazy::new(|| {
    vec![
        (
            "credit_card",
            Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").unwrap(),
            mask_credit_card as MaskFn,
        ),
        (
            "iban",
            Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{4,30}\b").unwrap(),
            mask_iban as MaskFn,
        ),
        (
            "ssn",
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
            mask_ssn as MaskFn,
        ),
        (
            "email",
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
            mask_email as MaskFn,
        ),
        (
            "phone",
            Regex::new(r"\+\d{1,3}(?:[-.\s]?\d){7,}\b").unwrap(),
            mask_phone as MaskFn,
        ),
    ]
});

fn luhn_valid(digits: &str) -> bool {
    if digits.len() != 16 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = digits
        .chars()
        .rev()
        .enumerate()
        .map(|(i, c)| {
            let d = c.to_digit(10).unwrap();
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn mask_credit_card(m: &str) -> Option<String> {
    let sep = if m.contains('-') {
        "-"
    } else if m.contains(' ') {
        " "
    } else {
        ""
    };
    let digits: String = m.chars().filter(char::is_ascii_digit).collect();
    if !luhn_valid(&digits) {
        return None;
    }
    let last4 = &digits[12..16];
    Some(format!("****{sep}****{sep}****{sep}{last4}"))
}

fn mask_iban(m: &str) -> Option<String> {
    if m.len() < 15 {
        return None;
    }
    let first4 = &m[0..4];
    let last4 = &m[m.len() - 4..];
    Some(format!("{first4}****{last4}"))
}

fn mask_ssn(_m: &str) -> Option<String> {
    Some("***-**-****".to_string())
}

fn mask_email(m: &str) -> Option<String> {
    let at = m.find('@')?;
    let local = &m[..at];
    let domain = &m[at + 1..];
    let first = local.chars().next()?;
    Some(format!("{first}***@{domain}"))
}

fn mask_phone(m: &str) -> Option<String> {
    let digits: String = m.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 8 {
        return None;
    }
    let first2 = &digits[0..2];
    let last2 = &digits[digits.len() - 2..];
    Some(format!("+{first2}***{last2}"))
}

fn apply_pattern(input: &str, tag: &str, re: &Regex, mask: MaskFn, summary: &mut RedactionSummary) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for m in re.find_iter(input) {
        out.push_str(&input[last..m.start()]);
        match mask(m.as_str()) {
            Some(replacement) => {
                out.push_str(&replacement);
                summary.record(tag);
            }
            None => out.push_str(m.as_str()),
        }
        last = m.end();
    }
    out.push_str(&input[last..]);
    out
}

/// Apply every stage-1 pattern, in order, to `input`. Each pattern observes
/// the previous pattern's output.
pub fn redact_string(input: &str) -> (String, RedactionSummary) {
    let mut summary = RedactionSummary::default();
    let mut current = input.to_string();
    for (tag, re, mask) in PATTERNS.iter() {
        current = apply_pattern(&current, tag, re, *mask, &mut summary);
    }
    (current, summary)
}

/// Walk a JSON-shaped value, redacting string leaves. Object keys are never
/// touched; array/object shape is preserved exactly.
pub fn redact_value(value: &Value) -> (Value, RedactionSummary) {
    let mut summary = RedactionSummary::default();
    let out = redact_value_inner(value, &mut summary);
    (out, summary)
}

fn redact_value_inner(value: &Value, summary: &mut RedactionSummary) -> Value {
    match value {
        Value::String(s) => {
            let (masked, local) = redact_string(s);
            summary.merge(local);
            Value::String(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value_inner(v, summary)).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), redact_value_inner(v, summary));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_email_and_ssn_in_text_block() {
        let (masked, summary) = redact_string("Contact john@example.com, SSN 123-45-6789");
        assert_eq!(masked, "Contact j***@example.com, SSN ***-**-****");
        assert_eq!(summary.count, 2);
        assert!(summary.types.contains("email"));
        assert!(summary.types.contains("ssn"));
    }

    #[test]
    fn s2_luhn_invalid_card_is_left_untouched() {
        let (masked, summary) =
            redact_string("Card 1234 5678 9012 3456 and 4111 1111 1111 1111");
        assert_eq!(masked, "Card 1234 5678 9012 3456 and **** **** **** 1111");
        assert_eq!(summary.count, 1);
        assert!(summary.types.contains("credit_card"));
        assert!(!summary.types.contains("ssn"));
    }

    #[test]
    fn credit_card_with_dashes_preserves_separator_style() {
        let (masked, summary) = redact_string("card 4111-1111-1111-1111 on file");
        assert_eq!(masked, "card ****-****-****-1111 on file");
        assert_eq!(summary.count, 1);
    }

    #[test]
    fn iban_masks_when_long_enough() {
        let (masked, summary) = redact_string("IBAN GB29NWBK60161331926819 please");
        assert_eq!(masked, "IBAN GB29****6819 please");
        assert_eq!(summary.count, 1);
        assert!(summary.types.contains("iban"));
    }

    #[test]
    fn short_iban_like_token_is_left_untouched() {
        let (masked, summary) = redact_string("ref AB12CDEF not an iban");
        assert_eq!(masked, "ref AB12CDEF not an iban");
        assert_eq!(summary.count, 0);
    }

    #[test]
    fn phone_number_is_masked_and_short_runs_are_not() {
        let (masked, summary) = redact_string("call +1 415 555 0100 now");
        assert_eq!(masked, "call +14***00 now");
        assert_eq!(summary.count, 1);
        assert!(summary.types.contains("phone"));

        let (masked2, summary2) = redact_string("code +1 23 not a phone");
        assert_eq!(masked2, "code +1 23 not a phone");
        assert_eq!(summary2.count, 0);
    }

    #[test]
    fn pattern_order_regression_phone_shaped_text_inside_email_local_part() {
        // The local part of this address is phone-shaped; since credit_card,
        // iban, ssn, email, phone run in that fixed order and email comes
        // before phone, the whole token is masked as an email and the phone
        // pattern never gets a chance to see it.
        let (masked, summary) = redact_string("contact +14155550100@example.com today");
        assert!(masked.contains("***@example.com"));
        assert_eq!(summary.count, 1);
        assert!(summary.types.contains("email"));
        assert!(!summary.types.contains("phone"));
    }

    #[test]
    fn idempotence_second_pass_finds_nothing_new() {
        let inputs = [
            "Contact john@example.com, SSN 123-45-6789",
            "Card 4111 1111 1111 1111 expires soon",
            "IBAN GB29NWBK60161331926819",
            "call +1 415 555 0100 now",
        ];
        for input in inputs {
            let (masked_once, _) = redact_string(input);
            let (masked_twice, summary_twice) = redact_string(&masked_once);
            assert_eq!(masked_once, masked_twice);
            assert_eq!(summary_twice.count, 0);
        }
    }

    #[test]
    fn redact_value_preserves_shape_and_skips_non_string_leaves() {
        let input = serde_json::json!({
            "b": "john@example.com",
            "a": [1, "123-45-6789", true, null],
            "nested": {"z": "no pii here", "y": 42}
        });
        let (out, summary) = redact_value(&input);
        assert_eq!(summary.count, 2);

        // keys preserved with original insertion order, same shape
        let obj = out.as_object().unwrap();
        let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "a", "nested"]);
        assert_eq!(out["a"].as_array().unwrap().len(), 4);
        assert_eq!(out["a"][0], 1);
        assert_eq!(out["a"][2], true);
        assert_eq!(out["a"][3], Value::Null);
        assert_eq!(out["nested"]["y"], 42);
        assert_eq!(out["nested"]["z"], "no pii here");
    }
}
