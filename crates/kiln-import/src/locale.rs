//! Multilingual field resolution.

use serde_json::Value;

/// Resolve a possibly multilingual field to one string.
///
/// Plain strings are used as-is. Objects keyed by locale are checked in
/// `locales` order; when none of those locales holds a non-empty string
/// the result is `None`, never an arbitrary other locale.
#[must_use]
pub fn localized(value: &Value, locales: &[String]) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Object(map) => locales
            .iter()
            .filter_map(|locale| map.get(locale).and_then(Value::as_str))
            .find_map(non_empty),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
