//! Retry-hint extraction from upstream error bodies.
//!
//! Rate-limit responses sometimes say how long to wait, in one of several
//! shapes: structured fields buried in the error details (`retryDelay`,
//! `quotaResetDelay`, `retry_after`), or prose ("Please try again in 1m
//! 30s"). The structured fields are checked first, in that order; the prose
//! patterns are a fallback.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Structured keys checked in priority order.
const STRUCTURED_KEYS: &[&str] = &["retryDelay", "quotaResetDelay", "retry_after"];

/// Extract a retry delay in milliseconds from an error body, if the
/// upstream provided one.
#[must_use]
pub fn parse_retry_hint(body: &str) -> Option<u64> {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for key in STRUCTURED_KEYS {
            let mut found = None;
            find_key(&json, key, &mut found);
            if let Some(value) = found
                && let Some(ms) = duration_ms(value)
            {
                return Some(ms);
            }
        }
    }
    parse_prose_hint(body)
}

/// Depth-first search for the first occurrence of `key`.
fn find_key<'a>(value: &'a Value, key: &str, found: &mut Option<&'a Value>) {
    if found.is_some() {
        return;
    }
    match value {
        Value::Object(map) => {
            if let Some(hit) = map.get(key) {
                *found = Some(hit);
                return;
            }
            for child in map.values() {
                find_key(child, key, found);
            }
        }
        Value::Array(entries) => {
            for child in entries {
                find_key(child, key, found);
            }
        }
        _ => {}
    }
}

/// Interpret a structured delay value: `"30s"` / `"1.5s"` duration strings,
/// bare numbers (seconds), or `{"seconds": n}` objects.
fn duration_ms(value: &Value) -> Option<u64> {
    match value {
        Value::String(text) => {
            let seconds: f64 = text.trim().strip_suffix('s')?.trim().parse().ok()?;
            to_ms(seconds)
        }
        Value::Number(n) => to_ms(n.as_f64()?),
        Value::Object(map) => {
            let seconds = map.get("seconds")?.as_f64()?;
            to_ms(seconds)
        }
        _ => None,
    }
}

fn to_ms(seconds: f64) -> Option<u64> {
    (seconds > 0.0).then(|| (seconds * 1000.0) as u64)
}

fn prose_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // "try again in 1m 30s"
            Regex::new(r"(?i)try again in (\d+)m\s*(\d+(?:\.\d+)?)s").expect("valid regex"),
            // "try again in 45s" / "try again in 45 seconds"
            Regex::new(r"(?i)try again in (\d+(?:\.\d+)?)\s*s(?:econds)?").expect("valid regex"),
            // "wait 30s" / "wait 30 seconds"
            Regex::new(r"(?i)wait (\d+(?:\.\d+)?)\s*s(?:econds)?").expect("valid regex"),
            // "retry after 2 minutes"
            Regex::new(r"(?i)retry after (\d+)\s*minutes?").expect("valid regex"),
        ]
    })
}

fn parse_prose_hint(body: &str) -> Option<u64> {
    let [minute_second, seconds_a, seconds_b, minutes] = prose_patterns();

    if let Some(captures) = minute_second.captures(body) {
        let minutes: f64 = captures[1].parse().ok()?;
        let seconds: f64 = captures[2].parse().ok()?;
        return to_ms(minutes * 60.0 + seconds);
    }
    for pattern in [seconds_a, seconds_b] {
        if let Some(captures) = pattern.captures(body) {
            let seconds: f64 = captures[1].parse().ok()?;
            return to_ms(seconds);
        }
    }
    if let Some(captures) = minutes.captures(body) {
        let minutes: f64 = captures[1].parse().ok()?;
        return to_ms(minutes * 60.0);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_retry_delay_string() {
        let body = json!({
            "error": {
                "code": 429,
                "details": [{"retryDelay": "3s"}]
            }
        })
        .to_string();
        assert_eq!(parse_retry_hint(&body), Some(3000));
    }

    #[test]
    fn structured_retry_delay_fractional() {
        let body = json!({"error": {"retryDelay": "2.5s"}}).to_string();
        assert_eq!(parse_retry_hint(&body), Some(2500));
    }

    #[test]
    fn quota_reset_delay_object_form() {
        let body = json!({"error": {"quotaResetDelay": {"seconds": 90}}}).to_string();
        assert_eq!(parse_retry_hint(&body), Some(90_000));
    }

    #[test]
    fn retry_after_number_is_seconds() {
        let body = json!({"retry_after": 7}).to_string();
        assert_eq!(parse_retry_hint(&body), Some(7000));
    }

    #[test]
    fn retry_delay_outranks_retry_after() {
        let body = json!({
            "error": {"retryDelay": "3s"},
            "retry_after": 60
        })
        .to_string();
        assert_eq!(parse_retry_hint(&body), Some(3000));
    }

    #[test]
    fn prose_minutes_and_seconds() {
        assert_eq!(
            parse_retry_hint("Rate limited. Please try again in 1m 30s."),
            Some(90_000)
        );
    }

    #[test]
    fn prose_seconds_only() {
        assert_eq!(parse_retry_hint("try again in 45s"), Some(45_000));
        assert_eq!(parse_retry_hint("please wait 30 seconds"), Some(30_000));
    }

    #[test]
    fn prose_minutes() {
        assert_eq!(parse_retry_hint("retry after 2 minutes"), Some(120_000));
    }

    #[test]
    fn no_hint_returns_none() {
        assert_eq!(parse_retry_hint("RESOURCE_EXHAUSTED"), None);
        assert_eq!(parse_retry_hint("{\"error\":{\"code\":429}}"), None);
        assert_eq!(parse_retry_hint(""), None);
    }

    #[test]
    fn zero_and_negative_delays_are_ignored() {
        assert_eq!(parse_retry_hint("{\"retry_after\": 0}"), None);
        assert_eq!(parse_retry_hint("{\"error\":{\"retryDelay\":\"0s\"}}"), None);
    }
}
