//! Field value coercion between storage and entity representations
//!
//! Backends hand back whatever their engine stores: SQLite has no boolean or
//! date type, JSON columns come back as text, durations are integers. These
//! helpers normalise raw values into the shapes serde expects for each
//! [`FieldKind`], and encode durations for storage.

use super::RecordError;
use crate::schema::FieldKind;
use chrono::{NaiveDateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Epoch values at or above this magnitude are milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn sqlite_datetime_regex() -> Option<&'static Regex> {
    static SQLITE_DATETIME: OnceLock<Option<Regex>> = OnceLock::new();
    SQLITE_DATETIME
        .get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(\.\d+)?$").ok())
        .as_ref()
}

fn duration_part_regex() -> Option<&'static Regex> {
    static DURATION_PART: OnceLock<Option<Regex>> = OnceLock::new();
    DURATION_PART
        .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h|d)").ok())
        .as_ref()
}

/// Encode an entity value for storage
pub(crate) fn encode_value(field: &str, kind: FieldKind, value: Value) -> Result<Value, RecordError> {
    match (kind, value) {
        (FieldKind::Duration, Value::Object(parts)) => {
            let secs = parts.get("secs").and_then(Value::as_u64);
            let nanos = parts.get("nanos").and_then(Value::as_u64);
            match (secs, nanos) {
                (Some(secs), Some(nanos)) => {
                    let total = secs as u128 * NANOS_PER_SEC + nanos as u128;
                    i64::try_from(total).map(Value::from).map_err(|_| {
                        RecordError::coercion(field, "duration", "exceeds i64 nanoseconds")
                    })
                }
                _ => Err(RecordError::coercion(
                    field,
                    "duration",
                    "expected {secs, nanos}",
                )),
            }
        }
        (_, value) => Ok(value),
    }
}

/// Decode a stored value into the shape serde expects for `kind`
pub(crate) fn decode_value(field: &str, kind: FieldKind, value: &Value) -> Result<Value, RecordError> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match kind {
        FieldKind::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "t" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "f" | "no" => Ok(Value::Bool(false)),
                _ => Err(RecordError::coercion(field, "bool", format!("'{s}'"))),
            },
            other => Err(RecordError::coercion(field, "bool", other.to_string())),
        },
        FieldKind::Int => match value {
            Value::Number(n) if n.is_f64() => {
                let f = n.as_f64().unwrap_or(0.0);
                if f.fract() == 0.0 {
                    Ok(json!(f as i64))
                } else {
                    Ok(value.clone())
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| RecordError::coercion(field, "int", e.to_string())),
            Value::Bool(b) => Ok(json!(*b as i64)),
            _ => Ok(value.clone()),
        },
        FieldKind::Float => match value {
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|e| RecordError::coercion(field, "float", e.to_string())),
            _ => Ok(value.clone()),
        },
        FieldKind::String => match value {
            Value::Number(_) | Value::Bool(_) => Ok(Value::String(value.to_string())),
            _ => Ok(value.clone()),
        },
        FieldKind::Date => decode_date(field, value),
        FieldKind::Duration => decode_duration(field, value),
        FieldKind::Json => match value {
            Value::String(s) => Ok(serde_json::from_str(s).unwrap_or_else(|_| value.clone())),
            _ => Ok(value.clone()),
        },
    }
}

fn decode_date(field: &str, value: &Value) -> Result<Value, RecordError> {
    match value {
        Value::Number(n) => {
            let epoch = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| RecordError::coercion(field, "date", n.to_string()))?;
            let datetime = if epoch.abs() >= MILLIS_THRESHOLD {
                Utc.timestamp_millis_opt(epoch).single()
            } else {
                Utc.timestamp_opt(epoch, 0).single()
            };
            datetime
                .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                .ok_or_else(|| RecordError::coercion(field, "date", "epoch out of range"))
        }
        Value::String(s) if sqlite_datetime_regex().is_some_and(|re| re.is_match(s)) => {
            let normalized = s.replacen('T', " ", 1);
            NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f")
                .map(|naive| {
                    Value::String(
                        Utc.from_utc_datetime(&naive)
                            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    )
                })
                .map_err(|e| RecordError::coercion(field, "date", e.to_string()))
        }
        _ => Ok(value.clone()),
    }
}

fn decode_duration(field: &str, value: &Value) -> Result<Value, RecordError> {
    let nanos = match value {
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u128))
            .ok_or_else(|| RecordError::coercion(field, "duration", n.to_string()))?,
        Value::String(s) => match s.trim().parse::<u64>() {
            Ok(n) => u128::from(n),
            Err(_) => parse_human_duration(s)
                .ok_or_else(|| RecordError::coercion(field, "duration", format!("'{s}'")))?,
        },
        _ => return Ok(value.clone()),
    };

    Ok(json!({
        "secs": (nanos / NANOS_PER_SEC) as u64,
        "nanos": (nanos % NANOS_PER_SEC) as u32,
    }))
}

/// Parse `1h30m`, `250ms`, `1.5h`, `2d` into nanoseconds
pub(crate) fn parse_human_duration(input: &str) -> Option<u128> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let mut total = 0f64;
    let mut consumed = 0;
    for caps in duration_part_regex()?.captures_iter(input) {
        let whole = caps.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();

        let amount: f64 = caps[1].parse().ok()?;
        let unit_nanos = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            "d" => 86_400e9,
            _ => return None,
        };
        total += amount * unit_nanos;
    }

    if consumed != input.len() {
        return None;
    }
    Some(total.round() as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_durations() {
        assert_eq!(parse_human_duration("250ms"), Some(250_000_000));
        assert_eq!(parse_human_duration("1h30m"), Some(5_400_000_000_000));
        assert_eq!(parse_human_duration("1.5h"), Some(5_400_000_000_000));
        assert_eq!(parse_human_duration("2s"), Some(2_000_000_000));
        assert_eq!(parse_human_duration("10us"), Some(10_000));
        assert_eq!(parse_human_duration("1d"), Some(86_400_000_000_000));
        assert_eq!(parse_human_duration(""), None);
        assert_eq!(parse_human_duration("5 minutes"), None);
        assert_eq!(parse_human_duration("1h and 2m"), None);
    }

    #[test]
    fn test_duration_round_trip() {
        let encoded = encode_value(
            "timeout",
            FieldKind::Duration,
            json!({"secs": 2, "nanos": 500}),
        )
        .unwrap();
        assert_eq!(encoded, json!(2_000_000_500i64));

        let decoded = decode_value("timeout", FieldKind::Duration, &encoded).unwrap();
        assert_eq!(decoded, json!({"secs": 2, "nanos": 500}));

        let human = decode_value("timeout", FieldKind::Duration, &json!("1m30s")).unwrap();
        assert_eq!(human, json!({"secs": 90, "nanos": 0}));
    }

    #[test]
    fn test_bool_from_integers() {
        assert_eq!(decode_value("f", FieldKind::Bool, &json!(1)).unwrap(), json!(true));
        assert_eq!(decode_value("f", FieldKind::Bool, &json!(0)).unwrap(), json!(false));
        assert_eq!(decode_value("f", FieldKind::Bool, &json!("true")).unwrap(), json!(true));
        assert!(decode_value("f", FieldKind::Bool, &json!("maybe")).is_err());
    }

    #[test]
    fn test_dates() {
        assert_eq!(
            decode_value("at", FieldKind::Date, &json!(1_700_000_000)).unwrap(),
            json!("2023-11-14T22:13:20Z")
        );
        assert_eq!(
            decode_value("at", FieldKind::Date, &json!(1_700_000_000_123i64)).unwrap(),
            json!("2023-11-14T22:13:20.123Z")
        );
        assert_eq!(
            decode_value("at", FieldKind::Date, &json!("2024-03-01 12:30:00")).unwrap(),
            json!("2024-03-01T12:30:00Z")
        );
        let rfc = json!("2024-03-01T12:30:00+02:00");
        assert_eq!(decode_value("at", FieldKind::Date, &rfc).unwrap(), rfc);
    }

    #[test]
    fn test_json_text_is_parsed() {
        assert_eq!(
            decode_value("tags", FieldKind::Json, &json!("[\"a\",\"b\"]")).unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            decode_value("tags", FieldKind::Json, &json!({"k": 1})).unwrap(),
            json!({"k": 1})
        );
    }

    #[test]
    fn test_numbers_normalised() {
        assert_eq!(decode_value("n", FieldKind::Int, &json!(3.0)).unwrap(), json!(3));
        assert_eq!(decode_value("n", FieldKind::Int, &json!("42")).unwrap(), json!(42));
        assert_eq!(decode_value("x", FieldKind::Float, &json!("2.5")).unwrap(), json!(2.5));
        assert_eq!(decode_value("s", FieldKind::String, &json!(7)).unwrap(), json!("7"));
    }
}
