pub mod measure;
pub mod meteo;
pub mod param;
pub mod quality;
pub mod station;

pub use measure::MeasureRecord;
pub use meteo::MeteoRecord;
pub use param::ParamRecord;
pub use quality::QualityRecord;
pub use station::StationRecord;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// First non-empty string value among the given keys.
pub(crate) fn str_field(record: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match record.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

/// First numeric value among the given keys; numeric strings are accepted.
pub(crate) fn f64_field(record: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match record.get(key) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(v) = s.parse::<f64>() {
                    return Some(v);
                }
            }
            _ => continue,
        }
    }
    None
}

/// Parse the timestamp formats the upstream APIs emit: RFC 3339, naive
/// `YYYY-MM-DDTHH:MM:SS`, or a bare date. Bare dates become midnight UTC.
pub(crate) fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_ts_accepts_upstream_formats() {
        assert!(parse_ts("2024-10-02T08:30:00Z").is_some());
        assert!(parse_ts("2024-10-02T08:30:00+02:00").is_some());
        assert!(parse_ts("2024-10-02T08:30:00").is_some());
        assert!(parse_ts("2024-10-02").is_some());
        assert!(parse_ts("02/10/2024").is_none());
    }

    #[test]
    fn bare_date_is_midnight_utc() {
        let ts = parse_ts("2024-10-02").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-10-02T00:00:00+00:00");
    }

    #[test]
    fn numeric_strings_coerce() {
        let rec = json!({"x": "652000.5", "y": 12});
        assert_eq!(f64_field(&rec, &["x"]), Some(652000.5));
        assert_eq!(f64_field(&rec, &["y"]), Some(12.0));
        assert_eq!(f64_field(&rec, &["z", "x"]), Some(652000.5));
    }
}
