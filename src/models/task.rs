use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Display name stored on a task while no user is assigned.
pub const UNASSIGNED: &str = "unassigned";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub completed: bool,
    pub assigned_user: String,
    pub assigned_user_name: String,
}

/// Parses a deadline from its accepted wire forms: an epoch-millis number,
/// a numeric string (fractional part truncated), or a date string.
pub fn parse_deadline(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) if looks_like_epoch(s) => {
            let digits = s.split('.').next().unwrap_or(s);
            let millis = digits.parse::<i64>().ok()?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => parse_date_string(s),
        _ => None,
    }
}

// Matches strings of the form 1699999999999 or 1699999999999.5: digits,
// optionally followed by a dot and more digits.
fn looks_like_epoch(s: &str) -> bool {
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    !int_part.is_empty()
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.bytes().all(|b| b.is_ascii_digit())
}

fn parse_date_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Coerces the `completed` field: strings compare case-insensitively to
/// "true", everything else follows truthiness, absent defaults to false.
pub fn coerce_completed(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deadline_numeric_string_matches_number() {
        let from_string = parse_deadline(&json!("1700000000000")).unwrap();
        let from_number = parse_deadline(&json!(1700000000000i64)).unwrap();
        assert_eq!(from_string, from_number);
        assert_eq!(from_string.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_deadline_fractional_string_truncates() {
        let parsed = parse_deadline(&json!("1700000000000.75")).unwrap();
        assert_eq!(parsed.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_deadline_date_strings() {
        let rfc3339 = parse_deadline(&json!("2023-11-14T22:13:20Z")).unwrap();
        assert_eq!(rfc3339.timestamp_millis(), 1_700_000_000_000);

        let naive = parse_deadline(&json!("2023-11-14T22:13:20")).unwrap();
        assert_eq!(naive, rfc3339);

        let date_only = parse_deadline(&json!("2023-11-14")).unwrap();
        assert_eq!(date_only.timestamp_millis(), 1_699_920_000_000);
    }

    #[test]
    fn test_deadline_rejects_garbage() {
        assert!(parse_deadline(&json!("not a date")).is_none());
        assert!(parse_deadline(&json!("12x34")).is_none());
        assert!(parse_deadline(&json!(null)).is_none());
        assert!(parse_deadline(&json!([1700000000000i64])).is_none());
    }

    #[test]
    fn test_completed_coercion() {
        assert!(coerce_completed(Some(&json!(true))));
        assert!(!coerce_completed(Some(&json!(false))));
        assert!(coerce_completed(Some(&json!("true"))));
        assert!(coerce_completed(Some(&json!("TRUE"))));
        assert!(!coerce_completed(Some(&json!("yes"))));
        assert!(!coerce_completed(Some(&json!(""))));
        assert!(coerce_completed(Some(&json!(1))));
        assert!(!coerce_completed(Some(&json!(0))));
        assert!(!coerce_completed(Some(&json!(null))));
        assert!(!coerce_completed(None));
    }

    #[test]
    fn test_task_wire_shape() {
        let task = Task {
            id: "a5b6".into(),
            name: "Write report".into(),
            description: String::new(),
            deadline: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            completed: false,
            assigned_user: String::new(),
            assigned_user_name: UNASSIGNED.into(),
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["_id"], "a5b6");
        assert_eq!(value["assignedUser"], "");
        assert_eq!(value["assignedUserName"], "unassigned");
        assert_eq!(value["deadline"], "2023-11-14T22:13:20Z");
    }
}
