use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

// Incoming bodies keep loosely-typed fields (`deadline`, `completed`) as raw
// JSON values so the coercion rules in models::task can apply to them.
#[derive(Debug, Deserialize)]
pub struct TaskBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<Value>,
    pub completed: Option<Value>,
    #[serde(rename = "assignedUser")]
    pub assigned_user: Option<String>,
    #[serde(rename = "assignedUserName")]
    pub assigned_user_name: Option<String>,
}

impl TaskBody {
    // Both create and replace require a non-empty name and a deadline.
    pub fn has_required_fields(&self) -> bool {
        let name_present = self.name.as_deref().map_or(false, |n| !n.is_empty());
        let deadline_present = match &self.deadline {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        };
        name_present && deadline_present
    }
}

#[derive(Debug, Deserialize)]
pub struct UserBody {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "pendingTasks")]
    pub pending_tasks: Option<Value>,
}

impl UserBody {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.as_deref().map_or(true, str::is_empty) {
            missing.push("name");
        }
        if self.email.as_deref().map_or(true, str::is_empty) {
            missing.push("email");
        }
        missing
    }
}

pub fn from_body<T: DeserializeOwned>(body: Value) -> AppResult<T> {
    serde_json::from_value(body).map_err(|_| AppError::BadRequest("Invalid request body".into()))
}

/// Checks that a `pendingTasks` value is an array of id-shaped strings,
/// returning the ids or a message naming the first offender.
pub fn validate_pending_ids(value: &Value) -> Result<Vec<String>, String> {
    let items = match value.as_array() {
        Some(items) => items,
        None => return Err("pendingTasks must be an array".to_string()),
    };

    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str() {
            Some(s) if Uuid::parse_str(s).is_ok() => ids.push(s.to_string()),
            Some(s) => return Err(format!("Invalid task id in pendingTasks: {}", s)),
            None => return Err(format!("Invalid task id in pendingTasks: {}", item)),
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_body_required_fields() {
        let full: TaskBody =
            from_body(json!({"name": "A", "deadline": "1700000000000"})).unwrap();
        assert!(full.has_required_fields());

        let numeric_deadline: TaskBody =
            from_body(json!({"name": "A", "deadline": 1700000000000i64})).unwrap();
        assert!(numeric_deadline.has_required_fields());

        let no_deadline: TaskBody = from_body(json!({"name": "A"})).unwrap();
        assert!(!no_deadline.has_required_fields());

        let empty_name: TaskBody =
            from_body(json!({"name": "", "deadline": "2023-11-14"})).unwrap();
        assert!(!empty_name.has_required_fields());
    }

    #[test]
    fn test_user_body_missing_fields_join() {
        let empty: UserBody = from_body(json!({})).unwrap();
        assert_eq!(empty.missing_fields().join(" and "), "name and email");

        let no_email: UserBody = from_body(json!({"name": "Ada"})).unwrap();
        assert_eq!(no_email.missing_fields(), vec!["email"]);

        let complete: UserBody =
            from_body(json!({"name": "Ada", "email": "ada@example.com"})).unwrap();
        assert!(complete.missing_fields().is_empty());
    }

    #[test]
    fn test_validate_pending_ids() {
        let id = Uuid::new_v4().to_string();
        let ids = validate_pending_ids(&json!([id])).unwrap();
        assert_eq!(ids, vec![id]);

        assert_eq!(
            validate_pending_ids(&json!("not-an-array")).unwrap_err(),
            "pendingTasks must be an array"
        );
        assert_eq!(
            validate_pending_ids(&json!(["not-a-uuid"])).unwrap_err(),
            "Invalid task id in pendingTasks: not-a-uuid"
        );
        assert_eq!(
            validate_pending_ids(&json!([42])).unwrap_err(),
            "Invalid task id in pendingTasks: 42"
        );
    }

    #[test]
    fn test_from_body_rejects_wrong_shapes() {
        assert!(from_body::<TaskBody>(json!("just a string")).is_err());
        assert!(from_body::<UserBody>(json!({"name": 17})).is_err());
    }
}
