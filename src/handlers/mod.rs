mod task;
mod user;

pub use task::{create_task, delete_task, get_task, list_tasks, replace_task};
pub use user::{create_user, delete_user, get_user, list_users, replace_user};

use serde::Serialize;
use serde_json::Value;

use crate::errors::{AppError, AppResult};

// Serializes a document for the response envelope, mapping serialization
// failure to the operation's 500 message.
pub(crate) fn doc<T: Serialize>(value: &T, op_error: &'static str) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|_| AppError::Internal(op_error.to_string()))
}
