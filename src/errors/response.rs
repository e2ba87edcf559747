use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

use crate::errors::AppError;

// Every endpoint answers with the same envelope: a human-readable status
// message plus either the payload or an error string.
pub fn reply(status: StatusCode, data: Value) -> Response {
    (status, Json(json!({ "message": status_message(status), "data": data }))).into_response()
}

fn status_message(status: StatusCode) -> &'static str {
    match status {
        StatusCode::OK | StatusCode::CREATED => "OK",
        StatusCode::BAD_REQUEST => "Bad Request",
        StatusCode::NOT_FOUND => "Not Found",
        _ => "Internal Server Error",
    }
}

// The IntoResponse trait implementation converts AppError into a well-formed envelope response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, data) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),

            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),

            AppError::DuplicateEmail => (StatusCode::BAD_REQUEST, self.to_string()),

            // Store errors are logged in full but never leaked to the client.
            AppError::Redis(e) => {
                tracing::error!("Store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        reply(status, Value::String(data))
    }
}
