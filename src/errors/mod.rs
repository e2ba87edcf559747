// Defines a custom error type and a result type alias for the API using the thiserror crate.
use thiserror::Error;

// Make the response module public
pub mod response;

#[derive(Error, Debug)]
pub enum AppError {
    // Malformed input: unparseable query parameters, missing required
    // fields, bad id shapes. The message names the offending field.
    #[error("{0}")]
    BadRequest(String),

    // Unknown primary resource, including ids the store cannot resolve.
    #[error("{0}")]
    NotFound(String),

    // Email uniqueness violation, distinguished from generic validation.
    #[error("Email already exists")]
    DuplicateEmail,

    // The #[from] attribute automatically converts a redis::RedisError into an AppError::Redis using the From trait.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // Unexpected failure carrying the per-operation message shown to the client.
    #[error("{0}")]
    Internal(String),
}

// Custom result type
pub type AppResult<T> = Result<T, AppError>;
