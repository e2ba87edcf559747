use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{response::reply, AppError, AppResult};
use crate::handlers::doc;
use crate::models::{self, User, UserBody};
use crate::query::{ListParams, QueryOptions};
use crate::services::{consistency, StoreService};

pub async fn create_user(
    State((store, _config)): State<(StoreService, Config)>,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let body: UserBody = models::from_body(body)?;

    let missing = body.missing_fields();
    if !missing.is_empty() {
        return Err(AppError::BadRequest(format!("{} is required", missing.join(" and "))));
    }

    let pending_tasks = match &body.pending_tasks {
        Some(value) => consistency::dedup_preserving_order(
            models::validate_pending_ids(value).map_err(AppError::BadRequest)?,
        ),
        None => Vec::new(),
    };

    let user = User {
        id: Uuid::new_v4().to_string(),
        name: body.name.unwrap_or_default(),
        email: body.email.unwrap_or_default(),
        pending_tasks,
    };

    // SETNX on the email index is the uniqueness check.
    let claimed = store.claim_email(&user.email, &user.id).await.map_err(|e| {
        tracing::error!("Failed to claim email {}: {}", user.email, e);
        AppError::Internal("Error creating user".into())
    })?;
    if !claimed {
        return Err(AppError::DuplicateEmail);
    }

    store.insert_user(&user).await.map_err(|e| {
        tracing::error!("Failed to persist user {}: {}", user.id, e);
        AppError::Internal("Error creating user".into())
    })?;

    tracing::debug!("Created user {}", user.id);
    Ok(reply(StatusCode::CREATED, doc(&user, "Error creating user")?))
}

pub async fn list_users(
    State((store, _config)): State<(StoreService, Config)>,
    Query(params): Query<ListParams>,
) -> AppResult<Response> {
    // Unlike tasks, user listings have no implicit limit.
    let options = QueryOptions::parse(&params, None)?;
    let op_error = if options.count { "Error counting users" } else { "Error retrieving users" };

    let users = store.list_users().await.map_err(|e| {
        tracing::error!("Failed to list users: {}", e);
        AppError::Internal(op_error.into())
    })?;

    let docs: Vec<Value> =
        users.iter().map(|user| doc(user, "Error retrieving users")).collect::<AppResult<_>>()?;

    if options.count {
        let count = options.count_matches(&docs);
        tracing::debug!("Counted {} matching users", count);
        return Ok(reply(StatusCode::OK, Value::from(count)));
    }

    Ok(reply(StatusCode::OK, Value::Array(options.run(docs))))
}

pub async fn get_user(
    State((store, _config)): State<(StoreService, Config)>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> AppResult<Response> {
    let options = QueryOptions::parse(&params, None)?;

    let user = store
        .get_user(&id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch user {}: {}", id, e);
            AppError::NotFound("User not found".into())
        })?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let document = doc(&user, "Error retrieving users")?;
    Ok(reply(StatusCode::OK, options.project(&document)))
}

#[axum::debug_handler]
pub async fn replace_user(
    State((store, _config)): State<(StoreService, Config)>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let body: UserBody = models::from_body(body)?;
    if !body.missing_fields().is_empty() {
        return Err(AppError::BadRequest("Name and email are required".into()));
    }

    // Id-shape validation happens before any store mutation.
    let pending_tasks = match &body.pending_tasks {
        Some(value) => models::validate_pending_ids(value).map_err(AppError::BadRequest)?,
        None => Vec::new(),
    };

    let update = consistency::UserUpdate {
        name: body.name.unwrap_or_default(),
        email: body.email.unwrap_or_default(),
        pending_tasks,
    };

    let user = consistency::commit_user_update(&store, &id, update).await.map_err(|e| match e {
        AppError::Redis(err) => {
            tracing::error!("User update transaction for {} failed: {}", id, err);
            AppError::Internal("Error updating user".into())
        }
        other => other,
    })?;

    tracing::debug!("Updated user {}", user.id);
    Ok(reply(StatusCode::OK, doc(&user, "Error updating user")?))
}

pub async fn delete_user(
    State((store, _config)): State<(StoreService, Config)>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let user = store
        .get_user(&id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch user {}: {}", id, e);
            AppError::Internal("Error deleting user".into())
        })?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    // Every pending task loses its assignment before the user disappears.
    consistency::unassign_pending(&store, &user).await.map_err(|e| {
        tracing::error!("Failed to unassign pending tasks of {}: {}", user.id, e);
        AppError::Internal("Error deleting user".into())
    })?;

    store.delete_user(&user).await.map_err(|e| {
        tracing::error!("Failed to delete user {}: {}", user.id, e);
        AppError::Internal("Error deleting user".into())
    })?;

    tracing::debug!("Deleted user {}", user.id);
    Ok(StatusCode::NO_CONTENT.into_response())
}
