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
use crate::models::{self, Task, TaskBody, UNASSIGNED};
use crate::query::{ListParams, QueryOptions, DEFAULT_TASK_LIMIT};
use crate::services::{consistency, StoreService};

#[axum::debug_handler]
pub async fn create_task(
    State((store, _config)): State<(StoreService, Config)>,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let body: TaskBody = models::from_body(body)?;
    if !body.has_required_fields() {
        return Err(AppError::BadRequest("Name and deadline are required".into()));
    }

    let deadline = body
        .deadline
        .as_ref()
        .and_then(models::parse_deadline)
        .ok_or_else(|| AppError::BadRequest("Invalid deadline".into()))?;

    let mut task = Task {
        id: Uuid::new_v4().to_string(),
        name: body.name.unwrap_or_default(),
        description: body.description.unwrap_or_default(),
        deadline,
        completed: models::coerce_completed(body.completed.as_ref()),
        assigned_user: body.assigned_user.unwrap_or_default(),
        assigned_user_name: body
            .assigned_user_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNASSIGNED.to_string()),
    };

    tracing::debug!("Creating task {}", task.id);

    store.insert_task(&task).await.map_err(|e| {
        tracing::error!("Failed to persist task {}: {}", task.id, e);
        AppError::Internal("Error creating task".into())
    })?;

    // A live assignment pulls the assignee's name onto the task and the
    // task id onto the assignee's pending list. Unknown users are a no-op.
    if !task.assigned_user.is_empty() && !task.completed {
        consistency::attach_task(&store, &mut task).await.map_err(|e| {
            tracing::error!("Failed to attach task {} to its assignee: {}", task.id, e);
            AppError::Internal("Error creating task".into())
        })?;
    }

    Ok(reply(StatusCode::CREATED, doc(&task, "Error creating task")?))
}

pub async fn list_tasks(
    State((store, _config)): State<(StoreService, Config)>,
    Query(params): Query<ListParams>,
) -> AppResult<Response> {
    let options = QueryOptions::parse(&params, Some(DEFAULT_TASK_LIMIT))?;
    let op_error = if options.count { "Error counting tasks" } else { "Error retrieving tasks" };

    let tasks = store.list_tasks().await.map_err(|e| {
        tracing::error!("Failed to list tasks: {}", e);
        AppError::Internal(op_error.into())
    })?;

    let docs: Vec<Value> =
        tasks.iter().map(|task| doc(task, "Error retrieving tasks")).collect::<AppResult<_>>()?;

    if options.count {
        let count = options.count_matches(&docs);
        tracing::debug!("Counted {} matching tasks", count);
        return Ok(reply(StatusCode::OK, Value::from(count)));
    }

    Ok(reply(StatusCode::OK, Value::Array(options.run(docs))))
}

pub async fn get_task(
    State((store, _config)): State<(StoreService, Config)>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> AppResult<Response> {
    let options = QueryOptions::parse(&params, None)?;

    let task = store
        .get_task(&id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch task {}: {}", id, e);
            AppError::NotFound("Task not found".into())
        })?
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;

    let document = doc(&task, "Error retrieving tasks")?;
    Ok(reply(StatusCode::OK, options.project(&document)))
}

pub async fn replace_task(
    State((store, _config)): State<(StoreService, Config)>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let body: TaskBody = models::from_body(body)?;
    if !body.has_required_fields() {
        return Err(AppError::BadRequest("Name and deadline are required".into()));
    }

    let deadline = body
        .deadline
        .as_ref()
        .and_then(models::parse_deadline)
        .ok_or_else(|| AppError::BadRequest("Invalid deadline".into()))?;

    let mut task = store
        .get_task(&id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch task {}: {}", id, e);
            AppError::Internal("Error updating task".into())
        })?
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;

    // The reconciliation below needs the assignment state being replaced.
    let prior = consistency::TaskSnapshot::from(&task);

    task.name = body.name.unwrap_or_default();
    task.description = body.description.unwrap_or_default();
    task.deadline = deadline;
    task.completed = models::coerce_completed(body.completed.as_ref());
    task.assigned_user = body.assigned_user.unwrap_or_default();
    task.assigned_user_name = body
        .assigned_user_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNASSIGNED.to_string());

    store.save_task(&task).await.map_err(|e| {
        tracing::error!("Failed to persist task {}: {}", task.id, e);
        AppError::Internal("Error updating task".into())
    })?;

    let steps = consistency::plan_task_update(&prior, &task);
    consistency::run_task_reconcile(&store, &mut task, steps).await.map_err(|e| {
        tracing::error!("Failed to reconcile task {}: {}", task.id, e);
        AppError::Internal("Error updating task".into())
    })?;

    Ok(reply(StatusCode::OK, doc(&task, "Error updating task")?))
}

pub async fn delete_task(
    State((store, _config)): State<(StoreService, Config)>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let task = store
        .get_task(&id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch task {}: {}", id, e);
            AppError::Internal("Error deleting task".into())
        })?
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;

    if !task.assigned_user.is_empty() {
        consistency::detach_task(&store, &task.assigned_user, &task.id).await.map_err(|e| {
            tracing::error!("Failed to detach task {} from {}: {}", task.id, task.assigned_user, e);
            AppError::Internal("Error deleting task".into())
        })?;
    }

    store.delete_task(&task.id).await.map_err(|e| {
        tracing::error!("Failed to delete task {}: {}", task.id, e);
        AppError::Internal("Error deleting task".into())
    })?;

    tracing::debug!("Deleted task {}", task.id);
    Ok(StatusCode::NO_CONTENT.into_response())
}
