//! Reconciliation between a task's assignment fields and each user's
//! pending-task list. Every write path that touches one side of the
//! relationship goes through here to restore the other side.

use redis::{AsyncCommands, RedisError};
use std::collections::HashSet;

use crate::errors::{AppError, AppResult};
use crate::models::{Task, User, UNASSIGNED};
use crate::services::store::{self, StoreService};

// Optimistic-transaction attempts before the user update gives up.
const TXN_RETRIES: usize = 8;

/// Appends a task id to a pending list idempotently: an already-present id
/// moves to the end instead of duplicating.
pub fn push_pending(pending: &mut Vec<String>, task_id: &str) {
    pending.retain(|id| id != task_id);
    pending.push(task_id.to_string());
}

/// First-occurrence dedup, keeping the incoming order.
pub fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Assignment state of a task before a replace is applied.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    pub assigned_user: String,
    pub completed: bool,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        TaskSnapshot { assigned_user: task.assigned_user.clone(), completed: task.completed }
    }
}

#[derive(Debug, PartialEq)]
pub enum ReconcileStep {
    /// Remove the task id from this user's pending list.
    Detach { user_id: String },
    /// Denormalize this user's name onto the task and append the id to the
    /// user's pending list.
    Attach { user_id: String },
}

/// Steps to run after a task replace: the previous assignee loses the id
/// when the assignee changed, the previous assignee also loses it when the
/// task is now completed, otherwise a live assignment is (re)attached. The
/// last two are mutually exclusive.
pub fn plan_task_update(prior: &TaskSnapshot, task: &Task) -> Vec<ReconcileStep> {
    let mut steps = Vec::new();

    if !prior.assigned_user.is_empty() && prior.assigned_user != task.assigned_user {
        steps.push(ReconcileStep::Detach { user_id: prior.assigned_user.clone() });
    }

    if task.completed && !prior.assigned_user.is_empty() {
        steps.push(ReconcileStep::Detach { user_id: prior.assigned_user.clone() });
    } else if !task.assigned_user.is_empty() && !task.completed {
        steps.push(ReconcileStep::Attach { user_id: task.assigned_user.clone() });
    }

    steps
}

pub async fn run_task_reconcile(
    store: &StoreService,
    task: &mut Task,
    steps: Vec<ReconcileStep>,
) -> Result<(), RedisError> {
    for step in steps {
        match step {
            ReconcileStep::Detach { user_id } => detach_task(store, &user_id, &task.id).await?,
            ReconcileStep::Attach { .. } => attach_task(store, task).await?,
        }
    }
    Ok(())
}

/// Resolves the task's assignee, denormalizes the user's name onto the
/// task, appends the id to the pending list, and persists both documents.
/// An unknown assignee leaves everything untouched.
pub async fn attach_task(store: &StoreService, task: &mut Task) -> Result<(), RedisError> {
    let mut user = match store.get_user(&task.assigned_user).await? {
        Some(user) => user,
        None => return Ok(()),
    };

    task.assigned_user_name = user.name.clone();
    push_pending(&mut user.pending_tasks, &task.id);
    store.save_user(&user).await?;
    store.save_task(task).await
}

/// Removes a task id from a user's pending list; unknown users and absent
/// ids are no-ops.
pub async fn detach_task(
    store: &StoreService,
    user_id: &str,
    task_id: &str,
) -> Result<(), RedisError> {
    if let Some(mut user) = store.get_user(user_id).await? {
        if user.pending_tasks.iter().any(|id| id == task_id) {
            user.pending_tasks.retain(|id| id != task_id);
            store.save_user(&user).await?;
        }
    }
    Ok(())
}

/// Clears the assignment fields of every task in the user's pending list,
/// ahead of deleting the user. Best-effort sequential, like the task-side
/// reconciliations.
pub async fn unassign_pending(store: &StoreService, user: &User) -> Result<(), RedisError> {
    for task_id in &user.pending_tasks {
        if let Some(mut task) = store.get_task(task_id).await? {
            task.assigned_user.clear();
            task.assigned_user_name = UNASSIGNED.to_string();
            store.save_task(&task).await?;
        }
    }
    Ok(())
}

/// Incoming field values for a user replace.
#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub name: String,
    pub email: String,
    pub pending_tasks: Vec<String>,
}

/// Everything the user-update transaction writes: the new user document and
/// the task documents whose assignment fields change.
#[derive(Debug)]
pub struct UserUpdatePlan {
    pub user: User,
    pub task_writes: Vec<Task>,
}

/// Pure computation of a user replace. `affected` holds every task that is
/// assigned to the user or referenced by the old or new pending list. Per
/// task: membership in the new list forces assignment to this user, removal
/// from the old list clears assignment, and a plain existing assignment
/// picks up the (possibly renamed) user name. Unchanged documents are not
/// written.
pub fn plan_user_update(user: &User, update: &UserUpdate, affected: &[Task]) -> UserUpdatePlan {
    let old_pending = user.pending_tasks.clone();

    let mut next = user.clone();
    next.name = update.name.clone();
    next.email = update.email.clone();
    next.pending_tasks = dedup_preserving_order(update.pending_tasks.clone());

    let mut task_writes = Vec::new();
    for task in affected {
        let mut rewritten = task.clone();
        if next.pending_tasks.iter().any(|id| id == &task.id) {
            rewritten.assigned_user = next.id.clone();
            rewritten.assigned_user_name = next.name.clone();
        } else if old_pending.iter().any(|id| id == &task.id) {
            rewritten.assigned_user.clear();
            rewritten.assigned_user_name = UNASSIGNED.to_string();
        } else if rewritten.assigned_user == next.id {
            rewritten.assigned_user_name = next.name.clone();
        }
        if rewritten != *task {
            task_writes.push(rewritten);
        }
    }

    UserUpdatePlan { user: next, task_writes }
}

/// Applies a user replace as one all-or-nothing transaction: WATCH the user
/// document, the claimed email key, and every affected task document; read;
/// plan; EXEC the whole write set. A concurrent write to any watched key
/// aborts the EXEC and the transaction retries from a fresh snapshot.
pub async fn commit_user_update(
    store: &StoreService,
    user_id: &str,
    update: UserUpdate,
) -> AppResult<User> {
    for _ in 0..TXN_RETRIES {
        let mut conn = store.connection().await?;

        redis::cmd("WATCH")
            .arg(store::user_key(user_id))
            .arg(store::email_key(&update.email))
            .query_async::<_, ()>(&mut conn)
            .await?;

        let raw: Option<String> = conn.get(store::user_key(user_id)).await?;
        let user: User = match raw {
            Some(data) => store::decode(&data)?,
            None => {
                redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
                return Err(AppError::NotFound("User not found".into()));
            }
        };

        if update.email != user.email {
            let holder: Option<String> = conn.get(store::email_key(&update.email)).await?;
            if holder.map_or(false, |id| id != user.id) {
                redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
                return Err(AppError::DuplicateEmail);
            }
        }

        let affected_ids = discover_affected(&mut conn, &user, &update).await?;

        let mut affected: Vec<Task> = Vec::new();
        if !affected_ids.is_empty() {
            let keys: Vec<String> =
                affected_ids.iter().map(|id| store::task_key(id)).collect();
            redis::cmd("WATCH").arg(&keys).query_async::<_, ()>(&mut conn).await?;
            // Authoritative read, after the keys are under watch.
            let raw: Vec<Option<String>> =
                redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
            for data in raw.into_iter().flatten() {
                affected.push(store::decode(&data)?);
            }
        }

        let plan = plan_user_update(&user, &update, &affected);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(store::user_key(user_id), store::encode(&plan.user)?).ignore();
        if update.email != user.email {
            pipe.del(store::email_key(&user.email)).ignore();
            pipe.set(store::email_key(&update.email), &plan.user.id).ignore();
        }
        for task in &plan.task_writes {
            pipe.set(store::task_key(&task.id), store::encode(task)?).ignore();
        }

        let committed: Option<()> = pipe.query_async(&mut conn).await?;
        if committed.is_some() {
            return Ok(plan.user);
        }
        // A watched key changed under us; retry from a fresh snapshot.
    }

    Err(AppError::Internal("Error updating user".into()))
}

// Scans the task collection for documents the plan may rewrite: assigned to
// the user, or referenced by the old or new pending list.
async fn discover_affected(
    conn: &mut redis::aio::Connection,
    user: &User,
    update: &UserUpdate,
) -> Result<Vec<String>, RedisError> {
    let ids: Vec<String> = conn.lrange(store::TASK_INDEX, 0, -1).await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let keys: Vec<String> = ids.iter().map(|id| store::task_key(id)).collect();
    let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;

    let new_pending = dedup_preserving_order(update.pending_tasks.clone());
    let mut affected = Vec::new();
    for data in raw.into_iter().flatten() {
        let task: Task = store::decode(&data)?;
        let touched = task.assigned_user == user.id
            || user.pending_tasks.iter().any(|id| id == &task.id)
            || new_pending.iter().any(|id| id == &task.id);
        if touched {
            affected.push(task.id);
        }
    }
    Ok(affected)
}
