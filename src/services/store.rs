use redis::{aio::Connection, AsyncCommands, Client, ErrorKind, RedisError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::models::{Task, User};

// Index lists keep document insertion order; the email key is a uniqueness
// index for users.
pub(crate) const TASK_INDEX: &str = "tasks";
pub(crate) const USER_INDEX: &str = "users";

pub(crate) fn task_key(id: &str) -> String {
    format!("task:{}", id)
}

pub(crate) fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub(crate) fn email_key(email: &str) -> String {
    format!("user_email:{}", email)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, RedisError> {
    serde_json::to_string(value).map_err(|e| {
        RedisError::from((ErrorKind::TypeError, "Failed to serialize document", e.to_string()))
    })
}

pub(crate) fn decode<T: DeserializeOwned>(data: &str) -> Result<T, RedisError> {
    serde_json::from_str(data).map_err(|e| {
        RedisError::from((ErrorKind::TypeError, "Failed to parse document", e.to_string()))
    })
}

/// Document store over Redis: one JSON document per key, an index list per
/// collection, and per-call connections from a shared client.
pub struct StoreService {
    client: Arc<Client>,
}

impl StoreService {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    // The consistency coordinator runs its WATCH/EXEC transaction on a
    // single dedicated connection.
    pub(crate) async fn connection(&self) -> Result<Connection, RedisError> {
        self.client.get_async_connection().await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, RedisError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(task_key(id)).await?;
        raw.map(|data| decode(&data)).transpose()
    }

    pub async fn insert_task(&self, task: &Task) -> Result<(), RedisError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .set(task_key(&task.id), encode(task)?)
            .ignore()
            .rpush(TASK_INDEX, &task.id)
            .ignore()
            .query_async(&mut conn)
            .await
    }

    pub async fn save_task(&self, task: &Task) -> Result<(), RedisError> {
        let mut conn = self.connection().await?;
        conn.set(task_key(&task.id), encode(task)?).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), RedisError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .del(task_key(id))
            .ignore()
            .lrem(TASK_INDEX, 0, id)
            .ignore()
            .query_async(&mut conn)
            .await
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, RedisError> {
        let mut conn = self.connection().await?;
        load_all(&mut conn, TASK_INDEX, task_key).await
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, RedisError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(user_key(id)).await?;
        raw.map(|data| decode(&data)).transpose()
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), RedisError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .set(user_key(&user.id), encode(user)?)
            .ignore()
            .rpush(USER_INDEX, &user.id)
            .ignore()
            .query_async(&mut conn)
            .await
    }

    pub async fn save_user(&self, user: &User) -> Result<(), RedisError> {
        let mut conn = self.connection().await?;
        conn.set(user_key(&user.id), encode(user)?).await
    }

    /// Removes the user document, its index entry, and its email claim.
    pub async fn delete_user(&self, user: &User) -> Result<(), RedisError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .del(user_key(&user.id))
            .ignore()
            .lrem(USER_INDEX, 0, &user.id)
            .ignore()
            .del(email_key(&user.email))
            .ignore()
            .query_async(&mut conn)
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<User>, RedisError> {
        let mut conn = self.connection().await?;
        load_all(&mut conn, USER_INDEX, user_key).await
    }

    /// Claims an email for a user via SETNX; false means already taken.
    pub async fn claim_email(&self, email: &str, user_id: &str) -> Result<bool, RedisError> {
        let mut conn = self.connection().await?;
        conn.set_nx(email_key(email), user_id).await
    }
}

async fn load_all<T: DeserializeOwned>(
    conn: &mut Connection,
    index: &str,
    key_fn: fn(&str) -> String,
) -> Result<Vec<T>, RedisError> {
    let ids: Vec<String> = conn.lrange(index, 0, -1).await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let keys: Vec<String> = ids.iter().map(|id| key_fn(id)).collect();
    let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;
    // Ids whose document has vanished are skipped.
    raw.into_iter().flatten().map(|data| decode(&data)).collect()
}

impl Clone for StoreService {
    fn clone(&self) -> Self {
        Self { client: self.client.clone() }
    }
}
