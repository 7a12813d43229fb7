use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{Client, AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::Arc;
use crate::errors::{RepositoryError, RepoResult};
use crate::models::{ChatMessage, NewUser, User};

/// CRUD over user documents. Every mutation is atomic on its own; lookups
/// return `None` rather than failing when nothing matches.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Inserts a user with zero usage, failing with `DuplicateUser` if the name is taken.
    async fn create_user(&self, new_user: NewUser) -> RepoResult<String>;

    async fn find_by_username(&self, username: &str) -> RepoResult<Option<User>>;

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<User>>;

    async fn append_thread(&self, username: &str, thread_id: &str) -> RepoResult<()>;

    async fn replace_history(&self, username: &str, history: &[ChatMessage]) -> RepoResult<()>;

    /// Adds `amount` to the usage counter and returns the new total.
    async fn increment_usage(&self, id: &str, amount: u64) -> RepoResult<u64>;

    /// Increments usage and replaces the history in a single atomic update.
    async fn record_turn(&self, id: &str, amount: u64, history: &[ChatMessage]) -> RepoResult<u64>;

    /// Idempotent: deleting an absent user succeeds.
    async fn delete_user(&self, id: &str) -> RepoResult<()>;
}

const USER_PREFIX: &str = "chat:user";
const USERNAME_PREFIX: &str = "chat:username:";

// Claims the name and writes the record together; returns 0 if the name is taken.
const CREATE_USER: &str = r#"
if redis.call('SETNX', KEYS[1], ARGV[1]) == 0 then return 0 end
redis.call('HSET', KEYS[2],
  'username', ARGV[2],
  'password_hash', ARGV[3],
  'usage', 0,
  'limit', ARGV[4],
  'assistant_id', ARGV[5],
  'chat_history', '[]',
  'created_at', ARGV[6])
return 1
"#;

// Scripts return -1 when the user hash is missing so a mutation never recreates a deleted user.
const INCREMENT_USAGE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
return redis.call('HINCRBY', KEYS[1], 'usage', ARGV[1])
"#;

const APPEND_THREAD: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
return redis.call('RPUSH', KEYS[2], ARGV[1])
"#;

const REPLACE_HISTORY: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
redis.call('HSET', KEYS[1], 'chat_history', ARGV[1])
return 1
"#;

const RECORD_TURN: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
redis.call('HSET', KEYS[1], 'chat_history', ARGV[2])
return redis.call('HINCRBY', KEYS[1], 'usage', ARGV[1])
"#;

const DELETE_USER: &str = r#"
local name = redis.call('HGET', KEYS[1], 'username')
redis.call('DEL', KEYS[1], KEYS[2])
if name then
  local index = ARGV[1] .. name
  if redis.call('GET', index) == ARGV[2] then
    redis.call('DEL', index)
  end
end
return 1
"#;

struct Scripts {
    create_user: Script,
    increment_usage: Script,
    append_thread: Script,
    replace_history: Script,
    record_turn: Script,
    delete_user: Script,
}

fn user_key(id: &str) -> String {
    format!("{}:{}", USER_PREFIX, id)
}

fn threads_key(id: &str) -> String {
    format!("{}:{}:threads", USER_PREFIX, id)
}

fn username_key(username: &str) -> String {
    format!("{}{}", USERNAME_PREFIX, username)
}

/// Users stored as one hash per user, a list of thread ids, and a
/// username → id index that doubles as the uniqueness constraint.
#[derive(Clone)]
pub struct RedisUserRepository {
    client: Arc<Client>,
    scripts: Arc<Scripts>,
}

impl RedisUserRepository {
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            scripts: Arc::new(Scripts {
                create_user: Script::new(CREATE_USER),
                increment_usage: Script::new(INCREMENT_USAGE),
                append_thread: Script::new(APPEND_THREAD),
                replace_history: Script::new(REPLACE_HISTORY),
                record_turn: Script::new(RECORD_TURN),
                delete_user: Script::new(DELETE_USER),
            }),
        }
    }

    /// Fails fast at startup when the server is unreachable.
    pub async fn ping(&self) -> RepoResult<()> {
        let mut conn = self.client.get_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn resolve_id(
        &self,
        conn: &mut redis::aio::Connection,
        username: &str,
    ) -> RepoResult<String> {
        let id: Option<String> = conn.get(username_key(username)).await?;
        id.ok_or_else(|| RepositoryError::NotFound(username.to_string()))
    }
}

fn scripted(result: i64, who: &str) -> RepoResult<u64> {
    if result < 0 {
        Err(RepositoryError::NotFound(who.to_string()))
    } else {
        Ok(result as u64)
    }
}

fn parse_user(id: &str, fields: HashMap<String, String>, thread_ids: Vec<String>) -> RepoResult<User> {
    let corrupt = |reason: String| RepositoryError::Corrupt { id: id.to_string(), reason };
    let field = |name: &str| {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| corrupt(format!("missing field {}", name)))
    };
    let number = |name: &str| -> RepoResult<u64> {
        field(name)?
            .parse()
            .map_err(|e| corrupt(format!("field {}: {}", name, e)))
    };

    let chat_history: Vec<ChatMessage> = serde_json::from_str(&field("chat_history")?)
        .map_err(|e| corrupt(format!("chat_history: {}", e)))?;
    let created_at = DateTime::parse_from_rfc3339(&field("created_at")?)
        .map_err(|e| corrupt(format!("created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(User {
        id: id.to_string(),
        username: field("username")?,
        password_hash: field("password_hash")?,
        usage: number("usage")?,
        limit: number("limit")?,
        assistant_id: field("assistant_id")?,
        thread_ids,
        chat_history,
        created_at,
    })
}

#[async_trait]
impl UserRepository for RedisUserRepository {
    async fn create_user(&self, new_user: NewUser) -> RepoResult<String> {
        let mut conn = self.client.get_async_connection().await?;
        let id = uuid::Uuid::new_v4().to_string();

        let created: i64 = self
            .scripts
            .create_user
            .key(username_key(&new_user.username))
            .key(user_key(&id))
            .arg(&id)
            .arg(&new_user.username)
            .arg(&new_user.password_hash)
            .arg(new_user.limit)
            .arg(&new_user.assistant_id)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        if created == 0 {
            tracing::debug!("Username {} already claimed", new_user.username);
            return Err(RepositoryError::DuplicateUser(new_user.username));
        }

        tracing::info!("Created user {} with id {}", new_user.username, id);
        Ok(id)
    }

    async fn find_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let mut conn = self.client.get_async_connection().await?;
        let id: Option<String> = conn.get(username_key(username)).await?;
        match id {
            Some(id) => self.find_by_id(&id).await,
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<User>> {
        let mut conn = self.client.get_async_connection().await?;
        let (fields, thread_ids): (HashMap<String, String>, Vec<String>) = redis::pipe()
            .atomic()
            .hgetall(user_key(id))
            .lrange(threads_key(id), 0, -1)
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        parse_user(id, fields, thread_ids).map(Some)
    }

    async fn append_thread(&self, username: &str, thread_id: &str) -> RepoResult<()> {
        let mut conn = self.client.get_async_connection().await?;
        let id = self.resolve_id(&mut conn, username).await?;
        let result: i64 = self
            .scripts
            .append_thread
            .key(user_key(&id))
            .key(threads_key(&id))
            .arg(thread_id)
            .invoke_async(&mut conn)
            .await?;
        scripted(result, username).map(|_| ())
    }

    async fn replace_history(&self, username: &str, history: &[ChatMessage]) -> RepoResult<()> {
        let mut conn = self.client.get_async_connection().await?;
        let id = self.resolve_id(&mut conn, username).await?;
        let encoded = serde_json::to_string(history)?;
        let result: i64 = self
            .scripts
            .replace_history
            .key(user_key(&id))
            .arg(encoded)
            .invoke_async(&mut conn)
            .await?;
        scripted(result, username).map(|_| ())
    }

    async fn increment_usage(&self, id: &str, amount: u64) -> RepoResult<u64> {
        let mut conn = self.client.get_async_connection().await?;
        let result: i64 = self
            .scripts
            .increment_usage
            .key(user_key(id))
            .arg(amount)
            .invoke_async(&mut conn)
            .await?;
        scripted(result, id)
    }

    async fn record_turn(&self, id: &str, amount: u64, history: &[ChatMessage]) -> RepoResult<u64> {
        let mut conn = self.client.get_async_connection().await?;
        let encoded = serde_json::to_string(history)?;
        let result: i64 = self
            .scripts
            .record_turn
            .key(user_key(id))
            .arg(amount)
            .arg(encoded)
            .invoke_async(&mut conn)
            .await?;
        scripted(result, id)
    }

    async fn delete_user(&self, id: &str) -> RepoResult<()> {
        let mut conn = self.client.get_async_connection().await?;
        let _: i64 = self
            .scripts
            .delete_user
            .key(user_key(id))
            .key(threads_key(id))
            .arg(USERNAME_PREFIX)
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        tracing::info!("Deleted user record {}", id);
        Ok(())
    }
}
