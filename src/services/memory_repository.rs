use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use crate::errors::{RepositoryError, RepoResult};
use crate::models::{ChatMessage, NewUser, User};
use super::user_repository::UserRepository;

#[derive(Default)]
struct Documents {
    users: HashMap<String, User>,
    usernames: HashMap<String, String>,
}

/// Process-local repository for running the demo without Redis.
#[derive(Default)]
pub struct InMemoryUserRepository {
    docs: Mutex<Documents>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.docs.lock().await.users.len()
    }
}

fn id_for<'a>(docs: &'a Documents, username: &str) -> RepoResult<&'a String> {
    docs.usernames
        .get(username)
        .ok_or_else(|| RepositoryError::NotFound(username.to_string()))
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create_user(&self, new_user: NewUser) -> RepoResult<String> {
        let mut docs = self.docs.lock().await;
        if docs.usernames.contains_key(&new_user.username) {
            return Err(RepositoryError::DuplicateUser(new_user.username));
        }

        let id = uuid::Uuid::new_v4().to_string();
        docs.usernames.insert(new_user.username.clone(), id.clone());
        docs.users.insert(id.clone(), User {
            id: id.clone(),
            username: new_user.username,
            password_hash: new_user.password_hash,
            usage: 0,
            limit: new_user.limit,
            assistant_id: new_user.assistant_id,
            thread_ids: Vec::new(),
            chat_history: Vec::new(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let docs = self.docs.lock().await;
        Ok(docs
            .usernames
            .get(username)
            .and_then(|id| docs.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<User>> {
        Ok(self.docs.lock().await.users.get(id).cloned())
    }

    async fn append_thread(&self, username: &str, thread_id: &str) -> RepoResult<()> {
        let mut docs = self.docs.lock().await;
        let id = id_for(&docs, username)?.clone();
        let user = docs
            .users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(username.to_string()))?;
        user.thread_ids.push(thread_id.to_string());
        Ok(())
    }

    async fn replace_history(&self, username: &str, history: &[ChatMessage]) -> RepoResult<()> {
        let mut docs = self.docs.lock().await;
        let id = id_for(&docs, username)?.clone();
        let user = docs
            .users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(username.to_string()))?;
        user.chat_history = history.to_vec();
        Ok(())
    }

    async fn increment_usage(&self, id: &str, amount: u64) -> RepoResult<u64> {
        let mut docs = self.docs.lock().await;
        let user = docs
            .users
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        user.usage += amount;
        Ok(user.usage)
    }

    async fn record_turn(&self, id: &str, amount: u64, history: &[ChatMessage]) -> RepoResult<u64> {
        let mut docs = self.docs.lock().await;
        let user = docs
            .users
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        user.usage += amount;
        user.chat_history = history.to_vec();
        Ok(user.usage)
    }

    async fn delete_user(&self, id: &str) -> RepoResult<()> {
        let mut docs = self.docs.lock().await;
        if let Some(user) = docs.users.remove(id) {
            docs.usernames.remove(&user.username);
        }
        Ok(())
    }
}
