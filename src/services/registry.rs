use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::errors::AppResult;
use super::assistant_gateway::AssistantGateway;
use super::cleanup::CleanupPolicy;
use super::session::ChatSession;
use super::user_repository::UserRepository;

pub type SharedSession = Arc<Mutex<ChatSession>>;

/// Live chat sessions keyed by username. A session is created at login and
/// dropped at logout or when its account is wiped.
#[derive(Clone)]
pub struct SessionRegistry {
    users: Arc<dyn UserRepository>,
    assistants: Arc<dyn AssistantGateway>,
    cleanup: CleanupPolicy,
    sessions: Arc<Mutex<HashMap<String, SharedSession>>>,
}

impl SessionRegistry {
    pub fn new(
        users: Arc<dyn UserRepository>,
        assistants: Arc<dyn AssistantGateway>,
        cleanup: CleanupPolicy,
    ) -> Self {
        Self {
            users,
            assistants,
            cleanup,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the live session for `username`, opening one if needed
    /// (e.g. when a login cookie outlived a server restart).
    pub async fn open(&self, username: &str) -> AppResult<SharedSession> {
        if let Some(session) = self.sessions.lock().await.get(username) {
            return Ok(session.clone());
        }

        // Not holding the map lock across remote calls
        let session = ChatSession::open(
            self.users.clone(),
            self.assistants.clone(),
            self.cleanup.clone(),
            username,
        )
        .await?;

        let mut sessions = self.sessions.lock().await;
        let shared = sessions
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(session)))
            .clone();
        Ok(shared)
    }

    pub async fn close(&self, username: &str) -> bool {
        let removed = self.sessions.lock().await.remove(username).is_some();
        if removed {
            tracing::debug!("Closed chat session for {}", username);
        }
        removed
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
