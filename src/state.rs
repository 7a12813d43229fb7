use std::sync::Arc;
use crate::config::Config;
use crate::services::{AssistantGateway, CleanupPolicy, SessionRegistry, UserRepository};

// Application state shared between handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub assistants: Arc<dyn AssistantGateway>,
    pub sessions: SessionRegistry,
    pub config: Config,
}

impl AppState {
    pub fn new(
        users: Arc<dyn UserRepository>,
        assistants: Arc<dyn AssistantGateway>,
        config: Config,
    ) -> Self {
        let sessions = SessionRegistry::new(
            users.clone(),
            assistants.clone(),
            CleanupPolicy::from(&config.cleanup),
        );
        Self { users, assistants, sessions, config }
    }
}
