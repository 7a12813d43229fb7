mod config;
mod errors;
mod handlers;
mod middleware;
mod models;
mod router;
mod services;
mod state;

use std::sync::Arc;
use anyhow::Context;
use crate::{
    config::{Config, StoreBackend},
    services::{
        AssistantGateway, InMemoryUserRepository, OpenAiAssistantGateway,
        RedisUserRepository, UserRepository,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let users: Arc<dyn UserRepository> = match config.store.backend {
        StoreBackend::Redis => {
            let client = redis::Client::open(config.redis_url())
                .context("Invalid Redis URL")?;
            let repository = RedisUserRepository::new(Arc::new(client));
            repository.ping().await.context("Failed to connect to Redis")?;
            Arc::new(repository)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory user store; accounts are lost on restart");
            Arc::new(InMemoryUserRepository::new())
        }
    };

    let assistants: Arc<dyn AssistantGateway> = Arc::new(
        OpenAiAssistantGateway::new(&config.openai, &config.polling)
            .context("Failed to build assistant client")?,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = router::build_router(AppState::new(users, assistants, config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server running on {}", addr);

    axum::serve(listener, app.into_make_service())
        .await
        .context("Server stopped unexpectedly")?;
    Ok(())
}
