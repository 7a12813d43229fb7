mod credentials;
mod user_repository;
mod memory_repository;
mod assistant_gateway;
mod cleanup;
mod session;
mod registry;
mod auth;
#[cfg(test)]
pub mod testing;

pub use user_repository::{UserRepository, RedisUserRepository};
pub use memory_repository::InMemoryUserRepository;
pub use assistant_gateway::{AssistantGateway, OpenAiAssistantGateway};
pub use cleanup::CleanupPolicy;
pub use session::TurnOutcome;
pub use registry::{SessionRegistry, SharedSession};
pub use auth::{register_user, login_user};
