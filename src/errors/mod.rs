// Application error type and result alias, built on thiserror.
use thiserror::Error;

pub mod response;
pub mod repository;
pub mod gateway;

pub use repository::{RepositoryError, RepoResult};
pub use gateway::{GatewayError, GatewayResult};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    // Missing configuration needed to reach a dependency. Never retried.
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Account cleanup incomplete (assistant deleted: {assistant_deleted}, user deleted: {user_deleted})")]
    Cleanup {
        assistant_deleted: bool,
        user_deleted: bool,
    },
}

pub type AppResult<T> = Result<T, AppError>;
