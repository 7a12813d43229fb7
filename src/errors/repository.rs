use thiserror::Error;
use redis::RedisError;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("User {0} already exists")]
    DuplicateUser(String),

    #[error("User {0} not found")]
    NotFound(String),

    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Corrupt user record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<serde_json::Error> for RepositoryError {
    fn from(e: serde_json::Error) -> Self {
        RepositoryError::Corrupt {
            id: "unknown".into(),
            reason: e.to_string(),
        }
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;
