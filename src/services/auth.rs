use crate::errors::{AppError, AppResult, RepositoryError};
use crate::models::NewUser;
use super::assistant_gateway::AssistantGateway;
use super::credentials::{hash_password, verify_password};
use super::user_repository::UserRepository;

/// Registers a new account. Returns `false` if the username is taken.
///
/// The assistant is only provisioned once the name looks free; if the insert
/// still loses the race on the username, that assistant is deleted again.
pub async fn register_user(
    users: &dyn UserRepository,
    assistants: &dyn AssistantGateway,
    username: &str,
    password: &str,
    limit: u64,
    bcrypt_cost: u32,
) -> AppResult<bool> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AppError::Validation("You need a username and password!".into()));
    }

    if users.find_by_username(username).await?.is_some() {
        tracing::info!("Registration rejected, {} already exists", username);
        return Ok(false);
    }

    let password_hash = hash_password(password, bcrypt_cost)?;
    let assistant_id = assistants.create_assistant().await?;

    let created = users
        .create_user(NewUser {
            username: username.to_string(),
            password_hash,
            assistant_id: assistant_id.clone(),
            limit,
        })
        .await;

    match created {
        Ok(id) => {
            tracing::info!("Registered {} ({}) with assistant {}", username, id, assistant_id);
            Ok(true)
        }
        Err(e) => {
            if let Err(delete_err) = assistants.delete_assistant(&assistant_id).await {
                tracing::error!("Orphaned assistant {} after failed registration: {}", assistant_id, delete_err);
            }
            match e {
                RepositoryError::DuplicateUser(_) => {
                    tracing::info!("Registration of {} lost a race with another signup", username);
                    Ok(false)
                }
                other => Err(other.into()),
            }
        }
    }
}

/// Unknown users and wrong passwords are indistinguishable to the caller.
pub async fn login_user(users: &dyn UserRepository, username: &str, password: &str) -> AppResult<bool> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Ok(false);
    }

    let verified = match users.find_by_username(username).await? {
        Some(user) => user.username == username && verify_password(password, &user.password_hash),
        None => false,
    };

    if !verified {
        tracing::info!("Failed login attempt for {}", username);
    }
    Ok(verified)
}
