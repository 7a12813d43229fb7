use std::time::Duration;
use tokio::time::sleep;
use crate::config::CleanupConfig;
use crate::errors::{AppError, AppResult};
use super::assistant_gateway::AssistantGateway;
use super::user_repository::UserRepository;

#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl From<&CleanupConfig> for CleanupPolicy {
    fn from(config: &CleanupConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub assistant_deleted: bool,
    pub user_deleted: bool,
    pub attempts: u32,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.assistant_deleted && self.user_deleted
    }
}

/// Removes the remote assistant and the local user record.
///
/// Both steps are tracked separately and only the unfinished ones are retried,
/// so running it again after a partial failure is safe. An assistant the
/// provider no longer knows counts as deleted.
pub async fn wipe_account(
    users: &dyn UserRepository,
    assistants: &dyn AssistantGateway,
    policy: &CleanupPolicy,
    user_id: &str,
    assistant_id: &str,
) -> AppResult<CleanupReport> {
    let mut report = CleanupReport::default();
    let max_attempts = policy.max_attempts.max(1);

    while report.attempts < max_attempts {
        report.attempts += 1;

        if !report.assistant_deleted {
            match assistants.delete_assistant(assistant_id).await {
                Ok(()) => report.assistant_deleted = true,
                Err(e) if e.is_not_found() => {
                    tracing::debug!("Assistant {} already gone", assistant_id);
                    report.assistant_deleted = true;
                }
                Err(e) => tracing::warn!(
                    "Attempt {}/{} to delete assistant {} failed: {}",
                    report.attempts,
                    max_attempts,
                    assistant_id,
                    e
                ),
            }
        }

        if !report.user_deleted {
            match users.delete_user(user_id).await {
                Ok(()) => report.user_deleted = true,
                Err(e) => tracing::warn!(
                    "Attempt {}/{} to delete user {} failed: {}",
                    report.attempts,
                    max_attempts,
                    user_id,
                    e
                ),
            }
        }

        if report.is_complete() {
            tracing::info!("Wiped account {} after {} attempt(s)", user_id, report.attempts);
            return Ok(report);
        }

        if report.attempts < max_attempts {
            sleep(policy.retry_delay).await;
        }
    }

    tracing::error!(
        "Account {} only partially wiped: assistant deleted {}, user deleted {}",
        user_id,
        report.assistant_deleted,
        report.user_deleted
    );
    Err(AppError::Cleanup {
        assistant_deleted: report.assistant_deleted,
        user_deleted: report.user_deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::services::memory_repository::InMemoryUserRepository;
    use crate::services::testing::FakeAssistantGateway;

    fn policy(max_attempts: u32) -> CleanupPolicy {
        CleanupPolicy { max_attempts, retry_delay: Duration::ZERO }
    }

    async fn seeded() -> (InMemoryUserRepository, FakeAssistantGateway, String, String) {
        let users = InMemoryUserRepository::new();
        let assistants = FakeAssistantGateway::new();
        let assistant_id = assistants.create_assistant().await.unwrap();
        let user_id = users
            .create_user(NewUser {
                username: "erin".into(),
                password_hash: "h".into(),
                assistant_id: assistant_id.clone(),
                limit: 3000,
            })
            .await
            .unwrap();
        (users, assistants, user_id, assistant_id)
    }

    #[tokio::test]
    async fn test_wipe_removes_both_sides() {
        let (users, assistants, user_id, assistant_id) = seeded().await;

        let report = wipe_account(&users, &assistants, &policy(3), &user_id, &assistant_id)
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.attempts, 1);
        assert!(!assistants.is_live(&assistant_id));
        assert!(users.find_by_id(&user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wipe_retries_only_the_failed_step() {
        let (users, assistants, user_id, assistant_id) = seeded().await;
        assistants.fail_next_deletes(2);

        let report = wipe_account(&users, &assistants, &policy(5), &user_id, &assistant_id)
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        assert!(report.is_complete());
        assert_eq!(assistants.deleted(), vec![assistant_id]);
    }

    #[tokio::test]
    async fn test_wipe_reports_partial_failure() {
        let (users, assistants, user_id, assistant_id) = seeded().await;
        assistants.fail_next_deletes(10);

        let result = wipe_account(&users, &assistants, &policy(2), &user_id, &assistant_id).await;

        assert!(matches!(
            result,
            Err(AppError::Cleanup { assistant_deleted: false, user_deleted: true })
        ));
        assert!(users.find_by_id(&user_id).await.unwrap().is_none());
        assert!(assistants.is_live(&assistant_id));
    }

    #[tokio::test]
    async fn test_wipe_is_idempotent() {
        let (users, assistants, user_id, assistant_id) = seeded().await;
        wipe_account(&users, &assistants, &policy(1), &user_id, &assistant_id)
            .await
            .unwrap();

        // Second run sees a 404 from the provider and an absent user
        let again = wipe_account(&users, &assistants, &policy(1), &user_id, &assistant_id)
            .await
            .unwrap();
        assert!(again.is_complete());
    }
}
