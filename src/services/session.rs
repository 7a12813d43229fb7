use std::sync::Arc;
use crate::errors::{AppError, AppResult, RepositoryError};
use crate::models::{word_count, ChatMessage};
use super::assistant_gateway::{AssistantGateway, MessageOrder};
use super::cleanup::{wipe_account, CleanupPolicy, CleanupReport};
use super::user_repository::UserRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInput,
    Sending,
    AwaitingCompletion,
    Delivered,
    QuotaExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The assistant answered and the account stays within its quota.
    Delivered {
        response: String,
        usage: u64,
        remaining: u64,
    },
    /// The account was wiped. `response` is set when the prompt fit the
    /// budget but the answer pushed usage over the limit.
    QuotaExceeded {
        response: Option<String>,
        usage: u64,
    },
}

/// One user bound to one assistant thread for an interactive run.
///
/// The chat history is loaded from storage once, when the session opens;
/// later turns extend the in-memory buffer and persist it wholesale.
pub struct ChatSession {
    users: Arc<dyn UserRepository>,
    assistants: Arc<dyn AssistantGateway>,
    cleanup: CleanupPolicy,
    user_id: String,
    username: String,
    assistant_id: String,
    thread_id: String,
    history: Vec<ChatMessage>,
    state: SessionState,
}

impl ChatSession {
    /// Loads the user and binds the first thread, creating one if the user has none.
    pub async fn open(
        users: Arc<dyn UserRepository>,
        assistants: Arc<dyn AssistantGateway>,
        cleanup: CleanupPolicy,
        username: &str,
    ) -> AppResult<Self> {
        let user = users
            .find_by_username(username)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(username.to_string()))?;

        let thread_id = match user.thread_ids.first() {
            Some(thread_id) => thread_id.clone(),
            None => {
                let thread_id = assistants.create_thread().await?;
                users.append_thread(&user.username, &thread_id).await?;
                tracing::info!("Started thread {} for {}", thread_id, user.username);
                thread_id
            }
        };

        tracing::debug!(
            "Opened session for {} on thread {} with {} stored messages",
            user.username,
            thread_id,
            user.chat_history.len()
        );

        Ok(Self {
            users,
            assistants,
            cleanup,
            user_id: user.id,
            username: user.username,
            assistant_id: user.assistant_id,
            thread_id,
            history: user.chat_history,
            state: SessionState::AwaitingInput,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::QuotaExceeded
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("Session {}: {:?} -> {:?}", self.username, self.state, next);
        self.state = next;
    }

    /// Runs one request/response turn and enforces the word quota.
    ///
    /// A prompt longer than the remaining budget wipes the account without
    /// contacting the assistant. A prompt that fits is always answered in
    /// full; if the answer brings usage to or past the limit the account is
    /// wiped after the turn has been recorded.
    pub async fn submit(&mut self, message: &str) -> AppResult<TurnOutcome> {
        match self.state {
            SessionState::AwaitingInput | SessionState::Delivered => {}
            SessionState::QuotaExceeded => {
                return Err(AppError::Session("account has been terminated".into()));
            }
            busy => {
                return Err(AppError::Session(format!("turn already in progress ({:?})", busy)));
            }
        }

        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::Validation("Message cannot be empty".into()));
        }

        // Usage is read fresh every turn; only the history buffer is kept in memory.
        let user = self
            .users
            .find_by_id(&self.user_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(self.username.clone()))?;

        self.transition(SessionState::Sending);
        self.history.push(ChatMessage::user(message));

        let prompt_length = word_count(message);
        let remaining_words = user.remaining_words();

        if prompt_length > remaining_words {
            tracing::info!(
                "Prompt of {} words exceeds the {} words left for {}",
                prompt_length,
                remaining_words,
                self.username
            );
            self.terminate().await?;
            return Ok(TurnOutcome::QuotaExceeded { response: None, usage: user.usage });
        }

        self.transition(SessionState::AwaitingCompletion);
        let reply = match self
            .assistants
            .send_and_await(&self.thread_id, &self.assistant_id, message)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("No reply for {} on thread {}: {}", self.username, self.thread_id, e);
                // Unanswered prompts are not kept, so stored history stays in pairs
                self.history.pop();
                self.transition(SessionState::AwaitingInput);
                return Err(e.into());
            }
        };

        tracing::debug!("Thread {} now holds {} messages", self.thread_id, reply.messages.len());
        let response_length = word_count(&reply.text);
        self.history.push(ChatMessage::assistant(reply.text.clone()));

        let usage = match self
            .users
            .record_turn(&self.user_id, prompt_length + response_length, &self.history)
            .await
        {
            Ok(usage) => usage,
            Err(e) => {
                tracing::error!("Failed to record turn for {}: {}", self.username, e);
                self.history.truncate(self.history.len().saturating_sub(2));
                self.transition(SessionState::AwaitingInput);
                return Err(e.into());
            }
        };

        if usage >= user.limit {
            tracing::info!(
                "{} reached {} of {} words after a {}-word reply",
                self.username,
                usage,
                user.limit,
                response_length
            );
            self.terminate().await?;
            return Ok(TurnOutcome::QuotaExceeded { response: Some(reply.text), usage });
        }

        self.transition(SessionState::Delivered);
        tracing::info!("Delivered reply to {} ({} / {} words used)", self.username, usage, user.limit);
        Ok(TurnOutcome::Delivered {
            response: reply.text,
            usage,
            remaining: user.limit - usage,
        })
    }

    /// User-requested deletion of the account and its assistant.
    pub async fn wipe(&mut self) -> AppResult<CleanupReport> {
        tracing::info!("{} asked to wipe their data", self.username);
        self.terminate().await
    }

    // The session is terminal even if cleanup only partially succeeds.
    async fn terminate(&mut self) -> AppResult<CleanupReport> {
        self.transition(SessionState::QuotaExceeded);
        self.history.clear();
        wipe_account(
            self.users.as_ref(),
            self.assistants.as_ref(),
            &self.cleanup,
            &self.user_id,
            &self.assistant_id,
        )
        .await
    }

    /// Full remote thread, oldest first.
    pub async fn thread_messages(&self) -> AppResult<Vec<ChatMessage>> {
        if self.is_terminated() {
            return Err(AppError::Session("account has been terminated".into()));
        }
        Ok(self.assistants.list_messages(&self.thread_id, MessageOrder::Asc).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::errors::GatewayError;
    use crate::models::NewUser;
    use crate::services::memory_repository::InMemoryUserRepository;
    use crate::services::testing::FakeAssistantGateway;

    struct Fixture {
        users: Arc<InMemoryUserRepository>,
        assistants: Arc<FakeAssistantGateway>,
        user_id: String,
        assistant_id: String,
    }

    fn words(count: usize) -> String {
        vec!["word"; count].join(" ")
    }

    async fn fixture(username: &str) -> Fixture {
        let users = Arc::new(InMemoryUserRepository::new());
        let assistants = Arc::new(FakeAssistantGateway::new());
        let assistant_id = assistants.create_assistant().await.unwrap();
        let user_id = users
            .create_user(NewUser {
                username: username.into(),
                password_hash: "h".into(),
                assistant_id: assistant_id.clone(),
                limit: 3000,
            })
            .await
            .unwrap();
        Fixture { users, assistants, user_id, assistant_id }
    }

    async fn open(f: &Fixture, username: &str) -> ChatSession {
        ChatSession::open(
            f.users.clone(),
            f.assistants.clone(),
            CleanupPolicy { max_attempts: 3, retry_delay: Duration::ZERO },
            username,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_thread_once() {
        let f = fixture("alice").await;

        let first = open(&f, "alice").await;
        assert_eq!(first.state(), SessionState::AwaitingInput);
        assert_eq!(f.assistants.threads_created(), 1);

        let second = open(&f, "alice").await;
        assert_eq!(f.assistants.threads_created(), 1);
        assert_eq!(first.thread_id, second.thread_id);

        let user = f.users.find_by_id(&f.user_id).await.unwrap().unwrap();
        assert_eq!(user.thread_ids, vec![first.thread_id.clone()]);
    }

    #[tokio::test]
    async fn test_open_unknown_user_is_not_found() {
        let f = fixture("alice").await;
        let result = ChatSession::open(
            f.users.clone(),
            f.assistants.clone(),
            CleanupPolicy { max_attempts: 1, retry_delay: Duration::ZERO },
            "mallory",
        )
        .await;
        assert!(matches!(result, Err(AppError::Repository(RepositoryError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_alice_scenario() {
        let f = fixture("alice").await;
        let mut session = open(&f, "alice").await;

        f.assistants.queue_reply(words(20));
        let outcome = session.submit(&words(10)).await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Delivered { response: words(20), usage: 30, remaining: 2970 }
        );

        let user = f.users.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.usage, 30);
        assert_eq!(user.chat_history.len(), 2);
        assert_eq!(f.assistants.sends(), 1);

        // 2971 words against 2970 remaining: wiped before any send
        let outcome = session.submit(&words(2971)).await.unwrap();
        assert_eq!(outcome, TurnOutcome::QuotaExceeded { response: None, usage: 30 });
        assert_eq!(f.assistants.sends(), 1);
        assert!(session.is_terminated());
        assert!(f.users.find_by_username("alice").await.unwrap().is_none());
        assert!(!f.assistants.is_live(&f.assistant_id));
    }

    #[tokio::test]
    async fn test_prompt_exactly_filling_budget_is_sent_then_account_wiped() {
        let f = fixture("frank").await;
        let mut session = open(&f, "frank").await;
        f.users.increment_usage(&f.user_id, 2990).await.unwrap();

        f.assistants.queue_reply("");
        let outcome = session.submit(&words(10)).await.unwrap();

        assert_eq!(f.assistants.sends(), 1);
        assert_eq!(
            outcome,
            TurnOutcome::QuotaExceeded { response: Some(String::new()), usage: 3000 }
        );
        assert!(f.users.find_by_id(&f.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reply_reaching_limit_exactly_wipes_account() {
        let f = fixture("gina").await;
        let mut session = open(&f, "gina").await;
        f.users.increment_usage(&f.user_id, 2990).await.unwrap();

        f.assistants.queue_reply(words(9));
        let outcome = session.submit("one").await.unwrap();

        assert_eq!(outcome, TurnOutcome::QuotaExceeded { response: Some(words(9)), usage: 3000 });
        assert!(session.is_terminated());
        assert!(f.users.find_by_username("gina").await.unwrap().is_none());
        assert!(!f.assistants.is_live(&f.assistant_id));
    }

    #[tokio::test]
    async fn test_reply_one_short_of_limit_keeps_account() {
        let f = fixture("hank").await;
        let mut session = open(&f, "hank").await;
        f.users.increment_usage(&f.user_id, 2990).await.unwrap();

        f.assistants.queue_reply(words(8));
        let outcome = session.submit("one").await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Delivered { response: words(8), usage: 2999, remaining: 1 }
        );
        assert!(f.users.find_by_id(&f.user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_oversized_reply_is_delivered_then_account_wiped() {
        let f = fixture("grace").await;
        let mut session = open(&f, "grace").await;
        f.users.increment_usage(&f.user_id, 2950).await.unwrap();

        f.assistants.queue_reply(words(100));
        let outcome = session.submit(&words(5)).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::QuotaExceeded { response: Some(words(100)), usage: 3055 }
        );
        assert_eq!(f.assistants.sends(), 1);
        assert!(f.users.find_by_id(&f.user_id).await.unwrap().is_none());
        assert_eq!(f.assistants.deleted(), vec![f.assistant_id.clone()]);
    }

    #[tokio::test]
    async fn test_history_buffer_is_loaded_once() {
        let f = fixture("heidi").await;
        f.users
            .replace_history("heidi", &[ChatMessage::user("old"), ChatMessage::assistant("reply")])
            .await
            .unwrap();
        let mut session = open(&f, "heidi").await;
        assert_eq!(session.history().len(), 2);

        // Writes behind the session's back are not re-read
        f.users.replace_history("heidi", &[]).await.unwrap();
        f.assistants.queue_reply("fresh answer");
        session.submit("new question").await.unwrap();

        let user = f.users.find_by_id(&f.user_id).await.unwrap().unwrap();
        assert_eq!(user.chat_history.len(), 4);
        assert_eq!(user.chat_history[0], ChatMessage::user("old"));
        assert_eq!(user.chat_history[3], ChatMessage::assistant("fresh answer"));
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_usage_untouched() {
        let f = fixture("ivan").await;
        let mut session = open(&f, "ivan").await;

        f.assistants.queue_failure(GatewayError::Generation("run failed".into()));
        let result = session.submit("hello there").await;

        assert!(matches!(result, Err(AppError::Gateway(GatewayError::Generation(_)))));
        assert_eq!(session.state(), SessionState::AwaitingInput);
        assert!(session.history().is_empty());
        let user = f.users.find_by_id(&f.user_id).await.unwrap().unwrap();
        assert_eq!(user.usage, 0);

        // The session recovers for the next turn
        f.assistants.queue_reply("back online");
        assert!(matches!(
            session.submit("again").await.unwrap(),
            TurnOutcome::Delivered { usage: 3, .. }
        ));

        let user = f.users.find_by_id(&f.user_id).await.unwrap().unwrap();
        assert_eq!(
            user.chat_history,
            vec![ChatMessage::user("again"), ChatMessage::assistant("back online")]
        );
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected_without_side_effects() {
        let f = fixture("judy").await;
        let mut session = open(&f, "judy").await;

        assert!(matches!(session.submit("   ").await, Err(AppError::Validation(_))));
        assert_eq!(f.assistants.sends(), 0);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_terminated_session_refuses_further_turns() {
        let f = fixture("kim").await;
        let mut session = open(&f, "kim").await;

        let report = session.wipe().await.unwrap();
        assert!(report.is_complete());

        assert!(matches!(session.submit("hello").await, Err(AppError::Session(_))));
        assert!(matches!(session.thread_messages().await, Err(AppError::Session(_))));
        assert_eq!(f.assistants.sends(), 0);
        assert!(f.users.find_by_username("kim").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_thread_messages_lists_oldest_first() {
        let f = fixture("leo").await;
        let mut session = open(&f, "leo").await;
        f.assistants.queue_reply("pong");
        session.submit("ping").await.unwrap();

        let messages = session.thread_messages().await.unwrap();
        assert_eq!(messages, vec![ChatMessage::user("ping"), ChatMessage::assistant("pong")]);
    }

    #[tokio::test]
    async fn test_usage_never_exceeds_limit_while_account_exists() {
        let f = fixture("mia").await;
        let mut session = open(&f, "mia").await;

        for _ in 0..200 {
            f.assistants.queue_reply(words(17));
            match session.submit(&words(13)).await.unwrap() {
                TurnOutcome::Delivered { usage, .. } => assert!(usage < 3000),
                TurnOutcome::QuotaExceeded { .. } => break,
            }
        }

        assert!(session.is_terminated());
        assert!(f.users.find_by_id(&f.user_id).await.unwrap().is_none());
        assert!(!f.assistants.is_live(&f.assistant_id));
    }
}
