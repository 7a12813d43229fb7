use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use crate::config::{OpenAiConfig, PollingConfig};
use crate::errors::{GatewayError, GatewayResult};
use crate::models::{ChatMessage, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrder {
    Asc,
    Desc,
}

impl MessageOrder {
    fn as_str(self) -> &'static str {
        match self {
            MessageOrder::Asc => "asc",
            MessageOrder::Desc => "desc",
        }
    }
}

/// Outcome of a completed generation run.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    /// Whole thread, newest first.
    pub messages: Vec<ChatMessage>,
}

/// Boundary to the hosted assistant provider.
#[async_trait]
pub trait AssistantGateway: Send + Sync {
    async fn create_assistant(&self) -> GatewayResult<String>;

    /// Remote errors surface as-is, including 404 for an assistant that is already gone.
    async fn delete_assistant(&self, assistant_id: &str) -> GatewayResult<()>;

    async fn create_thread(&self) -> GatewayResult<String>;

    /// Appends `message` as a user turn, runs the assistant and waits for the run to finish.
    async fn send_and_await(
        &self,
        thread_id: &str,
        assistant_id: &str,
        message: &str,
    ) -> GatewayResult<Reply>;

    async fn list_messages(&self, thread_id: &str, order: MessageOrder) -> GatewayResult<Vec<ChatMessage>>;
}

// ============================================================================
// Provider API types
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateAssistantRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ObjectId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DeletionStatus {
    id: String,
    deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct RunError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    id: String,
    status: RunStatus,
    last_error: Option<RunError>,
}

impl Run {
    // None while the run is still going.
    fn outcome(&self) -> Option<GatewayResult<()>> {
        match self.status {
            RunStatus::Completed => Some(Ok(())),
            RunStatus::Failed
            | RunStatus::Cancelled
            | RunStatus::Expired
            | RunStatus::Incomplete
            | RunStatus::RequiresAction => {
                let reason = match &self.last_error {
                    Some(err) => format!("run {} {:?}: {} ({})", self.id, self.status, err.message, err.code),
                    None => format!("run {} ended as {:?}", self.id, self.status),
                };
                Some(Err(GatewayError::Generation(reason)))
            }
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling | RunStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: TextContent },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: Role,
    content: Vec<ContentPart>,
}

impl ThreadMessage {
    fn into_chat_message(self) -> ChatMessage {
        let content = self
            .content
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.value),
                ContentPart::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        ChatMessage { role: self.role, content }
    }
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
    #[serde(default)]
    has_more: bool,
    last_id: Option<String>,
}

/// Newest assistant text in a thread listed newest first.
fn latest_assistant_text(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.content.clone())
}

// ============================================================================
// Hosted Assistants API client
// ============================================================================

pub struct OpenAiAssistantGateway {
    client: reqwest::Client,
    base_url: String,
    model: String,
    instructions: String,
    name: String,
    polling: PollingConfig,
}

impl OpenAiAssistantGateway {
    pub fn new(openai: &OpenAiConfig, polling: &PollingConfig) -> GatewayResult<Self> {
        if openai.api_key.trim().is_empty() {
            return Err(GatewayError::Credential("No API key provided!".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("openai-beta", HeaderValue::from_static("assistants=v2"));
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", openai.api_key.trim()))
            .map_err(|_| GatewayError::Credential("API key contains invalid characters".into()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(openai.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: openai.base_url.trim_end_matches('/').to_string(),
            model: openai.model.clone(),
            instructions: openai.instructions.clone(),
            name: openai.assistant_name.clone(),
            polling: polling.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> GatewayResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api { status: status.as_u16(), body });
        }
        Ok(response.json::<T>().await?)
    }

    async fn post_message(&self, thread_id: &str, message: &str) -> GatewayResult<()> {
        let response = self
            .client
            .post(self.url(&format!("threads/{}/messages", thread_id)))
            .json(&CreateMessageRequest { role: "user", content: message })
            .send()
            .await?;
        let _: ObjectId = Self::decode(response).await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> GatewayResult<Run> {
        let response = self
            .client
            .post(self.url(&format!("threads/{}/runs", thread_id)))
            .json(&CreateRunRequest { assistant_id })
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> GatewayResult<Run> {
        let response = self
            .client
            .get(self.url(&format!("threads/{}/runs/{}", thread_id, run_id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    // An abandoned active run would block further messages on the thread.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) {
        let result = self
            .client
            .post(self.url(&format!("threads/{}/runs/{}/cancel", thread_id, run_id)))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!("Cancelled run {} on thread {}", run_id, thread_id);
            }
            Ok(response) => {
                tracing::warn!("Cancelling run {} returned {}", run_id, response.status());
            }
            Err(e) => tracing::warn!("Failed to cancel run {}: {}", run_id, e),
        }
    }

    /// Polls with exponential backoff until the run finishes or the wait budget is spent.
    async fn await_run(&self, thread_id: &str, mut run: Run) -> GatewayResult<()> {
        let deadline = Instant::now() + self.polling.max_wait();
        let mut interval = self.polling.initial_interval();

        loop {
            if let Some(outcome) = run.outcome() {
                return outcome;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::error!(
                    "Run {} on thread {} still {:?} after {} seconds",
                    run.id,
                    thread_id,
                    run.status,
                    self.polling.max_wait_secs
                );
                self.cancel_run(thread_id, &run.id).await;
                return Err(GatewayError::Timeout(self.polling.max_wait_secs));
            }

            sleep(interval.min(deadline - now)).await;
            interval = self.polling.next_interval(interval);

            run = self.retrieve_run(thread_id, &run.id).await?;
            tracing::debug!("Run {} status: {:?}", run.id, run.status);
        }
    }
}

#[async_trait]
impl AssistantGateway for OpenAiAssistantGateway {
    async fn create_assistant(&self) -> GatewayResult<String> {
        let response = self
            .client
            .post(self.url("assistants"))
            .json(&CreateAssistantRequest {
                model: &self.model,
                instructions: &self.instructions,
                name: &self.name,
            })
            .send()
            .await?;
        let assistant: ObjectId = Self::decode(response).await?;
        tracing::info!("Created assistant {}", assistant.id);
        Ok(assistant.id)
    }

    async fn delete_assistant(&self, assistant_id: &str) -> GatewayResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("assistants/{}", assistant_id)))
            .send()
            .await?;
        let status: DeletionStatus = Self::decode(response).await?;
        if !status.deleted {
            return Err(GatewayError::Malformed(format!("assistant {} was not deleted", status.id)));
        }
        tracing::info!("Deleted assistant {}", assistant_id);
        Ok(())
    }

    async fn create_thread(&self) -> GatewayResult<String> {
        let response = self
            .client
            .post(self.url("threads"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let thread: ObjectId = Self::decode(response).await?;
        tracing::info!("Created thread {}", thread.id);
        Ok(thread.id)
    }

    async fn send_and_await(
        &self,
        thread_id: &str,
        assistant_id: &str,
        message: &str,
    ) -> GatewayResult<Reply> {
        self.post_message(thread_id, message).await?;

        // The message is added once; only the run is retried.
        let mut retries = 0;
        loop {
            let run = self.create_run(thread_id, assistant_id).await?;
            tracing::debug!("Started run {} on thread {}", run.id, thread_id);

            match self.await_run(thread_id, run).await {
                Ok(()) => break,
                Err(GatewayError::Generation(reason)) if retries < self.polling.generation_retries => {
                    retries += 1;
                    tracing::warn!(
                        "Generation failed on thread {} ({}), retry {}/{}",
                        thread_id,
                        reason,
                        retries,
                        self.polling.generation_retries
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let messages = self.list_messages(thread_id, MessageOrder::Desc).await?;
        let text = latest_assistant_text(&messages)
            .ok_or_else(|| GatewayError::Malformed(format!("thread {} has no assistant reply", thread_id)))?;
        Ok(Reply { text, messages })
    }

    async fn list_messages(&self, thread_id: &str, order: MessageOrder) -> GatewayResult<Vec<ChatMessage>> {
        let mut messages = Vec::new();
        let mut after: Option<String> = None;
        let pages = self.polling.max_message_pages.max(1);

        for _ in 0..pages {
            let mut request = self
                .client
                .get(self.url(&format!("threads/{}/messages", thread_id)))
                .query(&[("order", order.as_str()), ("limit", "100")]);
            if let Some(cursor) = &after {
                request = request.query(&[("after", cursor.as_str())]);
            }

            let page: MessageList = Self::decode(request.send().await?).await?;
            messages.extend(page.data.into_iter().map(ThreadMessage::into_chat_message));

            match (page.has_more, page.last_id) {
                (true, Some(last_id)) => after = Some(last_id),
                _ => return Ok(messages),
            }
        }

        tracing::warn!(
            "Thread {} has more than {} pages of messages, listing truncated",
            thread_id,
            pages
        );
        Ok(messages)
    }
}
