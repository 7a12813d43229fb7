// Scripted assistant provider for unit tests.
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use crate::errors::{GatewayError, GatewayResult};
use crate::models::ChatMessage;
use super::assistant_gateway::{AssistantGateway, MessageOrder, Reply};

#[derive(Default)]
pub struct FakeAssistantGateway {
    replies: Mutex<VecDeque<GatewayResult<String>>>,
    threads: Mutex<HashMap<String, Vec<ChatMessage>>>,
    live_assistants: Mutex<Vec<String>>,
    deleted_assistants: Mutex<Vec<String>>,
    delete_failures: AtomicUsize,
    next_id: AtomicUsize,
    sends: AtomicUsize,
}

impl FakeAssistantGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_reply(&self, text: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(text.into()));
    }

    pub fn queue_failure(&self, error: GatewayError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// The next `count` deletions fail with a transient server error.
    pub fn fail_next_deletes(&self, count: usize) {
        self.delete_failures.store(count, Ordering::SeqCst);
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn threads_created(&self) -> usize {
        self.threads.lock().unwrap().len()
    }

    pub fn is_live(&self, assistant_id: &str) -> bool {
        self.live_assistants.lock().unwrap().iter().any(|a| a == assistant_id)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted_assistants.lock().unwrap().clone()
    }

    fn next(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl AssistantGateway for FakeAssistantGateway {
    async fn create_assistant(&self) -> GatewayResult<String> {
        let id = self.next("asst");
        self.live_assistants.lock().unwrap().push(id.clone());
        Ok(id)
    }

    async fn delete_assistant(&self, assistant_id: &str) -> GatewayResult<()> {
        let pending = self.delete_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.delete_failures.store(pending - 1, Ordering::SeqCst);
            return Err(GatewayError::Api { status: 500, body: "temporarily unavailable".into() });
        }

        let mut live = self.live_assistants.lock().unwrap();
        match live.iter().position(|a| a == assistant_id) {
            Some(index) => {
                live.remove(index);
                self.deleted_assistants.lock().unwrap().push(assistant_id.to_string());
                Ok(())
            }
            None => Err(GatewayError::Api { status: 404, body: "No assistant found".into() }),
        }
    }

    async fn create_thread(&self) -> GatewayResult<String> {
        let id = self.next("thread");
        self.threads.lock().unwrap().insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn send_and_await(
        &self,
        thread_id: &str,
        _assistant_id: &str,
        message: &str,
    ) -> GatewayResult<Reply> {
        self.sends.fetch_add(1, Ordering::SeqCst);

        let mut threads = self.threads.lock().unwrap();
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| GatewayError::Api { status: 404, body: "No thread found".into() })?;
        thread.push(ChatMessage::user(message));

        let next = self.replies.lock().unwrap().pop_front();
        let text = next.unwrap_or_else(|| Ok("ok".to_string()))?;
        thread.push(ChatMessage::assistant(text.clone()));

        Ok(Reply {
            text,
            messages: thread.iter().rev().cloned().collect(),
        })
    }

    async fn list_messages(&self, thread_id: &str, order: MessageOrder) -> GatewayResult<Vec<ChatMessage>> {
        let threads = self.threads.lock().unwrap();
        let thread = threads
            .get(thread_id)
            .ok_or_else(|| GatewayError::Api { status: 404, body: "No thread found".into() })?;
        Ok(match order {
            MessageOrder::Asc => thread.clone(),
            MessageOrder::Desc => thread.iter().rev().cloned().collect(),
        })
    }
}
