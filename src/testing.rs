//! Fake models shared by unit tests.

use crate::error::{EvalError, Result};
use crate::llm::ChatModel;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) use crate::schema::tests::valid_output;

/// Replies with queued texts in order; errors when the queue is empty.
pub(crate) struct Scripted {
    pub replies: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for Scripted {
    async fn generate(&self, _system: &str, user: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(user.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| EvalError::Transport("no more replies".into()))
    }
}

/// Maps each user prompt to a reply with a closure and counts calls.
pub(crate) struct FakeModel {
    pub handler: Box<dyn Fn(&str) -> String + Send + Sync>,
    pub calls: AtomicUsize,
}

impl FakeModel {
    pub fn new(handler: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers with the same text.
    pub fn constant(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| reply.clone())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for FakeModel {
    async fn generate(&self, _system: &str, user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.handler)(user))
    }
}

/// A schema-valid coach reply.
pub(crate) fn valid_json() -> String {
    serde_json::to_string(&valid_output()).unwrap()
}
