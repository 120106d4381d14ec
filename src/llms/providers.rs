//! Built-in completer implementations.
//!
//! Real provider SDKs live outside the core and plug in through the
//! [`Completer`] trait. The two implementations here cover local operation:
//! [`ScriptedCompleter`] replays a fixed sequence of replies (deterministic
//! runs and tests), [`EchoCompleter`] acknowledges the prompt without any
//! model behind it.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::llms::{Completer, CompleterError, CompleterMessage, Completion, MessageRole};

/// Replays a programmed sequence of replies, one per call.
///
/// Optionally fails the first N calls with a transient error, or every call
/// with a fatal one. Once the script is exhausted, further calls fail
/// transiently.
pub struct ScriptedCompleter {
    replies: Mutex<VecDeque<String>>,
    transient_failures: Mutex<u32>,
    fatal: Option<String>,
    calls: Mutex<Vec<Vec<CompleterMessage>>>,
}

impl ScriptedCompleter {
    pub fn new<S: Into<String>>(replies: Vec<S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            transient_failures: Mutex::new(0),
            fatal: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `count` calls with a transient error before serving
    /// the scripted replies.
    pub fn failing_first(self, count: u32) -> Self {
        *self.transient_failures.lock() = count;
        self
    }

    /// A completer that always fails fatally with the given message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            transient_failures: Mutex::new(0),
            fatal: Some(message.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Message lists of every call made so far, for assertions.
    pub fn recorded_calls(&self) -> Vec<Vec<CompleterMessage>> {
        self.calls.lock().clone()
    }

    /// Number of completer calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, messages: &[CompleterMessage]) -> Result<Completion, CompleterError> {
        self.calls.lock().push(messages.to_vec());

        if let Some(message) = &self.fatal {
            return Err(CompleterError::Fatal(message.clone()));
        }

        {
            let mut failures = self.transient_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(CompleterError::Transient("scripted transient failure".into()));
            }
        }

        match self.replies.lock().pop_front() {
            Some(text) => Ok(Completion::with_estimated_usage(text, messages)),
            None => Err(CompleterError::Transient("script exhausted".into())),
        }
    }
}

/// Acknowledges the last user message. Useful as a no-model default so the
/// server stays operable without provider credentials.
#[derive(Debug, Default, Clone)]
pub struct EchoCompleter;

#[async_trait]
impl Completer for EchoCompleter {
    async fn complete(&self, messages: &[CompleterMessage]) -> Result<Completion, CompleterError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let excerpt: String = last_user.chars().take(200).collect();
        Ok(Completion::with_estimated_usage(
            format!("Acknowledged. No completer provider is configured; the request was: {}", excerpt),
            messages,
        ))
    }
}
