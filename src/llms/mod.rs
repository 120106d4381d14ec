//! Completer capability: prompt in, text out.
//!
//! The core never talks to a provider SDK directly. Anything that can turn
//! a message list into text implements [`Completer`]; the tool-call
//! subprotocol rides on top of the returned text (a reply that is a JSON
//! object with `tool` and `args` keys is a tool call, anything else is a
//! terminal answer).

pub mod providers;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace::UsageMetrics;

/// Role of one conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message in a completer conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleterMessage {
    pub role: MessageRole,
    pub content: String,
}

impl CompleterMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A completer reply plus its token accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: UsageMetrics,
}

impl Completion {
    /// Completion with usage estimated from text lengths (4 chars ≈ 1 token).
    pub fn with_estimated_usage(text: String, prompt: &[CompleterMessage]) -> Self {
        let prompt_chars: usize = prompt.iter().map(|m| m.content.len()).sum();
        let usage = UsageMetrics {
            prompt_tokens: (prompt_chars / 4) as u64,
            completion_tokens: (text.len() / 4) as u64,
            successful_requests: 1,
        };
        Self { text, usage }
    }
}

/// Completer failures, split by retry semantics.
#[derive(Debug, Error)]
pub enum CompleterError {
    /// Timeout, connection reset, 5xx-class. Retried with backoff.
    #[error("transient: {0}")]
    Transient(String),
    /// Auth, quota, malformed request. Propagates immediately.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Prompt to text capability.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, messages: &[CompleterMessage]) -> Result<Completion, CompleterError>;
}

/// A parsed completer reply: either a terminal answer or a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    Text(String),
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
}

/// Interpret a completer reply under the tool-call subprotocol.
///
/// A reply counts as a tool call when its JSON payload (bare, or inside a
/// fenced ```json block) is an object with a string `tool` key and an
/// object `args` key. Everything else is terminal text.
pub fn parse_reply(text: &str) -> ParsedReply {
    let candidate = extract_json_candidate(text);
    if let Some(candidate) = candidate {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&candidate) {
            if let Some(obj) = value.as_object() {
                if let Some(tool) = obj.get("tool").and_then(|t| t.as_str()) {
                    let args = obj.get("args").cloned().unwrap_or_else(
                        || serde_json::Value::Object(serde_json::Map::new()),
                    );
                    if args.is_object() {
                        return ParsedReply::ToolCall {
                            tool: tool.to_string(),
                            args,
                        };
                    }
                }
            }
        }
    }
    ParsedReply::Text(text.to_string())
}

/// Pull the first JSON object out of a reply, tolerating fenced code blocks
/// and surrounding prose.
fn extract_json_candidate(text: &str) -> Option<String> {
    let trimmed = text.trim();

    let body = if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        match after.find("```") {
            Some(end) => after[..end].trim(),
            None => after.trim(),
        }
    } else {
        trimmed
    };

    let open = body.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in body[open..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(body[open..open + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
