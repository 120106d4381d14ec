//! Typed engine configuration.
//!
//! Every recognized option has an explicit field; unknown keys in a
//! deserialized document produce a warning and are otherwise ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::process::Process;

/// Memory provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryProvider {
    /// Local tiers only.
    #[default]
    Basic,
    /// Local tiers mirrored to a mem0-style external sidecar.
    Mem0,
}

/// Memory layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub provider: MemoryProvider,
    pub user_id: Option<String>,
    /// Ring capacity per run for short-term entries.
    pub short_term_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            provider: MemoryProvider::Basic,
            user_id: None,
            short_term_window: 64,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "hash-256".to_string(),
            base_url: None,
        }
    }
}

/// One entry of the ordered guardrail pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailEntry {
    /// One of `quality`, `relevance`, `safety`, `hallucination`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

/// Completer rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Default bucket size for agents without an explicit `max_rpm`. 0 = unlimited.
    pub max_rpm_default: u32,
    /// How long a call may wait on the bucket before failing.
    pub rpm_wait_budget_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_rpm_default: 0,
            rpm_wait_budget_ms: 30_000,
        }
    }
}

/// Evolution pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub enabled: bool,
    /// Cap on changes applied per evolution run; surplus entries become proposals.
    pub max_changes: usize,
    pub auto_apply: bool,
    /// Cosine similarity above which a knowledge addition is a duplicate.
    pub dedup_threshold: f64,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_changes: 10,
            auto_apply: true,
            dedup_threshold: 0.92,
        }
    }
}

/// Retry budgets by call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Transport retries for transient completer failures.
    pub completer: u32,
    /// Transport retries for tool dispatch.
    pub tool: u32,
    /// Default task retry budget when a guardrail rejects.
    pub guardrail: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            completer: 5,
            tool: 5,
            guardrail: 3,
        }
    }
}

/// Deadlines in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub task_ms: u64,
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            task_ms: 300_000,
            request_ms: 600_000,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bounded capacity of the request queue; excess requests fail fast.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            queue_capacity: 64,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OkamiConfig {
    pub process_type: Process,
    /// Required when `process_type` is hierarchical.
    pub manager_agent: Option<String>,
    /// Cap on recursive delegation depth.
    pub max_delegation_depth: u32,
    pub memory_enabled: bool,
    pub memory_config: MemoryConfig,
    pub embedder: EmbedderConfig,
    /// Ordered guardrail pipeline applied to every task without its own refs.
    pub guardrails: Vec<GuardrailEntry>,
    pub rate_limits: RateLimitConfig,
    pub evolution: EvolutionConfig,
    pub retries: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub server: ServerConfig,
    /// Root of the knowledge corpus.
    pub knowledge_dir: String,
}

impl Default for OkamiConfig {
    fn default() -> Self {
        Self {
            process_type: Process::default(),
            manager_agent: None,
            max_delegation_depth: 3,
            memory_enabled: true,
            memory_config: MemoryConfig::default(),
            embedder: EmbedderConfig::default(),
            guardrails: Vec::new(),
            rate_limits: RateLimitConfig::default(),
            evolution: EvolutionConfig::default(),
            retries: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            server: ServerConfig::default(),
            knowledge_dir: "knowledge".to_string(),
        }
    }
}

impl OkamiConfig {
    /// Field names accepted at the top level of a configuration document.
    const KNOWN_KEYS: &'static [&'static str] = &[
        "process_type",
        "manager_agent",
        "max_delegation_depth",
        "memory_enabled",
        "memory_config",
        "embedder",
        "guardrails",
        "rate_limits",
        "evolution",
        "retries",
        "timeouts",
        "server",
        "knowledge_dir",
    ];

    /// Build a configuration from a JSON document, warning on unknown keys.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if let Value::Object(ref map) = value {
            for key in map.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    log::warn!("ignoring unknown configuration key '{}'", key);
                }
            }
        }
        serde_json::from_value(value)
    }

    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("OKAMI_PROCESS_TYPE") {
            match v.parse() {
                Ok(p) => config.process_type = p,
                Err(e) => log::warn!("OKAMI_PROCESS_TYPE: {}", e),
            }
        }
        if let Ok(v) = std::env::var("OKAMI_MANAGER_AGENT") {
            config.manager_agent = Some(v);
        }
        if let Ok(v) = std::env::var("OKAMI_KNOWLEDGE_DIR") {
            config.knowledge_dir = v;
        }
        if let Ok(v) = std::env::var("OKAMI_MEMORY_ENABLED") {
            config.memory_enabled = v != "false" && v != "0";
        }
        if let Ok(v) = std::env::var("OKAMI_EVOLUTION_ENABLED") {
            config.evolution.enabled = v != "false" && v != "0";
        }
        if let Ok(v) = std::env::var("OKAMI_SERVER_PORT") {
            match v.parse() {
                Ok(port) => config.server.port = port,
                Err(_) => log::warn!("OKAMI_SERVER_PORT is not a port number: {}", v),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = OkamiConfig::default();
        assert_eq!(config.evolution.max_changes, 10);
        assert!((config.evolution.dedup_threshold - 0.92).abs() < f64::EPSILON);
        assert_eq!(config.retries.completer, 5);
        assert_eq!(config.memory_config.short_term_window, 64);
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let doc = serde_json::json!({
            "process_type": "hierarchical",
            "manager_agent": "lead",
            "totally_unknown_option": 42,
        });
        let config = OkamiConfig::from_value(doc).unwrap();
        assert_eq!(config.process_type, Process::Hierarchical);
        assert_eq!(config.manager_agent.as_deref(), Some("lead"));
    }

    #[test]
    fn guardrail_entries_deserialize_with_params() {
        let doc = serde_json::json!({
            "guardrails": [
                {"type": "quality", "params": {"min_chars": 40}},
                {"type": "relevance", "params": {"min_relevance": 0.8}},
            ],
        });
        let config = OkamiConfig::from_value(doc).unwrap();
        assert_eq!(config.guardrails.len(), 2);
        assert_eq!(config.guardrails[0].kind, "quality");
    }
}
