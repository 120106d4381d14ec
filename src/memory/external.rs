//! External memory sidecar.
//!
//! When configured, memory saves and searches are mirrored to an external
//! provider (a mem0-style service) with identical semantics. Sidecar
//! failures are logged and never affect the primary path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Provider interface an external memory service implements.
#[async_trait]
pub trait ExternalMemoryProvider: Send + Sync {
    async fn save(
        &self,
        user_id: &str,
        value: &str,
        metadata: &HashMap<String, Value>,
    ) -> Result<(), anyhow::Error>;

    /// Results share the local shape: `{"id", "content", "metadata", "score"}`.
    async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, anyhow::Error>;
}

/// Mirror wrapper the memory facade talks to.
pub struct ExternalMemory {
    provider: Arc<dyn ExternalMemoryProvider>,
    user_id: String,
}

impl ExternalMemory {
    pub fn new(provider: Arc<dyn ExternalMemoryProvider>, user_id: impl Into<String>) -> Self {
        Self {
            provider,
            user_id: user_id.into(),
        }
    }

    /// Best-effort save; a provider failure is logged and swallowed.
    pub async fn mirror_save(&self, value: &str, metadata: &HashMap<String, Value>) {
        if let Err(error) = self.provider.save(&self.user_id, value, metadata).await {
            log::warn!("external memory save failed: {}", error);
        }
    }

    /// Best-effort search; a provider failure yields no hits.
    pub async fn mirror_search(&self, query: &str, limit: usize) -> Vec<Value> {
        match self.provider.search(&self.user_id, query, limit).await {
            Ok(hits) => hits,
            Err(error) => {
                log::warn!("external memory search failed: {}", error);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// In-process provider used by tests.
    #[derive(Default)]
    pub struct RecordingProvider {
        pub entries: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl ExternalMemoryProvider for RecordingProvider {
        async fn save(
            &self,
            user_id: &str,
            value: &str,
            _metadata: &HashMap<String, Value>,
        ) -> Result<(), anyhow::Error> {
            if self.fail {
                anyhow::bail!("provider offline");
            }
            self.entries
                .lock()
                .push((user_id.to_string(), value.to_string()));
            Ok(())
        }

        async fn search(
            &self,
            _user_id: &str,
            query: &str,
            limit: usize,
        ) -> Result<Vec<Value>, anyhow::Error> {
            if self.fail {
                anyhow::bail!("provider offline");
            }
            Ok(self
                .entries
                .lock()
                .iter()
                .filter(|(_, value)| value.contains(query))
                .take(limit)
                .enumerate()
                .map(|(i, (_, value))| {
                    serde_json::json!({
                        "id": format!("external-{}", i),
                        "content": value,
                        "metadata": {},
                        "score": 0.5,
                    })
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingProvider;
    use super::*;

    #[tokio::test]
    async fn mirror_save_and_search_round_trip() {
        let provider = Arc::new(RecordingProvider::default());
        let external = ExternalMemory::new(provider.clone(), "okami_system");
        external
            .mirror_save("remember the retry policy", &HashMap::new())
            .await;
        let hits = external.mirror_search("retry policy", 5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(provider.entries.lock().len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_is_swallowed() {
        let provider = Arc::new(RecordingProvider {
            fail: true,
            ..Default::default()
        });
        let external = ExternalMemory::new(provider, "okami_system");
        // Neither call panics or errors.
        external.mirror_save("anything", &HashMap::new()).await;
        assert!(external.mirror_search("anything", 5).await.is_empty());
    }
}
