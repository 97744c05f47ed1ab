// Long-term memory capability
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::Result;

/// Opaque long-term key/value store, injected into the runtime.
///
/// The core only touches it on shutdown (persisting learned state) and on
/// GM start (recalling it); one GM owns one namespace.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Total, idempotent overwrite.
    async fn store(&self, namespace: &str, key: &str, value: serde_json::Value) -> Result<()>;

    async fn recall(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>>;
}

/// In-process store backing tests and the demo; deployments inject their own.
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<(String, String), serde_json::Value>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, namespace: &str, key: &str, value: serde_json::Value) -> Result<()> {
        debug!("Storing {}/{}", namespace, key);
        self.entries
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn recall(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|v| v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_recall_roundtrip() -> Result<()> {
        let store = InMemoryStore::new();
        assert!(store.recall("gm", "learning").await?.is_none());

        store
            .store("gm", "learning", serde_json::json!({"degree": 0.5}))
            .await?;
        let got = store.recall("gm", "learning").await?.expect("stored");
        assert_eq!(got["degree"], 0.5);

        // Overwrite is idempotent and total.
        store
            .store("gm", "learning", serde_json::json!({"degree": 0.75}))
            .await?;
        let got = store.recall("gm", "learning").await?.expect("stored");
        assert_eq!(got["degree"], 0.75);
        Ok(())
    }

    #[tokio::test]
    async fn namespaces_are_disjoint() -> Result<()> {
        let store = InMemoryStore::new();
        store.store("a", "k", serde_json::json!(1)).await?;
        assert!(store.recall("b", "k").await?.is_none());
        Ok(())
    }
}
