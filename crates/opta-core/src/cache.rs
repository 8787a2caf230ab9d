//! Session-scoped result cache for read-only tool outputs.
//!
//! Coherence is deliberately coarse: any write-classified call empties the
//! whole cache, since a mutation could invalidate any prior read. Entries
//! live only for the session process lifetime.

use std::collections::HashMap;

use tokio::sync::Mutex;

/// Cache of `(tool name, raw args JSON) -> prior output`.
///
/// Keys use the exact argument JSON string the model sent; two semantically
/// equal but differently-formatted argument objects are distinct entries.
pub struct ResultCache {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, tool: &str, args_json: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(&(tool.to_string(), args_json.to_string()))
            .cloned()
    }

    pub async fn insert(&self, tool: &str, args_json: &str, output: String) {
        let mut entries = self.entries.lock().await;
        entries.insert((tool.to_string(), args_json.to_string()), output);
    }

    /// Flush everything. Called before any write-classified tool runs.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        if !entries.is_empty() {
            tracing::debug!(flushed = entries.len(), "Result cache cleared by write");
        }
        entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exact_key_lookup() {
        let cache = ResultCache::new();
        cache.insert("read", r#"{"path":"a.rs"}"#, "content".into()).await;

        assert_eq!(
            cache.get("read", r#"{"path":"a.rs"}"#).await.as_deref(),
            Some("content")
        );
        // Different formatting of the same object is a different key.
        assert!(cache.get("read", r#"{ "path": "a.rs" }"#).await.is_none());
        assert!(cache.get("list", r#"{"path":"a.rs"}"#).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_empties_everything() {
        let cache = ResultCache::new();
        cache.insert("read", "{}", "one".into()).await;
        cache.insert("grep", r#"{"q":"x"}"#, "two".into()).await;
        assert_eq!(cache.len().await, 2);

        cache.clear().await;
        assert!(cache.is_empty().await);
        assert!(cache.get("read", "{}").await.is_none());
    }
}
