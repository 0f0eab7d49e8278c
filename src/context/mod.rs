//! Per-request user context assembly
//!
//! Builds the session context that personalises classification: recent
//! interaction history and the domain preferences derived from it. The
//! builder is strictly read-only; history appends happen after the pipeline
//! completes, owned by the service.

use crate::cache::TtlCache;
use crate::config::ContextConfig;
use crate::storage::{HistoryStore, InteractionRecord};
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable per-request user/session context
///
/// Built fresh for every request and never retained past its completion.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub session_id: String,
    /// Most recent interactions, newest first, bounded by history_limit
    pub history: Vec<InteractionRecord>,
    /// Domains ranked by historical frequency, ties broken most-recent-first
    pub domain_preferences: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    /// False when the history store was unreachable and the context degraded
    /// to empty history
    pub personalised: bool,
}

/// Truncate a query to `max_len` characters, respecting char boundaries
///
/// Over-long queries are truncated rather than rejected; the pipeline runs on
/// the truncated text.
pub fn truncate_query(query: &str, max_len: usize) -> &str {
    match query.char_indices().nth(max_len) {
        Some((idx, _)) => &query[..idx],
        None => query,
    }
}

/// Builds a [`UserContext`] from the history store, through a TTL cache
pub struct ContextBuilder {
    store: Arc<HistoryStore>,
    cache: Arc<TtlCache<Vec<InteractionRecord>>>,
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(
        store: Arc<HistoryStore>,
        cache: Arc<TtlCache<Vec<InteractionRecord>>>,
        config: ContextConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Maximum accepted query length, in characters
    pub fn max_query_len(&self) -> usize {
        self.config.max_query_len
    }

    /// Assemble the context for one request
    ///
    /// A store outage is not an error: the context degrades to empty history
    /// and `personalised = false`, and the pipeline continues without
    /// personalisation.
    pub fn build(&self, user_id: &str, session_id: &str, query: &str) -> UserContext {
        let query = truncate_query(query, self.config.max_query_len);

        let (history, personalised) = self.fetch_history(user_id);
        let domain_preferences = derive_preferences(&history, self.config.preference_limit);

        let mut metadata = BTreeMap::new();
        metadata.insert("built_at".to_string(), chrono::Utc::now().to_rfc3339());
        metadata.insert(
            "query_fingerprint".to_string(),
            blake3::hash(query.as_bytes()).to_hex().to_string(),
        );
        metadata.insert(
            "interaction_count".to_string(),
            history.len().to_string(),
        );
        if let Some(started) = history
            .iter()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.created_at)
            .min()
        {
            metadata.insert("session_started_at".to_string(), started.to_string());
        }

        UserContext {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            history,
            domain_preferences,
            metadata,
            personalised,
        }
    }

    fn fetch_history(&self, user_id: &str) -> (Vec<InteractionRecord>, bool) {
        if let Some(cached) = self.cache.get(user_id) {
            return (cached, true);
        }

        match self.store.recent(user_id, self.config.history_limit) {
            Ok(history) => {
                self.cache.put(user_id, history.clone());
                (history, true)
            }
            Err(e) => {
                tracing::warn!(
                    "History store unavailable for {}, degrading to empty context: {}",
                    user_id,
                    e
                );
                (Vec::new(), false)
            }
        }
    }
}

/// Count domain tags across history and rank them
///
/// Most frequent first; ties broken by most-recent-first occurrence (history
/// is ordered newest first).
fn derive_preferences(history: &[InteractionRecord], limit: usize) -> Vec<String> {
    let mut counts: AHashMap<&str, (usize, usize)> = AHashMap::new();

    for (position, record) in history.iter().enumerate() {
        for domain in &record.domains {
            let entry = counts.entry(domain.as_str()).or_insert((0, position));
            entry.0 += 1;
        }
    }

    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(domain, (count, first_seen))| (domain, count, first_seen))
        .collect();

    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked
        .into_iter()
        .take(limit)
        .map(|(domain, _, _)| domain.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> ContextConfig {
        ContextConfig {
            history_limit: 10,
            max_query_len: 64,
            preference_limit: 5,
        }
    }

    fn record(query: &str, session: &str, domains: &[&str], created_at: i64) -> InteractionRecord {
        InteractionRecord {
            user_id: "alice".to_string(),
            session_id: session.to_string(),
            query: query.to_string(),
            query_type: "informational".to_string(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            created_at,
        }
    }

    fn builder(temp: &TempDir) -> (ContextBuilder, Arc<HistoryStore>) {
        let store = Arc::new(HistoryStore::new(&temp.path().join("history.db")).unwrap());
        let cache = Arc::new(TtlCache::disabled());
        (
            ContextBuilder::new(store.clone(), cache, test_config()),
            store,
        )
    }

    #[test]
    fn test_truncate_query() {
        assert_eq!(truncate_query("hello", 10), "hello");
        assert_eq!(truncate_query("hello world", 5), "hello");
        // Char-boundary safe with multibyte input
        assert_eq!(truncate_query("héllo", 2), "hé");
    }

    #[test]
    fn test_empty_history_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        let (builder, _store) = builder(&temp);

        let context = builder.build("alice", "s1", "what is staking?");
        assert!(context.history.is_empty());
        assert!(context.domain_preferences.is_empty());
        assert!(context.personalised);
    }

    #[test]
    fn test_preferences_by_frequency() {
        let temp = TempDir::new().unwrap();
        let (builder, store) = builder(&temp);

        store.append(&record("q1", "s1", &["eco"], 1)).unwrap();
        store.append(&record("q2", "s1", &["eco", "pipe"], 2)).unwrap();
        store.append(&record("q3", "s1", &["eco"], 3)).unwrap();

        let context = builder.build("alice", "s1", "anything");
        assert_eq!(context.domain_preferences[0], "eco");
        assert_eq!(context.domain_preferences[1], "pipe");
    }

    #[test]
    fn test_preference_ties_broken_by_recency() {
        let temp = TempDir::new().unwrap();
        let (builder, store) = builder(&temp);

        store.append(&record("q1", "s1", &["old"], 1)).unwrap();
        store.append(&record("q2", "s1", &["new"], 2)).unwrap();

        let context = builder.build("alice", "s1", "anything");
        // Both appear once; "new" was seen more recently
        assert_eq!(context.domain_preferences, vec!["new", "old"]);
    }

    #[test]
    fn test_preference_limit() {
        let temp = TempDir::new().unwrap();
        let (builder, store) = builder(&temp);

        for i in 0..8 {
            store
                .append(&record("q", "s1", &[&format!("d{}", i)], i))
                .unwrap();
        }

        let context = builder.build("alice", "s1", "anything");
        assert_eq!(context.domain_preferences.len(), 5);
    }

    #[test]
    fn test_degrades_when_store_unavailable() {
        let temp = TempDir::new().unwrap();
        let (builder, store) = builder(&temp);

        // Break the schema out from under the builder
        store
            .get_conn()
            .unwrap()
            .execute_batch("DROP TABLE interactions")
            .unwrap();

        let context = builder.build("alice", "s1", "anything");
        assert!(context.history.is_empty());
        assert!(!context.personalised);
    }

    #[test]
    fn test_metadata_fields() {
        let temp = TempDir::new().unwrap();
        let (builder, store) = builder(&temp);

        store.append(&record("q1", "s1", &["eco"], 42)).unwrap();

        let context = builder.build("alice", "s1", "what is staking?");
        assert!(context.metadata.contains_key("built_at"));
        assert!(context.metadata.contains_key("query_fingerprint"));
        assert_eq!(context.metadata.get("interaction_count").unwrap(), "1");
        assert_eq!(context.metadata.get("session_started_at").unwrap(), "42");
    }

    #[test]
    fn test_cached_history_is_reused() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(HistoryStore::new(&temp.path().join("history.db")).unwrap());
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60), 16));
        let builder = ContextBuilder::new(store.clone(), cache, test_config());

        store.append(&record("q1", "s1", &["eco"], 1)).unwrap();
        let first = builder.build("alice", "s1", "anything");
        assert_eq!(first.history.len(), 1);

        // A later append is not visible until the cache entry expires
        store.append(&record("q2", "s1", &["pipe"], 2)).unwrap();
        let second = builder.build("alice", "s1", "anything");
        assert_eq!(second.history.len(), 1);
    }
}
