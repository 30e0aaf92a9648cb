//! Pattern Repository
//!
//! Owns the learned rule set for the lifetime of an executor. All writes go
//! through one `RwLock` write guard; readers take cloned snapshots.

use super::pattern::LearnedPattern;
use super::store::PatternStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Default rule ceiling before eviction kicks in
pub const DEFAULT_MAX_PATTERNS: usize = 1000;

type PatternKey = (String, String);

/// Result of recording one observed rule
#[derive(Debug, Clone)]
pub struct Observation {
    pub pattern: LearnedPattern,
    pub is_new: bool,
    pub evicted: usize,
}

pub struct PatternRepository {
    patterns: RwLock<HashMap<PatternKey, LearnedPattern>>,
    store: Option<Arc<dyn PatternStore>>,
    degraded: AtomicBool,
    persist_lock: Mutex<()>,
    max_patterns: usize,
}

impl std::fmt::Debug for PatternRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRepository")
            .field("has_store", &self.store.is_some())
            .field("degraded", &self.is_degraded())
            .field("max_patterns", &self.max_patterns)
            .finish()
    }
}

impl PatternRepository {
    /// Repository with no durable store
    pub fn in_memory(max_patterns: usize) -> Self {
        Self {
            patterns: RwLock::new(HashMap::new()),
            store: None,
            degraded: AtomicBool::new(false),
            persist_lock: Mutex::new(()),
            max_patterns: max_patterns.max(1),
        }
    }

    pub fn with_store(store: Arc<dyn PatternStore>, max_patterns: usize) -> Self {
        Self {
            store: Some(store),
            ..Self::in_memory(max_patterns)
        }
    }

    /// Whether an unreadable store has switched the repository to memory
    /// only. Writing back would overwrite rules that could not be read.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn degrade(&self, error: &crate::TransformError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!("Pattern store load failed, continuing in memory only: {}", error);
        }
    }

    /// Pull persisted rules into memory; returns how many were loaded.
    /// A failing store degrades the repository instead of erroring.
    pub async fn load(&self) -> usize {
        let Some(store) = &self.store else { return 0 };

        match store.load().await {
            Ok(loaded) => {
                let count = loaded.len();
                let mut patterns = self.patterns.write().await;
                for pattern in loaded {
                    patterns.insert(pattern.key(), pattern);
                }
                Self::evict_if_needed(&mut patterns, self.max_patterns);
                info!("Loaded {} learned patterns", count);
                count
            }
            Err(e) => {
                self.degrade(&e);
                0
            }
        }
    }

    /// Write the current rule set through to the store. Concurrent callers
    /// are serialized so the last write always carries the newest snapshot.
    /// A failed write is retried by the next call.
    pub async fn persist(&self) -> bool {
        let Some(store) = &self.store else { return false };
        if self.is_degraded() {
            return false;
        }

        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot().await;
        match store.save(&snapshot).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist {} learned patterns: {}", snapshot.len(), e);
                false
            }
        }
    }

    /// Drop every rule, in memory and in the store
    pub async fn clear(&self) {
        let _guard = self.persist_lock.lock().await;
        self.patterns.write().await.clear();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear().await {
                warn!("Failed to clear pattern store: {}", e);
            }
        }
    }

    pub async fn snapshot(&self) -> Vec<LearnedPattern> {
        self.patterns.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.patterns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.patterns.read().await.is_empty()
    }

    /// Insert a freshly derived rule, or count another success for an
    /// existing rule with the same dedupe key
    pub async fn observe(&self, candidate: LearnedPattern) -> Observation {
        let mut patterns = self.patterns.write().await;
        let key = candidate.key();

        let (pattern, is_new) = match patterns.get_mut(&key) {
            Some(existing) => {
                existing.record_success();
                (existing.clone(), false)
            }
            None => {
                patterns.insert(key, candidate.clone());
                (candidate, true)
            }
        };

        let evicted = Self::evict_if_needed(&mut patterns, self.max_patterns);
        Observation { pattern, is_new, evicted }
    }

    /// Post-apply bookkeeping for the rules named by id
    pub async fn record_results(&self, succeeded: &[String], failed: &[String]) {
        if succeeded.is_empty() && failed.is_empty() {
            return;
        }

        let mut patterns = self.patterns.write().await;
        for pattern in patterns.values_mut() {
            if succeeded.contains(&pattern.id) {
                pattern.record_success();
            } else if failed.contains(&pattern.id) {
                pattern.record_failure();
            }
        }
    }

    /// Drop the lowest-scoring 10% once the ceiling is exceeded
    fn evict_if_needed(patterns: &mut HashMap<PatternKey, LearnedPattern>, max_patterns: usize) -> usize {
        if patterns.len() <= max_patterns {
            return 0;
        }

        let drop_count = patterns.len().div_ceil(10).max(patterns.len() - max_patterns);
        let mut ranked: Vec<(PatternKey, f64)> = patterns
            .iter()
            .map(|(key, pattern)| (key.clone(), pattern.retention_score()))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        for (key, _) in ranked.into_iter().take(drop_count) {
            patterns.remove(&key);
        }
        debug!("Evicted {} low-scoring patterns", drop_count);
        drop_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::store::{FilePatternStore, MemoryPatternStore};
    use crate::{Result, TransformError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Store whose first `failures` saves error out
    struct FlakyStore {
        inner: MemoryPatternStore,
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl PatternStore for FlakyStore {
        async fn save(&self, patterns: &[LearnedPattern]) -> Result<()> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(TransformError::Storage("disk full".to_string()));
            }
            self.inner.save(patterns).await
        }

        async fn load(&self) -> Result<Vec<LearnedPattern>> {
            self.inner.load().await
        }

        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
    }

    struct UnreadableStore;

    #[async_trait]
    impl PatternStore for UnreadableStore {
        async fn save(&self, _patterns: &[LearnedPattern]) -> Result<()> {
            panic!("an unreadable store must never be overwritten");
        }

        async fn load(&self) -> Result<Vec<LearnedPattern>> {
            Err(TransformError::Storage("corrupt".to_string()))
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    fn pattern(matcher: &str) -> LearnedPattern {
        LearnedPattern::new(matcher.to_string(), String::new(), "entities", 2, String::new())
    }

    #[tokio::test]
    async fn test_observe_dedupes_by_category_and_matcher() {
        let repository = PatternRepository::in_memory(DEFAULT_MAX_PATTERNS);

        let first = repository.observe(pattern("&amp;")).await;
        assert!(first.is_new);
        let second = repository.observe(pattern("&amp;")).await;
        assert!(!second.is_new);
        assert_eq!(second.pattern.success_count, 2);
        assert_eq!(second.pattern.id, first.pattern.id);

        let mut other_category = pattern("&amp;");
        other_category.category = "testing".to_string();
        assert!(repository.observe(other_category).await.is_new);
        assert_eq!(repository.len().await, 2);
    }

    #[tokio::test]
    async fn test_eviction_drops_lowest_decile() {
        let repository = PatternRepository::in_memory(10);
        for i in 0..10 {
            let mut candidate = pattern(&format!("rule{}", i));
            candidate.success_count = 5 + i;
            candidate.recompute_confidence();
            repository.observe(candidate).await;
        }
        assert_eq!(repository.len().await, 10);

        // Score 0.8 x 1 is the lowest in the set
        let observation = repository.observe(pattern("weak")).await;
        assert_eq!(observation.evicted, 2);
        let remaining = repository.snapshot().await;
        assert_eq!(remaining.len(), 9);
        assert!(remaining.iter().all(|p| p.matcher != "weak"));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let store: Arc<dyn PatternStore> = Arc::new(MemoryPatternStore::new());
        let repository = PatternRepository::with_store(store.clone(), DEFAULT_MAX_PATTERNS);
        repository.observe(pattern("&quot;")).await;
        repository.persist().await;

        let reloaded = PatternRepository::with_store(store, DEFAULT_MAX_PATTERNS);
        assert_eq!(reloaded.load().await, 1);
        assert!(!reloaded.is_degraded());
    }

    #[tokio::test]
    async fn test_record_results() {
        let repository = PatternRepository::in_memory(DEFAULT_MAX_PATTERNS);
        let good = repository.observe(pattern("good")).await.pattern;
        let bad = repository.observe(pattern("bad")).await.pattern;

        repository.record_results(&[good.id.clone()], &[bad.id.clone()]).await;

        let snapshot = repository.snapshot().await;
        let good = snapshot.iter().find(|p| p.id == good.id).unwrap();
        let bad = snapshot.iter().find(|p| p.id == bad.id).unwrap();
        assert_eq!(good.success_count, 2);
        assert!((bad.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_save_is_retried() {
        let store = Arc::new(FlakyStore {
            inner: MemoryPatternStore::new(),
            failures: 1,
            attempts: AtomicUsize::new(0),
        });
        let repository = PatternRepository::with_store(store.clone(), DEFAULT_MAX_PATTERNS);
        repository.observe(pattern("&quot;")).await;

        assert!(!repository.persist().await);
        assert!(!repository.is_degraded());

        repository.observe(pattern("&amp;")).await;
        assert!(repository.persist().await);
        assert_eq!(store.inner.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_store_is_never_overwritten() {
        let repository = PatternRepository::with_store(Arc::new(UnreadableStore), DEFAULT_MAX_PATTERNS);
        assert_eq!(repository.load().await, 0);
        assert!(repository.is_degraded());

        repository.observe(pattern("&quot;")).await;
        assert!(!repository.persist().await);
        assert_eq!(repository.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_persists_keep_the_full_rule_set() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn PatternStore> = Arc::new(FilePatternStore::new(dir.path().join("patterns.json")));
        let repository = Arc::new(PatternRepository::with_store(store.clone(), DEFAULT_MAX_PATTERNS));

        for round in 0..4 {
            let tasks: Vec<_> = (0..16)
                .map(|worker| {
                    let repository = repository.clone();
                    tokio::spawn(async move {
                        for i in 0..50 {
                            if i % 16 == worker {
                                repository.observe(pattern(&format!("rule{}-{}", round, i))).await;
                            }
                        }
                        repository.persist().await
                    })
                })
                .collect();
            for task in tasks {
                assert!(task.await.unwrap());
            }
        }

        assert!(!repository.is_degraded());
        let reloaded = PatternRepository::with_store(store, DEFAULT_MAX_PATTERNS);
        assert_eq!(reloaded.load().await, 200);
    }
}
