//! Pattern persistence backends

use super::pattern::LearnedPattern;
use crate::{Result, TransformError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Durable home of the learned rule set
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Replace the stored rule set
    async fn save(&self, patterns: &[LearnedPattern]) -> Result<()>;

    async fn load(&self) -> Result<Vec<LearnedPattern>>;

    async fn clear(&self) -> Result<()>;
}

/// JSON file store, written atomically. Saves are serialized and all file
/// I/O runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct FilePatternStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FilePatternStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || operation(path))
            .await
            .map_err(|e| TransformError::Storage(format!("pattern store task failed: {}", e)))?
    }
}

#[async_trait]
impl PatternStore for FilePatternStore {
    async fn save(&self, patterns: &[LearnedPattern]) -> Result<()> {
        let json = serde_json::to_vec_pretty(patterns)?;
        let _guard = self.write_lock.lock().await;
        self.blocking(move |path| {
            layerfix_utils::write_atomic(&path, &json)?;
            Ok(())
        })
        .await
    }

    async fn load(&self) -> Result<Vec<LearnedPattern>> {
        self.blocking(|path| {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let content = layerfix_utils::read_text_file(&path)?;
            if content.trim().is_empty() {
                return Ok(Vec::new());
            }
            serde_json::from_str(&content)
                .map_err(|e| TransformError::Storage(format!("{}: {}", path.display(), e)))
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.blocking(|path| match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryPatternStore {
    patterns: Mutex<Vec<LearnedPattern>>,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatternStore for MemoryPatternStore {
    async fn save(&self, patterns: &[LearnedPattern]) -> Result<()> {
        *self.patterns.lock().await = patterns.to_vec();
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LearnedPattern>> {
        Ok(self.patterns.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.patterns.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> LearnedPattern {
        LearnedPattern::new("&amp;".into(), "&".into(), "entities", 2, "decode &amp;".into())
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FilePatternStore::new(dir.path().join("nested/patterns.json"));

        assert!(store.load().await.unwrap().is_empty());

        let pattern = sample();
        store.save(&[pattern.clone()]).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![pattern]);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"pattern\""));
        assert!(raw.contains("\"last_used\""));

        store.clear().await.unwrap();
        assert!(!store.path().exists());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FilePatternStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, TransformError::Storage(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_all_succeed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FilePatternStore::new(dir.path().join("patterns.json")));
        let patterns: Vec<LearnedPattern> = (0..50)
            .map(|i| LearnedPattern::new(format!("rule{}", i), String::new(), "entities", 2, String::new()))
            .collect();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let patterns = patterns.clone();
                tokio::spawn(async move { store.save(&patterns).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.load().await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryPatternStore::new();
        store.save(&[sample()]).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 1);
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
