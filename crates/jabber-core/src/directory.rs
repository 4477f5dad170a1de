//! Alias to address directory with fuzzy lookup and JSON persistence

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::DirectoryConfig;
use crate::error::{BridgeError, DirectoryError};
use crate::fuzzy::partial_ratio;
use crate::pump::Lifecycle;
use crate::types::DirectoryMatch;
use crate::validation::{validate_address, validate_alias};

const DIRECTORY_FILE: &str = "address_book.json";

/// Default location of the directory file
pub fn default_directory_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("jabber-mcp").join(DIRECTORY_FILE))
        .unwrap_or_else(|| PathBuf::from(".jabber-mcp").join(DIRECTORY_FILE))
}

/// Contact directory keyed by alias
///
/// Addresses are stored lower-cased. Iteration order is alphabetical by
/// alias, which is also the tie-break order for equal fuzzy scores.
#[derive(Debug, Default)]
pub struct Directory {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, String>>,
    save_lock: Mutex<()>,
}

impl Directory {
    /// Create an empty directory persisted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Create a directory that never touches the filesystem
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Score every entry against `term`
    ///
    /// Each entry scores the better of its alias and its address. Entries
    /// scoring zero are omitted; filtering by threshold is the caller's job.
    pub async fn query_fuzzy(&self, term: &str) -> Vec<DirectoryMatch> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Vec::new();
        }

        let entries = self.entries.read().await;
        entries
            .iter()
            .filter_map(|(alias, address)| {
                let alias_score = partial_ratio(&term, &alias.to_lowercase());
                let address_score = partial_ratio(&term, &address.to_lowercase());
                let score = alias_score.max(address_score);
                (score > 0).then(|| DirectoryMatch::new(alias, address, score))
            })
            .collect()
    }

    /// Hits at or above the configured threshold, best first
    ///
    /// The sort is stable, so equal scores stay alphabetical.
    pub async fn search(&self, term: &str, config: &DirectoryConfig) -> Vec<DirectoryMatch> {
        let mut matches = self.query_fuzzy(term).await;
        matches.retain(|m| m.score >= config.fuzzy_threshold);
        matches.sort_by(|a, b| b.score.cmp(&a.score));
        matches.truncate(config.max_results);
        matches
    }

    pub async fn get_exact(&self, alias: &str) -> Option<String> {
        self.entries.read().await.get(alias.trim()).cloned()
    }

    /// Map `alias` to `address`, returning whether the stored value changed
    pub async fn save_alias(&self, alias: &str, address: &str) -> Result<bool, DirectoryError> {
        let alias = validate_alias(alias)?.to_string();
        let address = validate_address(address)?.to_lowercase();

        let previous = self
            .entries
            .write()
            .await
            .insert(alias.clone(), address.clone());

        match previous {
            Some(old) if old == address => {
                debug!("Alias '{}' already maps to '{}'", alias, address);
                Ok(false)
            }
            Some(old) => {
                info!("Saved alias '{}' -> '{}' (was '{}')", alias, address, old);
                Ok(true)
            }
            None => {
                info!("Saved alias '{}' -> '{}'", alias, address);
                Ok(true)
            }
        }
    }

    pub async fn remove_alias(&self, alias: &str) -> bool {
        match self.entries.write().await.remove(alias.trim()) {
            Some(address) => {
                info!("Removed alias '{}' (was '{}')", alias.trim(), address);
                true
            }
            None => false,
        }
    }

    /// Remove every alias pointing at `address`, returning how many went
    pub async fn remove_address(&self, address: &str) -> usize {
        let address = address.trim().to_lowercase();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, stored| *stored != address);
        before - entries.len()
    }

    /// First alias (alphabetically) mapped to `address`
    pub async fn alias_for(&self, address: &str) -> Option<String> {
        let address = address.trim().to_lowercase();
        self.entries
            .read()
            .await
            .iter()
            .find(|(_, stored)| **stored == address)
            .map(|(alias, _)| alias.clone())
    }

    pub async fn list_all(&self) -> BTreeMap<String, String> {
        self.entries.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        info!("Cleared {} contacts from directory", count);
        count
    }

    /// Merge entries from the backing file
    ///
    /// A missing file is not an error. Invalid entries are skipped.
    pub async fn load(&self) -> Result<usize, DirectoryError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(0);
        };
        if !tokio::fs::try_exists(path).await? {
            info!("Directory file {} doesn't exist, starting empty", path.display());
            return Ok(0);
        }

        let content = tokio::fs::read_to_string(path).await?;
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        let mut loaded = 0;
        let mut entries = self.entries.write().await;
        for (alias, value) in raw {
            let Some(address) = value.as_str() else {
                warn!("Skipping non-string entry for alias '{}'", alias);
                continue;
            };
            match (validate_alias(&alias), validate_address(address)) {
                (Ok(alias), Ok(address)) => {
                    entries.insert(alias.to_string(), address.to_lowercase());
                    loaded += 1;
                }
                _ => warn!("Skipping invalid entry: alias='{}', jid='{}'", alias, address),
            }
        }

        info!("Loaded {} contacts from {}", loaded, path.display());
        Ok(loaded)
    }

    /// Write all entries to the backing file through a temp file and rename
    ///
    /// Saves are serialized so overlapping callers never share the temp file.
    pub async fn save(&self) -> Result<(), DirectoryError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let _saving = self.save_lock.lock().await;
        let snapshot = self.list_all().await;
        let content = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!("Saved {} contacts to {}", snapshot.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for Directory {
    async fn on_start(&self) -> Result<(), BridgeError> {
        self.load().await?;
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), BridgeError> {
        self.save().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_save_alias_reports_changes() {
        let directory = Directory::in_memory();
        assert!(directory.save_alias("alice", "Alice@X.com").await.unwrap());
        assert!(!directory.save_alias("alice", "alice@x.com").await.unwrap());
        assert!(directory.save_alias("alice", "alice@y.com").await.unwrap());
        assert_eq!(
            directory.get_exact(" alice ").await.as_deref(),
            Some("alice@y.com")
        );
    }

    #[tokio::test]
    async fn test_save_alias_validates() {
        let directory = Directory::in_memory();
        let err = directory.save_alias("", "a@x.com").await.unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::Validation(ValidationError::EmptyAlias)
        ));
        assert_err!(directory.save_alias("alice", "not-an-address").await);
        assert_eq!(directory.count().await, 0);
    }

    #[tokio::test]
    async fn test_query_scores_alias_and_address() {
        let directory = Directory::in_memory();
        directory.save_alias("alice", "a@x.com").await.unwrap();
        directory.save_alias("bob", "robert@example.org").await.unwrap();

        let by_alias = directory.query_fuzzy("ALI").await;
        let alice = by_alias.iter().find(|m| m.alias == "alice").unwrap();
        assert_eq!(alice.score, 100);

        let by_address = directory.query_fuzzy("example").await;
        let bob = by_address.iter().find(|m| m.alias == "bob").unwrap();
        assert_eq!(bob.score, 100);

        assert!(directory.query_fuzzy("   ").await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_reverse_lookup() {
        let directory = Directory::in_memory();
        directory.save_alias("alice", "a@x.com").await.unwrap();
        directory.save_alias("ally", "a@x.com").await.unwrap();
        directory.save_alias("bob", "b@x.com").await.unwrap();

        assert_eq!(directory.alias_for("A@x.com").await.as_deref(), Some("alice"));
        assert!(directory.remove_alias("bob").await);
        assert!(!directory.remove_alias("bob").await);
        assert_eq!(directory.remove_address("a@x.com").await, 2);
        assert_eq!(directory.count().await, 0);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("book.json");

        let directory = Directory::new(&path);
        directory.save_alias("alice", "a@x.com").await.unwrap();
        assert_ok!(directory.save().await);
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = Directory::new(&path);
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert_eq!(reloaded.get_exact("alice").await.as_deref(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn test_concurrent_saves_all_succeed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.json");
        let directory = std::sync::Arc::new(Directory::new(&path));

        let mut saves = Vec::new();
        for i in 0..8 {
            let directory = directory.clone();
            saves.push(tokio::spawn(async move {
                directory
                    .save_alias(&format!("user{}", i), &format!("u{}@x.com", i))
                    .await
                    .unwrap();
                directory.save().await
            }));
        }
        for save in saves {
            assert_ok!(save.await.unwrap());
        }

        let reloaded = Directory::new(&path);
        assert_eq!(reloaded.load().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_search_filters_sorts_and_truncates() {
        let directory = Directory::in_memory();
        directory.save_alias("alina", "alina@x.com").await.unwrap();
        directory.save_alias("alice", "alice@x.com").await.unwrap();
        directory.save_alias("bob", "b@x.com").await.unwrap();

        let config = DirectoryConfig {
            max_results: 1,
            ..DirectoryConfig::default()
        };
        let hits = directory.search("ali", &config).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].alias, "alice");
        assert!(directory.search("qqq", &config).await.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let directory = Directory::new(dir.path().join("absent.json"));
        assert_eq!(directory.load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_skips_invalid_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.json");
        std::fs::write(
            &path,
            r#"{"alice": "A@X.com", "bad alias": "b@x.com", "carol": "nope", "dave": 7}"#,
        )
        .unwrap();

        let directory = Directory::new(&path);
        assert_eq!(directory.load().await.unwrap(), 1);
        assert_eq!(directory.get_exact("alice").await.as_deref(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn test_load_rejects_non_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let directory = Directory::new(&path);
        assert!(matches!(
            directory.load().await,
            Err(DirectoryError::Json(_))
        ));
    }
}
