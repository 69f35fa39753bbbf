// Persisted key-value settings
//
// The translation core only reads and writes a handful of string keys. Two
// stores are provided:
// - MemoryStore: process-lifetime map, used by tests and one-shot runs
// - FileStore: JSON object on disk that survives restarts

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::direction::TargetLanguage;
use crate::error::{FanyiError, Result};
use crate::translate::BackendId;

/// Keys shared with the presentation layer
pub mod keys {
    pub const SELECTED_SERVICE: &str = "selectedService";
    pub const OPENROUTER_API_KEY: &str = "openRouterApiKey";
    pub const OPENROUTER_MODEL_ID: &str = "openRouterModelId";
    pub const MS_AUTH_TOKEN: &str = "msAuthToken";
    pub const TRANSLATION_DIRECTION: &str = "translationDirection";
}

/// Async string key-value store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Snapshot of every stored entry
    async fn entries(&self) -> Result<BTreeMap<String, String>>;
}

#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn entries(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.values.read().await.clone())
    }
}

/// JSON file backed store. The whole map is rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, starting empty when the file does not exist yet
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let values = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                FanyiError::Storage(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Storage file {} not found, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(FanyiError::Io(e)),
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(values)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!("Persisted {} settings to {}", values.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().await;
        let mut updated = values.clone();
        updated.insert(key.to_string(), value.to_string());

        self.persist(&updated).await?;
        *values = updated;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().await;
        if !values.contains_key(key) {
            return Ok(());
        }
        let mut updated = values.clone();
        updated.remove(key);

        self.persist(&updated).await?;
        *values = updated;
        Ok(())
    }

    async fn entries(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.values.read().await.clone())
    }
}

/// Typed view over the settings the core consumes.
///
/// Read failures degrade to "unset" and the direction preference written on
/// the translate path only logs a failed write. The user-facing setters
/// return the store error.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn KeyValueStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(e) => {
                warn!("Failed to read setting {}: {}", key, e);
                None
            }
        }
    }

    async fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value).await {
            warn!("Failed to write setting {}: {}", key, e);
        }
    }

    pub async fn selected_backend(&self) -> Option<BackendId> {
        let raw = self.read(keys::SELECTED_SERVICE).await?;
        match raw.parse() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Ignoring stored {}: {}", keys::SELECTED_SERVICE, e);
                None
            }
        }
    }

    pub async fn set_selected_backend(&self, backend: BackendId) -> Result<()> {
        self.store.set(keys::SELECTED_SERVICE, backend.as_str()).await
    }

    pub async fn openrouter_api_key(&self) -> Option<String> {
        self.read(keys::OPENROUTER_API_KEY).await
    }

    pub async fn set_openrouter_api_key(&self, api_key: &str) -> Result<()> {
        self.store.set(keys::OPENROUTER_API_KEY, api_key).await
    }

    pub async fn openrouter_model_id(&self) -> Option<String> {
        self.read(keys::OPENROUTER_MODEL_ID).await
    }

    pub async fn set_openrouter_model_id(&self, model_id: &str) -> Result<()> {
        self.store.set(keys::OPENROUTER_MODEL_ID, model_id).await
    }

    pub async fn translation_direction(&self) -> Option<TargetLanguage> {
        self.read(keys::TRANSLATION_DIRECTION).await?.parse().ok()
    }

    pub async fn set_translation_direction(&self, direction: TargetLanguage) {
        self.write(keys::TRANSLATION_DIRECTION, direction.as_str()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("nested/storage.json");

        let store = FileStore::open(file.path()).await.unwrap();
        store.set(keys::SELECTED_SERVICE, "tencent").await.unwrap();
        store.set(keys::MS_AUTH_TOKEN, "a.b.c").await.unwrap();
        store.remove(keys::MS_AUTH_TOKEN).await.unwrap();

        let on_disk = std::fs::read_to_string(file.path()).unwrap();
        assert!(on_disk.contains("tencent"));

        let reopened = FileStore::open(file.path()).await.unwrap();
        assert_eq!(
            reopened.get(keys::SELECTED_SERVICE).await.unwrap().as_deref(),
            Some("tencent")
        );
        assert_eq!(reopened.get(keys::MS_AUTH_TOKEN).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("storage.json");
        file.write_str("not json").unwrap();

        let result = FileStore::open(file.path()).await;
        assert!(matches!(result, Err(FanyiError::Storage(_))));
    }

    #[tokio::test]
    async fn test_settings_ignore_unknown_backend() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::SELECTED_SERVICE, "babelfish").await.unwrap();

        let settings = Settings::new(store.clone());
        assert_eq!(settings.selected_backend().await, None);

        settings.set_selected_backend(BackendId::OpenRouter).await.unwrap();
        assert_eq!(settings.selected_backend().await, Some(BackendId::OpenRouter));
    }

    #[tokio::test]
    async fn test_settings_treat_store_failure_as_unset() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Err(FanyiError::Storage("disk gone".to_string())));
        store
            .expect_set()
            .times(1)
            .returning(|_, _| Err(FanyiError::Storage("disk gone".to_string())));

        let settings = Settings::new(Arc::new(store));
        assert_eq!(settings.openrouter_api_key().await, None);
        // logged, not propagated
        settings.set_translation_direction(TargetLanguage::Zh).await;
    }

    #[tokio::test]
    async fn test_user_setters_report_store_failure() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set()
            .times(3)
            .returning(|_, _| Err(FanyiError::Storage("read-only".to_string())));

        let settings = Settings::new(Arc::new(store));
        assert!(matches!(
            settings.set_selected_backend(BackendId::Google).await,
            Err(FanyiError::Storage(_))
        ));
        assert!(settings.set_openrouter_api_key("key").await.is_err());
        assert!(settings.set_openrouter_model_id("model").await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_keeps_memory_in_step_with_disk() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("storage.json");

        let store = FileStore::open(file.path()).await.unwrap();
        store.set(keys::SELECTED_SERVICE, "google").await.unwrap();

        // a directory in place of the file makes the rename fail
        std::fs::remove_file(file.path()).unwrap();
        file.child("blocker").create_dir_all().unwrap();

        assert!(store.set(keys::SELECTED_SERVICE, "tencent").await.is_err());
        assert!(store.remove(keys::SELECTED_SERVICE).await.is_err());
        assert_eq!(
            store.get(keys::SELECTED_SERVICE).await.unwrap().as_deref(),
            Some("google")
        );
    }

    #[tokio::test]
    async fn test_blank_values_are_unset() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::OPENROUTER_MODEL_ID, "   ").await.unwrap();

        let settings = Settings::new(store);
        assert_eq!(settings.openrouter_model_id().await, None);
    }
}
