//! Durable record of the outstanding compile job

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::compile::job::CommandType;
use crate::errors::OrchestratorError;
use crate::filesys::file::File;

/// Identity of a cacheable compile job, stored as `"<id>|<type>|<fqbn>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedJobHandle {
    pub id: String,
    pub command_type: CommandType,
    pub fqbn: String,
}

impl fmt::Display for CachedJobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.id, self.command_type, self.fqbn)
    }
}

impl FromStr for CachedJobHandle {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || OrchestratorError::StorageError(format!("malformed job handle: {s:?}"));

        // ids and command types never contain a separator
        let mut parts = s.trim().splitn(3, '|');
        let id = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        let command_type = parts
            .next()
            .and_then(|p| p.parse::<CommandType>().ok())
            .ok_or_else(malformed)?;
        let fqbn = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;

        Ok(Self {
            id: id.to_string(),
            command_type,
            fqbn: fqbn.to_string(),
        })
    }
}

/// Backing storage for the single session record
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>, OrchestratorError>;

    async fn save(&self, record: &str) -> Result<(), OrchestratorError>;

    async fn remove(&self) -> Result<(), OrchestratorError>;
}

/// Session record kept in a file
pub struct FileSessionStore {
    file: File,
}

impl FileSessionStore {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<String>, OrchestratorError> {
        self.file.read_optional_string().await
    }

    async fn save(&self, record: &str) -> Result<(), OrchestratorError> {
        self.file.write_atomic(record.as_bytes()).await
    }

    async fn remove(&self) -> Result<(), OrchestratorError> {
        self.file.delete().await
    }
}

/// Session record kept in memory
#[derive(Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn with_record(record: &str) -> Self {
        Self {
            record: Mutex::new(Some(record.to_string())),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<String>, OrchestratorError> {
        Ok(self.record.lock().await.clone())
    }

    async fn save(&self, record: &str) -> Result<(), OrchestratorError> {
        *self.record.lock().await = Some(record.to_string());
        Ok(())
    }

    async fn remove(&self) -> Result<(), OrchestratorError> {
        *self.record.lock().await = None;
        Ok(())
    }
}

/// Cache of the one outstanding compile job.
///
/// The `consumed` flag belongs to this instance, so a handle is offered for
/// resumption at most once per session even if storage still holds it.
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
    consumed: AtomicBool,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            consumed: AtomicBool::new(false),
        }
    }

    pub async fn put(&self, handle: &CachedJobHandle) -> Result<(), OrchestratorError> {
        debug!("Caching compile job handle {}", handle);
        self.store.save(&handle.to_string()).await
    }

    /// Read the stored handle. Malformed records are cleared and read as absent.
    pub async fn get(&self) -> Result<Option<CachedJobHandle>, OrchestratorError> {
        let Some(record) = self.store.load().await? else {
            return Ok(None);
        };
        match record.parse::<CachedJobHandle>() {
            Ok(handle) => Ok(Some(handle)),
            Err(e) => {
                warn!("Discarding cached compile job: {}", e);
                self.store.remove().await?;
                Ok(None)
            }
        }
    }

    pub async fn clear(&self) -> Result<(), OrchestratorError> {
        self.store.remove().await
    }

    /// Hand out the stored handle for resumption, once per session
    pub async fn take_for_resume(&self) -> Result<Option<CachedJobHandle>, OrchestratorError> {
        if self.consumed.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        self.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_format() {
        let handle = CachedJobHandle {
            id: "42".to_string(),
            command_type: CommandType::Upload,
            fqbn: "arduino:avr:uno".to_string(),
        };
        assert_eq!(handle.to_string(), "42|upload|arduino:avr:uno");
        assert_eq!("42|upload|arduino:avr:uno".parse::<CachedJobHandle>().unwrap(), handle);
    }

    #[test]
    fn test_handle_rejects_partial_records() {
        assert!("42|upload".parse::<CachedJobHandle>().is_err());
        assert!("|verify|arduino:avr:uno".parse::<CachedJobHandle>().is_err());
        assert!("42|flash|arduino:avr:uno".parse::<CachedJobHandle>().is_err());
        assert!("".parse::<CachedJobHandle>().is_err());
    }

    #[tokio::test]
    async fn test_take_for_resume_once() {
        let store = Arc::new(MemorySessionStore::with_record("7|verify|esp32:esp32:nano"));
        let cache = SessionCache::new(store.clone());

        let first = cache.take_for_resume().await.unwrap();
        assert_eq!(first.map(|h| h.id), Some("7".to_string()));
        assert!(cache.take_for_resume().await.unwrap().is_none());

        // plain reads stay idempotent
        assert!(cache.get().await.unwrap().is_some());
        assert!(cache.get().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_store_survives_restart() {
        let dir = std::env::temp_dir().join(crate::utils::generate_uuid());
        let path = dir.join("cache").join("compile-session");

        let first = SessionCache::new(Arc::new(FileSessionStore::new(File::new(&path))));
        assert!(first.get().await.unwrap().is_none());
        let handle = CachedJobHandle {
            id: "42".to_string(),
            command_type: CommandType::Upload,
            fqbn: "arduino:avr:uno".to_string(),
        };
        first.put(&handle).await.unwrap();

        let second = SessionCache::new(Arc::new(FileSessionStore::new(File::new(&path))));
        assert_eq!(second.take_for_resume().await.unwrap(), Some(handle));
        second.clear().await.unwrap();
        assert!(!path.exists());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_malformed_record_is_cleared() {
        let store = Arc::new(MemorySessionStore::with_record("garbage"));
        let cache = SessionCache::new(store.clone());

        assert!(cache.get().await.unwrap().is_none());
        assert!(store.load().await.unwrap().is_none());
    }
}
