//! Durable state for the registry.
//!
//! Two primary documents (registry, credentials) are rewritten in full on
//! every flush; a third document receives registry snapshots on demand.
//! Each document is replaced atomically, but the pair is not: a crash between
//! the two writes can leave them disagreeing, which [`PersistedState::reconcile`]
//! repairs at load time.

pub mod json_document;

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::credentials::CredentialTable;
use crate::errors::ServiceError;
use crate::registry::Registry;
use json_document::JsonDocument;

/// Everything that survives a restart.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersistedState {
    pub registry: Registry,
    pub credentials: CredentialTable,
}

impl PersistedState {
    /// Drop databases without a credential record and records without a database.
    /// Returns the number of names dropped.
    pub fn reconcile(&mut self) -> usize {
        let orphan_dbs: Vec<String> = self
            .registry
            .keys()
            .filter(|name| !self.credentials.contains_key(*name))
            .cloned()
            .collect();
        let orphan_creds: Vec<String> = self
            .credentials
            .keys()
            .filter(|name| !self.registry.contains_key(*name))
            .cloned()
            .collect();
        for name in &orphan_dbs {
            warn!(database = %name, "dropping database without credential record");
            self.registry.remove(name);
        }
        for name in &orphan_creds {
            warn!(database = %name, "dropping credential record without database");
            self.credentials.remove(name);
        }
        orphan_dbs.len() + orphan_creds.len()
    }
}

/// Storage backend for the registry state.
/// Implementations can be file-backed or in-memory.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load persisted state. Never fails: unreadable state is empty state.
    async fn load(&self) -> PersistedState;
    /// Rewrite both primary documents from the given collections.
    async fn flush(&self, registry: &Registry, credentials: &CredentialTable) -> Result<(), ServiceError>;
    /// Copy the registry (not credentials) to the backup document.
    async fn snapshot(&self, registry: &Registry) -> Result<(), ServiceError>;
}

/// File locations for [`JsonFileStore`].
#[derive(Clone, Debug)]
pub struct StoragePaths {
    pub registry: PathBuf,
    pub credentials: PathBuf,
    pub backup: PathBuf,
}

impl StoragePaths {
    /// Standard file names under `data_dir`.
    pub fn in_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        let dir = data_dir.into();
        Self {
            registry: dir.join("database.json"),
            credentials: dir.join("passcodes.json"),
            backup: dir.join("data_backup.json"),
        }
    }
}

/// JSON-file implementation of [`StateStore`].
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    registry: JsonDocument<Registry>,
    credentials: JsonDocument<CredentialTable>,
    backup: JsonDocument<Registry>,
}

impl JsonFileStore {
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            registry: JsonDocument::new(paths.registry),
            credentials: JsonDocument::new(paths.credentials),
            backup: JsonDocument::new(paths.backup),
        }
    }

    async fn read_both(&self) -> Result<PersistedState, ServiceError> {
        let registry = self.registry.read().await?;
        let credentials = self.credentials.read().await?;
        Ok(PersistedState { registry, credentials })
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> PersistedState {
        let mut state = match self.read_both().await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    registry = %self.registry.path().display(),
                    credentials = %self.credentials.path().display(),
                    error = %e,
                    "persisted state unreadable; starting empty"
                );
                return PersistedState::default();
            }
        };
        state.reconcile();
        debug!(databases = state.registry.len(), "persisted state loaded");
        state
    }

    async fn flush(&self, registry: &Registry, credentials: &CredentialTable) -> Result<(), ServiceError> {
        self.registry.write(registry).await?;
        self.credentials.write(credentials).await?;
        Ok(())
    }

    async fn snapshot(&self, registry: &Registry) -> Result<(), ServiceError> {
        self.backup.write(registry).await
    }
}

/// In-memory [`StateStore`] for tests.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStateStore {
        pub saved: Mutex<PersistedState>,
        pub backup: Mutex<Option<Registry>>,
        pub flushes: Mutex<usize>,
    }

    impl MemoryStateStore {
        pub fn with_state(state: PersistedState) -> Self {
            Self { saved: Mutex::new(state), ..Default::default() }
        }

        pub fn flush_count(&self) -> usize {
            *self.flushes.lock().unwrap()
        }

        pub fn saved(&self) -> PersistedState {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StateStore for MemoryStateStore {
        async fn load(&self) -> PersistedState {
            let mut state = self.saved.lock().unwrap().clone();
            state.reconcile();
            state
        }

        async fn flush(&self, registry: &Registry, credentials: &CredentialTable) -> Result<(), ServiceError> {
            *self.saved.lock().unwrap() = PersistedState { registry: registry.clone(), credentials: credentials.clone() };
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }

        async fn snapshot(&self, registry: &Registry) -> Result<(), ServiceError> {
            *self.backup.lock().unwrap() = Some(registry.clone());
            Ok(())
        }
    }
}
