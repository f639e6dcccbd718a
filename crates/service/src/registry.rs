//! Named databases and their entries.
//!
//! All state lives in one [`RegistryState`] behind one mutex. Every operation
//! runs to completion under the lock, including the flush to durable storage,
//! so the registry, the credential table and the files on disk move together.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info, instrument};

use crate::credentials::{self, CredentialRecord, CredentialTable};
use crate::errors::ServiceError;
use crate::names::validate_name;
use crate::query;
use crate::storage::{PersistedState, StateStore};

/// Entries of one database, sorted by key.
pub type Store = serde_json::Map<String, Value>;

/// Database name -> store.
pub type Registry = BTreeMap<String, Store>;

/// Returned once, when a database is created.
#[derive(Clone, Debug, Serialize)]
pub struct CreatedDatabase {
    pub name: String,
    pub passcode: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct RegistryOptions {
    /// Flush after reads and failed operations too, not only after mutations.
    pub flush_on_read: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self { Self { flush_on_read: true } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OpKind {
    Read,
    Mutation,
}

#[derive(Debug, Default)]
struct RegistryState {
    registry: Registry,
    credentials: CredentialTable,
}

impl RegistryState {
    /// Name grammar, existence, then passcode; in that order.
    fn authorize(&self, name: &str, passcode: Option<&str>) -> Result<(), ServiceError> {
        validate_name(name)?;
        if !self.registry.contains_key(name) {
            return Err(ServiceError::DatabaseNotFound);
        }
        credentials::verify(&self.credentials, name, passcode)
    }

    fn store(&self, name: &str, passcode: Option<&str>) -> Result<&Store, ServiceError> {
        self.authorize(name, passcode)?;
        self.registry.get(name).ok_or(ServiceError::DatabaseNotFound)
    }

    fn store_mut(&mut self, name: &str, passcode: Option<&str>) -> Result<&mut Store, ServiceError> {
        self.authorize(name, passcode)?;
        self.registry.get_mut(name).ok_or(ServiceError::DatabaseNotFound)
    }
}

/// Cloneable handle to the shared registry.
#[derive(Clone)]
pub struct DatabaseRegistry {
    inner: Arc<Mutex<RegistryState>>,
    store: Arc<dyn StateStore>,
    options: RegistryOptions,
}

impl DatabaseRegistry {
    /// Load persisted state through `store` and wrap it.
    pub async fn open(store: Arc<dyn StateStore>, options: RegistryOptions) -> Self {
        let PersistedState { registry, credentials } = store.load().await;
        info!(databases = registry.len(), flush_on_read = options.flush_on_read, "registry opened");
        Self {
            inner: Arc::new(Mutex::new(RegistryState { registry, credentials })),
            store,
            options,
        }
    }

    /// Run `op` under the lock, then flush according to policy before releasing it.
    async fn run<T>(
        &self,
        kind: OpKind,
        op: impl FnOnce(&mut RegistryState) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut state = self.inner.lock().await;
        let result = op(&mut *state);
        self.finish(&state, kind, result).await
    }

    async fn finish<T>(
        &self,
        state: &MutexGuard<'_, RegistryState>,
        kind: OpKind,
        result: Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let needs_flush = self.options.flush_on_read || (kind == OpKind::Mutation && result.is_ok());
        if !needs_flush {
            return result;
        }
        match (result, self.store.flush(&state.registry, &state.credentials).await) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => {
                error!(error = %e, "flush failed after successful operation");
                Err(e)
            }
            (Err(op_err), Err(e)) => {
                error!(error = %e, "flush failed after failed operation");
                Err(op_err)
            }
            (Err(op_err), Ok(())) => Err(op_err),
        }
    }

    /// Create an empty database and issue its passcode.
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str) -> Result<CreatedDatabase, ServiceError> {
        let created = self
            .run(OpKind::Mutation, |state| {
                validate_name(name)?;
                if state.registry.contains_key(name) {
                    return Err(ServiceError::DatabaseExists);
                }
                let passcode = credentials::generate_passcode();
                let record = CredentialRecord::issue(&passcode);
                let created_at = record.created_at;
                state.registry.insert(name.to_string(), Store::new());
                state.credentials.insert(name.to_string(), record);
                Ok(CreatedDatabase { name: name.to_string(), passcode, created_at })
            })
            .await?;
        info!(database = %name, "database created");
        Ok(created)
    }

    /// Insert or silently overwrite `key`.
    #[instrument(skip(self, value, passcode))]
    pub async fn put(&self, name: &str, key: &str, value: Value, passcode: Option<&str>) -> Result<(), ServiceError> {
        self.run(OpKind::Mutation, |state| {
            let store = state.store_mut(name, passcode)?;
            if key.is_empty() {
                return Err(ServiceError::key_missing());
            }
            store.insert(key.to_string(), value);
            Ok(())
        })
        .await
    }

    /// The whole store.
    #[instrument(skip(self, passcode))]
    pub async fn get(&self, name: &str, passcode: Option<&str>) -> Result<Store, ServiceError> {
        self.run(OpKind::Read, |state| state.store(name, passcode).cloned()).await
    }

    #[instrument(skip(self, passcode))]
    pub async fn get_entry(&self, name: &str, key: &str, passcode: Option<&str>) -> Result<Value, ServiceError> {
        self.run(OpKind::Read, |state| {
            state.store(name, passcode)?.get(key).cloned().ok_or_else(ServiceError::key_not_found)
        })
        .await
    }

    /// Remove the database together with its credential record.
    #[instrument(skip(self, passcode))]
    pub async fn delete(&self, name: &str, passcode: Option<&str>) -> Result<(), ServiceError> {
        self.run(OpKind::Mutation, |state| {
            state.authorize(name, passcode)?;
            state.registry.remove(name);
            state.credentials.remove(name);
            Ok(())
        })
        .await?;
        info!(database = %name, "database deleted");
        Ok(())
    }

    #[instrument(skip(self, passcode))]
    pub async fn delete_entry(&self, name: &str, key: &str, passcode: Option<&str>) -> Result<(), ServiceError> {
        self.run(OpKind::Mutation, |state| {
            state
                .store_mut(name, passcode)?
                .remove(key)
                .map(|_| ())
                .ok_or_else(ServiceError::key_not_found)
        })
        .await
    }

    /// Replace the value of an existing key wholesale.
    #[instrument(skip(self, value, passcode))]
    pub async fn edit_entry(&self, name: &str, key: &str, value: Value, passcode: Option<&str>) -> Result<(), ServiceError> {
        self.run(OpKind::Mutation, |state| {
            let slot = state.store_mut(name, passcode)?.get_mut(key).ok_or_else(ServiceError::key_not_found)?;
            *slot = value;
            Ok(())
        })
        .await
    }

    /// Entries matching `term`; see [`query::search`].
    #[instrument(skip(self, passcode))]
    pub async fn query(&self, name: &str, term: Option<&str>, passcode: Option<&str>) -> Result<Store, ServiceError> {
        self.run(OpKind::Read, |state| Ok(query::search(state.store(name, passcode)?, term))).await
    }

    /// Copy the registry to the backup document.
    #[instrument(skip(self))]
    pub async fn backup(&self) -> Result<(), ServiceError> {
        let state = self.inner.lock().await;
        let result = self.store.snapshot(&state.registry).await;
        let result = self.finish(&state, OpKind::Read, result).await;
        if result.is_ok() {
            info!(databases = state.registry.len(), "registry snapshot written");
        }
        result
    }

    pub async fn database_count(&self) -> usize {
        self.inner.lock().await.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::hash_passcode;
    use crate::storage::mock::MemoryStateStore;
    use serde_json::json;

    async fn open_with(options: RegistryOptions) -> (Arc<MemoryStateStore>, DatabaseRegistry) {
        let backend = Arc::new(MemoryStateStore::default());
        let registry = DatabaseRegistry::open(backend.clone(), options).await;
        (backend, registry)
    }

    async fn open() -> (Arc<MemoryStateStore>, DatabaseRegistry) {
        open_with(RegistryOptions::default()).await
    }

    #[tokio::test]
    async fn create_issues_passcode_matching_stored_digest() -> Result<(), anyhow::Error> {
        let (backend, reg) = open().await;
        let created = reg.create("testdb1").await?;
        assert_eq!(created.passcode.len(), credentials::PASSCODE_LEN);

        let saved = backend.saved();
        assert_eq!(saved.credentials["testdb1"].passcode_hash, hash_passcode(&created.passcode));
        assert_eq!(saved.credentials["testdb1"].created_at, created.created_at);
        assert!(saved.registry["testdb1"].is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_bad_names() -> Result<(), anyhow::Error> {
        let (_, reg) = open().await;
        reg.create("testdb1").await?;
        assert!(matches!(reg.create("testdb1").await, Err(ServiceError::DatabaseExists)));
        assert!(matches!(reg.create("db").await, Err(ServiceError::InvalidName(_))));
        assert_eq!(reg.database_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn put_then_get_entry_round_trips() -> Result<(), anyhow::Error> {
        let (_, reg) = open().await;
        let p = reg.create("testdb1").await?.passcode;
        let value = json!({"x": 1, "nested": {"list": [1, "two", null, true, 2.5]}});

        reg.put("testdb1", "a", value.clone(), Some(&p)).await?;
        assert_eq!(reg.get_entry("testdb1", "a", Some(&p)).await?, value);

        // silent overwrite
        reg.put("testdb1", "a", json!("replaced"), Some(&p)).await?;
        assert_eq!(reg.get_entry("testdb1", "a", Some(&p)).await?, json!("replaced"));
        Ok(())
    }

    #[tokio::test]
    async fn checks_run_in_order() -> Result<(), anyhow::Error> {
        let (_, reg) = open().await;
        let p = reg.create("testdb1").await?.passcode;

        assert!(matches!(reg.get("x!", Some(&p)).await, Err(ServiceError::InvalidName(_))));
        assert!(matches!(reg.get("nowhere", Some(&p)).await, Err(ServiceError::DatabaseNotFound)));
        assert!(matches!(reg.get("testdb1", None).await, Err(ServiceError::MissingPasscode)));
        assert!(matches!(reg.get("testdb1", Some("wrong")).await, Err(ServiceError::InvalidPasscode)));
        // key presence is only checked once the passcode is accepted
        assert!(matches!(reg.put("testdb1", "", json!(1), Some("wrong")).await, Err(ServiceError::InvalidPasscode)));
        assert!(matches!(reg.put("testdb1", "", json!(1), Some(&p)).await, Err(ServiceError::KeyNotFound(_))));
        assert!(matches!(reg.put("nowhere", "k", json!(1), Some(&p)).await, Err(ServiceError::DatabaseNotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn passcodes_do_not_cross_databases() -> Result<(), anyhow::Error> {
        let (_, reg) = open().await;
        let p1 = reg.create("first").await?.passcode;
        let p2 = reg.create("second").await?.passcode;
        assert!(matches!(reg.get("first", Some(&p2)).await, Err(ServiceError::InvalidPasscode)));
        assert!(reg.get("second", Some(&p2)).await.is_ok());
        assert!(reg.get("first", Some(&p1)).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn entry_operations_report_missing_keys() -> Result<(), anyhow::Error> {
        let (_, reg) = open().await;
        let p = reg.create("testdb1").await?.passcode;
        reg.put("testdb1", "a", json!(1), Some(&p)).await?;
        reg.put("testdb1", "b", json!(2), Some(&p)).await?;

        assert!(matches!(reg.get_entry("testdb1", "zz", Some(&p)).await, Err(ServiceError::KeyNotFound(_))));
        assert!(matches!(reg.edit_entry("testdb1", "zz", json!(0), Some(&p)).await, Err(ServiceError::KeyNotFound(_))));

        reg.edit_entry("testdb1", "a", json!({"whole": "replacement"}), Some(&p)).await?;
        reg.delete_entry("testdb1", "b", Some(&p)).await?;
        assert!(matches!(reg.delete_entry("testdb1", "b", Some(&p)).await, Err(ServiceError::KeyNotFound(_))));

        let all = reg.get("testdb1", Some(&p)).await?;
        assert_eq!(serde_json::Value::Object(all), json!({"a": {"whole": "replacement"}}));
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_database_and_credentials_once() -> Result<(), anyhow::Error> {
        let (backend, reg) = open().await;
        let p = reg.create("testdb1").await?.passcode;
        reg.delete("testdb1", Some(&p)).await?;

        let saved = backend.saved();
        assert!(saved.registry.is_empty());
        assert!(saved.credentials.is_empty());
        assert!(matches!(reg.delete("testdb1", Some(&p)).await, Err(ServiceError::DatabaseNotFound)));
        assert!(matches!(reg.get("testdb1", Some(&p)).await, Err(ServiceError::DatabaseNotFound)));
        // name is free again
        reg.create("testdb1").await?;
        Ok(())
    }

    #[tokio::test]
    async fn query_filters_and_requires_passcode() -> Result<(), anyhow::Error> {
        let (_, reg) = open().await;
        let p = reg.create("people").await?.passcode;
        reg.put("people", "ann", json!({"city": "Oslo"}), Some(&p)).await?;
        reg.put("people", "bob", json!({"city": "Lima"}), Some(&p)).await?;

        let hits = reg.query("people", Some("OSLO"), Some(&p)).await?;
        assert_eq!(hits.keys().collect::<Vec<_>>(), vec!["ann"]);
        assert_eq!(reg.query("people", None, Some(&p)).await?.len(), 2);
        assert!(reg.query("people", Some("nothing"), Some(&p)).await?.is_empty());
        assert!(matches!(reg.query("people", None, None).await, Err(ServiceError::MissingPasscode)));
        Ok(())
    }

    #[tokio::test]
    async fn every_operation_flushes_by_default() -> Result<(), anyhow::Error> {
        let (backend, reg) = open().await;
        let p = reg.create("testdb1").await?.passcode;
        assert_eq!(backend.flush_count(), 1);
        reg.get("testdb1", Some(&p)).await?;
        assert_eq!(backend.flush_count(), 2);
        let _ = reg.get("testdb1", Some("wrong")).await;
        assert_eq!(backend.flush_count(), 3);
        reg.backup().await?;
        assert_eq!(backend.flush_count(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn mutations_only_flush_when_configured() -> Result<(), anyhow::Error> {
        let (backend, reg) = open_with(RegistryOptions { flush_on_read: false }).await;
        let p = reg.create("testdb1").await?.passcode;
        reg.get("testdb1", Some(&p)).await?;
        let _ = reg.create("testdb1").await;
        let _ = reg.get("testdb1", Some("wrong")).await;
        assert_eq!(backend.flush_count(), 1);
        reg.put("testdb1", "k", json!(true), Some(&p)).await?;
        assert_eq!(backend.flush_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn backup_snapshots_registry_only() -> Result<(), anyhow::Error> {
        let (backend, reg) = open().await;
        let p = reg.create("testdb1").await?.passcode;
        reg.put("testdb1", "a", json!({"x": 1}), Some(&p)).await?;
        reg.backup().await?;
        let backup = backend.backup.lock().unwrap().clone().unwrap_or_default();
        assert_eq!(backup, backend.saved().registry);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_operations_leave_memory_and_disk_in_step() -> Result<(), anyhow::Error> {
        let (backend, reg) = open().await;
        let shared = reg.create("shared").await?.passcode;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let reg = reg.clone();
            let shared = shared.clone();
            tasks.push(tokio::spawn(async move {
                let name = format!("worker_{i:02}");
                let p = reg.create(&name).await?.passcode;
                for k in 0..8 {
                    reg.put(&name, &format!("k{k}"), json!(k), Some(&p)).await?;
                    reg.put("shared", &format!("w{i}_k{k}"), json!(i), Some(&shared)).await?;
                }
                reg.delete_entry(&name, "k0", Some(&p)).await?;
                reg.delete_entry("shared", &format!("w{i}_k0"), Some(&shared)).await?;
                if i % 4 == 0 {
                    reg.delete(&name, Some(&p)).await?;
                }
                Ok::<_, ServiceError>(())
            }));
        }
        for task in tasks {
            task.await??;
        }

        let saved = backend.saved();
        let state = reg.inner.lock().await;
        assert_eq!(saved.registry, state.registry);
        assert!(saved.credentials.keys().eq(state.credentials.keys()));
        assert!(saved.registry.keys().eq(saved.credentials.keys()));

        // 1 shared + 16 workers - 4 deleted
        assert_eq!(state.registry.len(), 13);
        assert_eq!(state.registry["shared"].len(), 16 * 7);
        assert_eq!(state.registry["worker_01"].len(), 7);
        assert!(!state.registry.contains_key("worker_04"));
        Ok(())
    }

    #[tokio::test]
    async fn reopening_reproduces_state() -> Result<(), anyhow::Error> {
        let (backend, reg) = open().await;
        let p = reg.create("testdb1").await?.passcode;
        reg.put("testdb1", "a", json!({"x": 1}), Some(&p)).await?;
        let before = backend.saved();

        let reopened = DatabaseRegistry::open(Arc::new(MemoryStateStore::with_state(before.clone())), RegistryOptions::default()).await;
        assert_eq!(reopened.get_entry("testdb1", "a", Some(&p)).await?, json!({"x": 1}));
        assert_eq!(reopened.database_count().await, 1);
        Ok(())
    }
}
