//! Service registry: configured services and their persisted defaults
//!
//! Key membership is fixed once loaded. The only runtime mutation is a
//! service's `default_params`, and the file is always rewritten in full.
//! A committed change reaches memory only after the file write succeeded.

use crate::error::{ManagerError, ManagerResult};
use crate::params::LaunchParams;
use crate::service::{ServiceConfig, ServiceDefinition};
use crate::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

/// On-disk shape of the registry file
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Thread-safe registry of configured services
pub struct ServiceRegistry {
    path: PathBuf,
    storage: Arc<dyn StorageBackend>,
    services: RwLock<BTreeMap<String, ServiceDefinition>>,
    /// Held across snapshot, write and in-memory install
    persist_lock: Mutex<()>,
    /// Memory holds changes the file does not
    dirty: AtomicBool,
}

impl ServiceRegistry {
    /// Build a registry from in-memory configs without touching storage
    pub fn from_configs(
        path: PathBuf,
        storage: Arc<dyn StorageBackend>,
        configs: BTreeMap<String, ServiceConfig>,
    ) -> ManagerResult<Self> {
        let services = configs
            .into_iter()
            .map(|(key, config)| {
                let definition = ServiceDefinition::from_config(&key, config)?;
                Ok((key, definition))
            })
            .collect::<ManagerResult<BTreeMap<_, _>>>()?;

        Ok(Self {
            path,
            storage,
            services: RwLock::new(services),
            persist_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        })
    }

    /// Load the registry from storage. A missing file yields an empty registry.
    /// FAILS HARD on a corrupted file or an unresolvable service entry
    pub async fn load(path: PathBuf, storage: Arc<dyn StorageBackend>) -> ManagerResult<Self> {
        let content = storage.load(&path).await.map_err(ManagerError::io)?;

        let Some(content) = content else {
            tracing::info!(path = %path.display(), "No registry file found, starting empty");
            return Self::from_configs(path, storage, BTreeMap::new());
        };

        let file: RegistryFile = toml::from_str(&content).map_err(|e| ManagerError::Config {
            message: format!("Failed to parse registry file {}: {e}", path.display()),
        })?;

        let registry = Self::from_configs(path, storage, file.services)?;

        tracing::info!(
            path = %registry.path.display(),
            services = registry.len().await,
            "Service registry loaded"
        );

        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a snapshot of a service definition
    pub async fn get(&self, key: &str) -> Option<ServiceDefinition> {
        self.services.read().await.get(key).cloned()
    }

    /// All services, ordered by key
    pub async fn list(&self) -> Vec<ServiceDefinition> {
        self.services.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }

    /// Replace a service's default params in memory only; the caller must
    /// [`persist`](Self::persist). Returns the previous value.
    pub async fn update_default_params(
        &self,
        key: &str,
        params: LaunchParams,
    ) -> ManagerResult<Option<LaunchParams>> {
        let mut services = self.services.write().await;
        let service = services
            .get_mut(key)
            .ok_or_else(|| ManagerError::not_found(key))?;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(service.config.default_params.replace(params))
    }

    /// Whether memory holds updates not yet written to storage
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Write `params` to storage together with the rest of the registry,
    /// then install them in memory. On a failed write nothing changes.
    pub async fn commit_default_params(&self, key: &str, params: LaunchParams) -> ManagerResult<()> {
        let _guard = self.persist_lock.lock().await;

        let was_dirty = self.dirty.swap(false, Ordering::SeqCst);
        let mut file = self.snapshot().await;
        let Some(entry) = file.services.get_mut(key) else {
            if was_dirty {
                self.dirty.store(true, Ordering::SeqCst);
            }
            return Err(ManagerError::not_found(key));
        };
        entry.default_params = Some(params.clone());

        if let Err(e) = self.write(&file).await {
            if was_dirty {
                self.dirty.store(true, Ordering::SeqCst);
            }
            tracing::error!(service = %key, error = %e, "Persist failed, default params unchanged");
            return Err(e);
        }

        if let Some(service) = self.services.write().await.get_mut(key) {
            service.config.default_params = Some(params);
        }

        Ok(())
    }

    /// Serialize the complete registry to storage
    pub async fn persist(&self) -> ManagerResult<()> {
        let _guard = self.persist_lock.lock().await;

        let was_dirty = self.dirty.swap(false, Ordering::SeqCst);
        let file = self.snapshot().await;
        if let Err(e) = self.write(&file).await {
            if was_dirty {
                self.dirty.store(true, Ordering::SeqCst);
            }
            return Err(e);
        }

        Ok(())
    }

    /// Persist only when memory has drifted from storage. Returns whether a
    /// write happened.
    pub async fn persist_if_dirty(&self) -> ManagerResult<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    async fn snapshot(&self) -> RegistryFile {
        RegistryFile {
            services: self
                .services
                .read()
                .await
                .iter()
                .map(|(key, def)| (key.clone(), def.config.clone()))
                .collect(),
        }
    }

    async fn write(&self, file: &RegistryFile) -> ManagerResult<()> {
        let content = toml::to_string_pretty(file)
            .map_err(|e| ManagerError::io(format!("Failed to serialize registry: {e}")))?;

        self.storage
            .save(&self.path, &content)
            .await
            .map_err(|e| ManagerError::io(format!("{e:#}")))?;

        tracing::debug!(
            path = %self.path.display(),
            services = file.services.len(),
            "Registry persisted"
        );

        Ok(())
    }
}
