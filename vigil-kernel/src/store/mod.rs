/**
 * METRIC STORE - Persistance append-only des échantillons
 *
 * RÔLE :
 * Collection unique d'échantillons immuables, avec deux chemins de lecture
 * ordonnés par ts : (owner, host, ts) pour le tail, (owner, ts) pour hosts.
 *
 * FONCTIONNEMENT :
 * - MetricStore trait = interface commune (insert + scans newest-first)
 * - MemoryStore = index BTreeMap en mémoire
 * - JournalStore = MemoryStore + journal JSON-lines rejoué au démarrage
 *
 * INVARIANTS :
 * - Aucun update/delete, aucune déduplication de (owner, host, ts)
 * - L'ordre d'insertion n'a pas à suivre ts
 * - Les scans ne sortent jamais du périmètre d'un owner
 */

mod journal;
mod memory;

pub use journal::JournalStore;
pub use memory::MemoryStore;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::StoredSample;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interface commune des stores de métriques
pub trait MetricStore: Send + Sync {
    /// Ajoute un enregistrement (jamais modifié ensuite)
    fn insert(&self, record: StoredSample) -> Result<(), StoreError>;

    /// Jusqu'à `limit` échantillons de (owner, host), ts décroissant
    fn latest_for_host(&self, owner: &str, host: &str, limit: usize) -> Result<Vec<StoredSample>, StoreError>;

    /// Jusqu'à `limit` échantillons de owner tous hosts confondus, ts décroissant
    fn latest_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<StoredSample>, StoreError>;

    /// Nombre total d'enregistrements, tous owners
    fn len(&self) -> usize;

    fn info(&self) -> StoreInfo;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreInfo {
    pub kind: String,
    pub description: String,
}

/// Choisit le backend selon la config : journal si un chemin est donné
pub fn open_store(journal_path: Option<&Path>) -> Result<Arc<dyn MetricStore>, StoreError> {
    match journal_path {
        Some(path) => {
            let store = JournalStore::open(path)?;
            info!(path = %path.display(), records = store.len(), "journal store ready");
            Ok(Arc::new(store))
        }
        None => {
            info!("no journal configured, samples kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Store dont l'insert numéro `fail_on` (1-based) échoue ; les autres passent
#[cfg(test)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_on: usize,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FailingStore {
    pub fn new(fail_on: usize) -> Self {
        Self { inner: MemoryStore::new(), fail_on, calls: Default::default() }
    }
}

#[cfg(test)]
impl MetricStore for FailingStore {
    fn insert(&self, record: StoredSample) -> Result<(), StoreError> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.insert(record)
    }

    fn latest_for_host(&self, owner: &str, host: &str, limit: usize) -> Result<Vec<StoredSample>, StoreError> {
        self.inner.latest_for_host(owner, host, limit)
    }

    fn latest_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<StoredSample>, StoreError> {
        self.inner.latest_for_owner(owner, limit)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn info(&self) -> StoreInfo {
        self.inner.info()
    }
}
