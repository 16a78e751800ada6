/**
 * JOURNAL STORE - Persistance fichier des échantillons
 *
 * Chaque insert ajoute une ligne JSON au journal puis indexe en mémoire.
 * Au démarrage le journal est rejoué ; une ligne illisible est ignorée
 * (warning) pour ne pas bloquer le kernel sur un fichier tronqué.
 */

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use super::{MemoryStore, MetricStore, StoreError, StoreInfo};
use crate::models::StoredSample;

pub struct JournalStore {
    path: PathBuf,
    file: Mutex<File>,
    index: MemoryStore,
}

impl JournalStore {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let index = MemoryStore::new();
        let replayed = Self::replay(&path, &index)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), replayed, "journal opened");

        Ok(Self { path, file: Mutex::new(file), index })
    }

    fn replay(path: &Path, index: &MemoryStore) -> Result<usize, StoreError> {
        if !path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(File::open(path)?);
        let mut count = 0;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredSample>(&line) {
                Ok(record) => {
                    index.insert(record)?;
                    count += 1;
                }
                Err(e) => warn!(line = lineno + 1, error = %e, "skipping unreadable journal line"),
            }
        }
        Ok(count)
    }
}

impl MetricStore for JournalStore {
    fn insert(&self, record: StoredSample) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        {
            let mut file = self.file.lock();
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        self.index.insert(record)
    }

    fn latest_for_host(&self, owner: &str, host: &str, limit: usize) -> Result<Vec<StoredSample>, StoreError> {
        self.index.latest_for_host(owner, host, limit)
    }

    fn latest_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<StoredSample>, StoreError> {
        self.index.latest_for_owner(owner, limit)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn info(&self) -> StoreInfo {
        StoreInfo {
            kind: "journal".to_string(),
            description: format!("JSON-lines journal at {}", self.path.display()),
        }
    }
}
