//! File-backed encoding catalog.
//!
//! On disk the catalog is one JSON document holding two parallel arrays,
//! enrollee ids and their vectors, plus a format version and a SHA-256
//! checksum. The whole file is rewritten atomically on every mutation;
//! that is fine for a school-sized enrollment but does not scale to large
//! catalogs. A different layout must bump `CATALOG_VERSION` and migrate.

use rollcall_core::types::UpsertOutcome;
use rollcall_core::{CatalogError, EncodingCatalog};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

const CATALOG_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum EncodingStoreError {
    #[error("catalog I/O: {0}")]
    Io(#[from] io::Error),
    #[error("catalog encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("unsupported catalog version {0}")]
    UnsupportedVersion(u32),
    #[error("catalog checksum mismatch")]
    ChecksumMismatch,
}

#[derive(Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    dimension: Option<usize>,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    checksum: String,
}

fn checksum(ids: &[String], vectors: &[Vec<f32>]) -> String {
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update((id.len() as u64).to_le_bytes());
        hasher.update(id.as_bytes());
    }
    for vector in vectors {
        hasher.update((vector.len() as u64).to_le_bytes());
        for value in vector {
            hasher.update(value.to_le_bytes());
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn encode(catalog: &EncodingCatalog) -> Result<Vec<u8>, EncodingStoreError> {
    let (ids, vectors) = catalog.to_parts();
    let file = CatalogFile {
        version: CATALOG_VERSION,
        dimension: catalog.dimension(),
        checksum: checksum(&ids, &vectors),
        ids,
        vectors,
    };
    Ok(serde_json::to_vec(&file)?)
}

fn decode(bytes: &[u8]) -> Result<EncodingCatalog, EncodingStoreError> {
    let file: CatalogFile = serde_json::from_slice(bytes)?;
    if file.version != CATALOG_VERSION {
        return Err(EncodingStoreError::UnsupportedVersion(file.version));
    }
    if checksum(&file.ids, &file.vectors) != file.checksum {
        return Err(EncodingStoreError::ChecksumMismatch);
    }
    let catalog = EncodingCatalog::from_parts(file.ids, file.vectors)?;
    if let (Some(declared), Some(actual)) = (file.dimension, catalog.dimension()) {
        if declared != actual {
            return Err(CatalogError::DimensionMismatch {
                expected: declared,
                actual,
            }
            .into());
        }
    }
    Ok(catalog)
}

/// Read the catalog at `path`. A missing file is an empty catalog; an
/// unreadable or corrupt one is also treated as empty, with a warning, so
/// that enrollment keeps working.
fn read_catalog(path: &Path) -> EncodingCatalog {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no encoding catalog yet; starting empty");
            return EncodingCatalog::new();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "encoding catalog unreadable; starting empty");
            return EncodingCatalog::new();
        }
    };

    match decode(&bytes) {
        Ok(catalog) => {
            tracing::info!(path = %path.display(), enrolled = catalog.len(), "encoding catalog loaded");
            catalog
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "encoding catalog corrupt; starting empty");
            EncodingCatalog::new()
        }
    }
}

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
    if let Some(dir) = dir {
        fs::create_dir_all(dir)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "catalog".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)
}

/// The persistent catalog plus the in-memory copy matchers read from.
///
/// Readers get an immutable `Arc` snapshot; writers build a new catalog,
/// persist it and swap it in, so a scan never observes a half-applied
/// mutation.
pub struct EncodingStore {
    path: PathBuf,
    current: RwLock<Arc<EncodingCatalog>>,
    writer: Mutex<()>,
}

impl EncodingStore {
    /// Open the store and load whatever catalog is on disk.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let catalog = read_catalog(&path);
        Self {
            path,
            current: RwLock::new(Arc::new(catalog)),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the catalog from disk and make it current.
    pub fn load(&self) -> Arc<EncodingCatalog> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let catalog = Arc::new(read_catalog(&self.path));
        self.swap(catalog.clone());
        catalog
    }

    /// Current catalog, safe to scan while writers proceed.
    pub fn snapshot(&self) -> Arc<EncodingCatalog> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Persist `catalog` in full and make it current.
    pub fn save(&self, catalog: EncodingCatalog) -> Result<(), EncodingStoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.persist(catalog)
    }

    /// Add or replace the signature for `enrollee_id`, then save.
    pub fn upsert(&self, enrollee_id: &str, vector: Vec<f32>) -> Result<UpsertOutcome, EncodingStoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*self.snapshot()).clone();
        let outcome = next.upsert(enrollee_id, vector)?;
        self.persist(next)?;
        tracing::info!(enrollee_id, ?outcome, "signature enrolled");
        Ok(outcome)
    }

    /// Delete an enrollee. Returns false (and writes nothing) if absent.
    pub fn remove(&self, enrollee_id: &str) -> Result<bool, EncodingStoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*self.snapshot()).clone();
        if !next.remove(enrollee_id) {
            return Ok(false);
        }
        self.persist(next)?;
        tracing::info!(enrollee_id, "signature removed");
        Ok(true)
    }

    /// Caller must hold `writer`.
    fn persist(&self, catalog: EncodingCatalog) -> Result<(), EncodingStoreError> {
        let bytes = encode(&catalog)?;
        write_atomic(&self.path, &bytes)?;
        self.swap(Arc::new(catalog));
        Ok(())
    }

    fn swap(&self, catalog: Arc<EncodingCatalog>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = catalog;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> EncodingStore {
        EncodingStore::open(dir.path().join("facial_data").join("encodings.json"))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.snapshot().is_empty());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_upsert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.upsert("S1", vec![0.1, 0.2]).unwrap();
        store.upsert("S2", vec![0.3, 0.4]).unwrap();

        let reopened = store_in(&dir);
        let catalog = reopened.snapshot();
        assert_eq!(catalog.ids(), vec!["S1", "S2"]);
        assert_eq!(catalog.get("S2").unwrap().vector, vec![0.3, 0.4]);
    }

    #[test]
    fn test_upsert_same_id_keeps_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.upsert("S1", vec![1.0, 0.0]).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert("S1", vec![0.0, 1.0]).unwrap(), UpsertOutcome::Replaced);

        let catalog = store_in(&dir).snapshot();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("S1").unwrap().vector, vec![0.0, 1.0]);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.upsert("S1", vec![1.0]).unwrap();

        let before = store.snapshot();
        store.upsert("S2", vec![2.0]).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn test_corrupt_file_is_empty_and_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encodings.json");
        fs::write(&path, b"{ not json").unwrap();

        let store = EncodingStore::open(&path);
        assert!(store.snapshot().is_empty());

        // Enrollment still works and overwrites the corrupt file.
        store.upsert("S1", vec![0.5]).unwrap();
        assert_eq!(EncodingStore::open(&path).snapshot().len(), 1);
    }

    #[test]
    fn test_tampered_checksum_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encodings.json");
        let store = EncodingStore::open(&path);
        store.upsert("S1", vec![0.5, 0.5]).unwrap();

        let tampered = fs::read_to_string(&path).unwrap().replace("\"S1\"", "\"S9\"");
        fs::write(&path, tampered).unwrap();
        assert!(matches!(decode(&fs::read(&path).unwrap()), Err(EncodingStoreError::ChecksumMismatch)));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_parallel_arrays_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encodings.json");
        let store = EncodingStore::open(&path);
        store.upsert("S1", vec![1.0, 2.0]).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["dimension"], 2);
        assert_eq!(value["ids"], serde_json::json!(["S1"]));
        assert_eq!(value["vectors"], serde_json::json!([[1.0, 2.0]]));
    }

    #[test]
    fn test_dimension_mismatch_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.upsert("S1", vec![1.0, 2.0]).unwrap();
        assert!(matches!(
            store.upsert("S2", vec![1.0]),
            Err(EncodingStoreError::Catalog(CatalogError::DimensionMismatch { .. }))
        ));
        assert_eq!(store_in(&dir).snapshot().len(), 1);
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.upsert("S1", vec![1.0]).unwrap();
        assert!(store.remove("S1").unwrap());
        assert!(!store.remove("S1").unwrap());
        assert!(store_in(&dir).snapshot().is_empty());
    }
}
