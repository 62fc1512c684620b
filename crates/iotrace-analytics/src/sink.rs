//! Destinations for result documents.
//!
//! A sink receives already-rendered JSON under a bare file name. `finish`
//! records what was written in a manifest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use iotrace_types::{make_error_msg, Result, Status, TraceCode};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub generator: String,
    pub documents: Vec<ManifestEntry>,
}

pub trait DocumentSink: Send + Sync {
    /// Stores one document. Writing the same name again replaces it.
    fn write_document(&self, name: &str, json: &str) -> Result<()>;

    /// Number of documents written since creation, replacements included.
    fn total_written(&self) -> u64;

    fn finish(&self) -> Result<Manifest>;
}

/// Serializes `doc` as pretty JSON and hands it to `sink`.
pub fn write_json<T: Serialize>(sink: &dyn DocumentSink, name: &str, doc: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)?;
    sink.write_document(name, &json)
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return make_error_msg(
            TraceCode::EXPORT_FAILED,
            format!("'{}' is not a plain document name", name),
        );
    }
    Ok(())
}

fn manifest_from(documents: &BTreeMap<String, u64>) -> Manifest {
    Manifest {
        generated_at: Utc::now(),
        generator: format!("iotrace {}", env!("CARGO_PKG_VERSION")),
        documents: documents
            .iter()
            .map(|(name, &bytes)| ManifestEntry {
                name: name.clone(),
                bytes,
            })
            .collect(),
    }
}

/// Writes each document as a file in one directory.
pub struct JsonDirSink {
    dir: PathBuf,
    documents: Mutex<BTreeMap<String, u64>>,
    total: AtomicU64,
}

impl JsonDirSink {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Status::with_message(
                TraceCode::EXPORT_FAILED,
                format!("create {}: {}", dir.display(), e),
            )
        })?;
        tracing::debug!(dir = %dir.display(), "document directory ready");
        Ok(Self {
            dir,
            documents: Mutex::new(BTreeMap::new()),
            total: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_file(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.dir.join(name);
        fs::write(&path, contents).map_err(|e| {
            Status::with_message(
                TraceCode::EXPORT_FAILED,
                format!("write {}: {}", path.display(), e),
            )
        })
    }
}

impl DocumentSink for JsonDirSink {
    fn write_document(&self, name: &str, json: &str) -> Result<()> {
        check_name(name)?;
        self.write_file(name, json)?;
        self.documents.lock().insert(name.to_string(), json.len() as u64);
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn total_written(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn finish(&self) -> Result<Manifest> {
        let manifest = manifest_from(&self.documents.lock());
        let json = serde_json::to_string_pretty(&manifest)?;
        self.write_file(MANIFEST_FILE, &json)?;
        tracing::info!(
            dir = %self.dir.display(),
            documents = manifest.documents.len(),
            "documents exported"
        );
        Ok(manifest)
    }
}

/// Keeps documents in memory for inspection.
#[derive(Default)]
pub struct InMemorySink {
    documents: Mutex<BTreeMap<String, String>>,
    total: AtomicU64,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.documents.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.documents.lock().keys().cloned().collect()
    }
}

impl DocumentSink for InMemorySink {
    fn write_document(&self, name: &str, json: &str) -> Result<()> {
        check_name(name)?;
        self.documents.lock().insert(name.to_string(), json.to_string());
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn total_written(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn finish(&self) -> Result<Manifest> {
        let sizes: BTreeMap<String, u64> = self
            .documents
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.len() as u64))
            .collect();
        Ok(manifest_from(&sizes))
    }
}
