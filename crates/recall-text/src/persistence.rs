//! On-disk persistence of sparse indexes.
//!
//! Layout under the persistence root:
//!
//! ```text
//! index_metadata.json                    catalogue: collection -> record
//! <collection>.<generation>.index.json   BM25 statistics
//! <collection>.<generation>.docs.json    document snapshot
//! <collection>.<generation>.tokens.json  tokenized documents
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place. A new
//! save writes a fresh generation of blobs before the catalogue is switched
//! to them, so the catalogue never points at a partially written set. Blobs
//! of the replaced generation are deleted afterwards.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use recall_core::{Document, Error, Result};

use crate::bm25::{Bm25Stats, SparseIndex, INDEX_SCHEMA_VERSION};

pub const CATALOGUE_FILE: &str = "index_metadata.json";
const INDEX_SUFFIX: &str = ".index.json";
const DOCS_SUFFIX: &str = ".docs.json";
const TOKENS_SUFFIX: &str = ".tokens.json";
const BLOB_SUFFIXES: [&str; 3] = [INDEX_SUFFIX, DOCS_SUFFIX, TOKENS_SUFFIX];

/// Content checksum of a collection: blake3 over every document's content,
/// concatenated in collection order.
///
/// Two collections whose contents concatenate to the same bytes (e.g. `["ab",
/// "c"]` and `["a", "bc"]`) share a checksum; the document count check
/// catches most of those and the rest is accepted.
pub fn checksum(documents: &[Document]) -> String {
    let mut hasher = blake3::Hasher::new();
    for d in documents { hasher.update(d.content.as_bytes()); }
    hasher.finalize().to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedIndexRecord {
    pub document_count: usize,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub index_file: String,
    pub documents_file: String,
    pub tokenized_file: String,
}

impl PersistedIndexRecord {
    fn blob_files(&self) -> [&str; 3] {
        [self.index_file.as_str(), self.documents_file.as_str(), self.tokenized_file.as_str()]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalogue {
    collections: BTreeMap<String, PersistedIndexRecord>,
}

/// Versioned envelope around every blob.
#[derive(Serialize, Deserialize)]
struct Blob<T> {
    schema_version: u32,
    payload: T,
}

pub struct IndexPersistence {
    root: PathBuf,
    catalogue: Mutex<Catalogue>,
    generation: AtomicU64,
}

impl IndexPersistence {
    /// Open (or create) a persistence root. An unreadable catalogue is
    /// replaced by an empty one; its blobs become orphans.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let path = root.join(CATALOGUE_FILE);
        let catalogue = if path.exists() {
            match read_json::<Catalogue>(&path) {
                Ok(c) => c,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "index catalogue unreadable, starting empty");
                    Catalogue::default()
                }
            }
        } else {
            Catalogue::default()
        };
        debug!(root = %root.display(), records = catalogue.collections.len(), "index persistence opened");
        Ok(Self { root, catalogue: Mutex::new(catalogue), generation: AtomicU64::new(0) })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn lock(&self) -> MutexGuard<'_, Catalogue> {
        self.catalogue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, collection: &str) -> Option<PersistedIndexRecord> {
        self.lock().collections.get(collection).cloned()
    }

    pub fn records(&self) -> Vec<(String, PersistedIndexRecord)> {
        self.lock().collections.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// True iff a record exists for `collection`, matches the live documents
    /// by count and checksum, and all of its blobs are on disk.
    pub fn is_valid(&self, collection: &str, live_documents: &[Document]) -> bool {
        let Some(record) = self.record(collection) else {
            debug!(collection, "no persisted index");
            return false;
        };
        if record.document_count != live_documents.len() {
            info!(collection, persisted = record.document_count, live = live_documents.len(), "persisted index stale: document count changed");
            return false;
        }
        if record.checksum != checksum(live_documents) {
            info!(collection, "persisted index stale: content checksum changed");
            return false;
        }
        if let Some(missing) = record.blob_files().into_iter().find(|f| !self.root.join(f).exists()) {
            warn!(collection, file = missing, "persisted index blob missing");
            return false;
        }
        true
    }

    pub fn save(&self, collection: &str, index: &SparseIndex) -> Result<PersistedIndexRecord> {
        fs::create_dir_all(&self.root)?;
        let created_at = Utc::now();
        let prefix = format!(
            "{}.{}-{}",
            file_stem(collection),
            created_at.timestamp_millis(),
            self.generation.fetch_add(1, Ordering::Relaxed)
        );
        let record = PersistedIndexRecord {
            document_count: index.len(),
            checksum: checksum(index.documents()),
            created_at,
            schema_version: INDEX_SCHEMA_VERSION,
            index_file: format!("{prefix}{INDEX_SUFFIX}"),
            documents_file: format!("{prefix}{DOCS_SUFFIX}"),
            tokenized_file: format!("{prefix}{TOKENS_SUFFIX}"),
        };

        // blobs first, outside the catalogue lock
        let written = self
            .write_blob(&record.index_file, index.stats())
            .and_then(|()| self.write_blob(&record.documents_file, &index.documents()))
            .and_then(|()| self.write_blob(&record.tokenized_file, &index.tokenized()));
        if let Err(e) = written {
            self.remove_blobs(&record);
            return Err(e);
        }

        let previous = {
            let mut catalogue = self.lock();
            let previous = catalogue.collections.insert(collection.to_string(), record.clone());
            if let Err(e) = self.write_catalogue(&catalogue) {
                match &previous {
                    Some(p) => catalogue.collections.insert(collection.to_string(), p.clone()),
                    None => catalogue.collections.remove(collection),
                };
                drop(catalogue);
                self.remove_blobs(&record);
                return Err(e);
            }
            previous
        };
        if let Some(previous) = previous { self.remove_blobs(&previous); }

        info!(collection, documents = record.document_count, checksum = %record.checksum, "sparse index persisted");
        Ok(record)
    }

    /// Load the persisted index for `collection`.
    ///
    /// Returns `None` when nothing is persisted. Unreadable, mismatched or
    /// unknown-version blobs are treated as corruption: the record and its
    /// blobs are discarded and `None` is returned so the caller rebuilds.
    pub fn load(&self, collection: &str) -> Option<SparseIndex> {
        let record = self.record(collection)?;
        match self.read_index(&record) {
            Ok(index) => {
                debug!(collection, documents = index.len(), "sparse index loaded from disk");
                Some(index)
            }
            Err(e) => {
                error!(collection, error = %e, "persisted index corrupt, discarding");
                // a concurrent save may already have replaced the record we failed to read
                if let Err(e) = self.delete_if(collection, &record) {
                    warn!(collection, error = %e, "failed to discard corrupt index record");
                }
                None
            }
        }
    }

    fn read_index(&self, record: &PersistedIndexRecord) -> Result<SparseIndex> {
        if record.schema_version != INDEX_SCHEMA_VERSION {
            return Err(Error::CorruptIndex(format!("unsupported record schema version {}", record.schema_version)));
        }
        let stats: Bm25Stats = self.read_blob(&record.index_file)?;
        let documents: Vec<Document> = self.read_blob(&record.documents_file)?;
        let tokenized: Vec<Vec<String>> = self.read_blob(&record.tokenized_file)?;
        if documents.len() != record.document_count || checksum(&documents) != record.checksum {
            return Err(Error::CorruptIndex("document snapshot does not match its record".into()));
        }
        SparseIndex::from_parts(stats, documents, tokenized)
    }

    /// Remove the record for `collection` together with its blobs.
    pub fn delete(&self, collection: &str) -> Result<bool> {
        let removed = {
            let mut catalogue = self.lock();
            let Some(removed) = catalogue.collections.remove(collection) else { return Ok(false) };
            self.write_catalogue(&catalogue)?;
            removed
        };
        self.remove_blobs(&removed);
        info!(collection, "persisted index deleted");
        Ok(true)
    }

    /// Remove the record for `collection` only if it is still `expected`.
    pub fn delete_if(&self, collection: &str, expected: &PersistedIndexRecord) -> Result<bool> {
        {
            let mut catalogue = self.lock();
            if catalogue.collections.get(collection) != Some(expected) { return Ok(false); }
            catalogue.collections.remove(collection);
            self.write_catalogue(&catalogue)?;
        }
        self.remove_blobs(expected);
        info!(collection, "persisted index deleted");
        Ok(true)
    }

    /// Delete every record (and its blobs) created more than `max_age_days` ago.
    pub fn cleanup_older_than(&self, max_age_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        let stale: Vec<(String, PersistedIndexRecord)> = {
            let mut catalogue = self.lock();
            let names: Vec<String> = catalogue
                .collections
                .iter()
                .filter(|(_, r)| r.created_at < cutoff)
                .map(|(name, _)| name.clone())
                .collect();
            if names.is_empty() { return Ok(0); }
            let stale = names
                .into_iter()
                .filter_map(|name| catalogue.collections.remove(&name).map(|r| (name, r)))
                .collect();
            self.write_catalogue(&catalogue)?;
            stale
        };
        for (name, record) in &stale {
            self.remove_blobs(record);
            info!(collection = %name, created_at = %record.created_at, "expired persisted index removed");
        }
        Ok(stale.len())
    }

    /// Delete blob files under the root that no record references.
    pub fn remove_orphans(&self) -> Result<usize> {
        let referenced: HashSet<String> = self
            .lock()
            .collections
            .values()
            .flat_map(|r| r.blob_files().map(str::to_string))
            .collect();
        let mut removed = 0;
        for entry in walkdir::WalkDir::new(&self.root).max_depth(1).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let name = entry.file_name().to_string_lossy();
            if !BLOB_SUFFIXES.iter().any(|s| name.ends_with(s)) || referenced.contains(&*name) { continue; }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    removed += 1;
                    debug!(file = %name, "orphaned index blob removed");
                }
                Err(e) => warn!(file = %name, error = %e, "failed to remove orphaned blob"),
            }
        }
        if removed > 0 { info!(removed, "orphaned index blobs removed"); }
        Ok(removed)
    }

    fn write_blob<T: Serialize + ?Sized>(&self, file: &str, payload: &T) -> Result<()> {
        write_json_atomic(&self.root, &self.root.join(file), &Blob { schema_version: INDEX_SCHEMA_VERSION, payload })
    }

    fn read_blob<T: DeserializeOwned>(&self, file: &str) -> Result<T> {
        let blob: Blob<T> = read_json(&self.root.join(file))?;
        if blob.schema_version != INDEX_SCHEMA_VERSION {
            return Err(Error::CorruptIndex(format!("{file}: unsupported blob schema version {}", blob.schema_version)));
        }
        Ok(blob.payload)
    }

    fn write_catalogue(&self, catalogue: &Catalogue) -> Result<()> {
        write_json_atomic(&self.root, &self.root.join(CATALOGUE_FILE), catalogue)
    }

    fn remove_blobs(&self, record: &PersistedIndexRecord) {
        for file in record.blob_files() {
            match fs::remove_file(self.root.join(file)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file, error = %e, "failed to remove index blob"),
            }
        }
    }
}

/// Map a collection name onto a safe file stem.
fn file_stem(collection: &str) -> String {
    let stem: String = collection
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "_".to_string() } else { stem }
}

fn write_json_atomic<T: Serialize + ?Sized>(dir: &Path, path: &Path, value: &T) -> Result<()> {
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
