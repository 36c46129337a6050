//! Raw document storage on the local filesystem
//!
//! Each match document lives at `<key>.xml`, next to a `<key>.meta.json`
//! sidecar holding the original match id, fetch time and a blake3 checksum.
//! Ids that are already safe file names are their own key; any other id is
//! sanitized and tagged with a hash of the raw id, so two ids never share a
//! file. Writes go through a temporary file and a rename, so a crash never
//! leaves a half-written document behind.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const DOCUMENT_EXT: &str = "xml";
const META_SUFFIX: &str = ".meta.json";
/// Separates a sanitized id from its hash; never part of a plain key
const HASH_SEPARATOR: char = '~';
const HASH_DIGITS: usize = 16;

/// Sidecar metadata for a stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub match_id: String,
    pub fetched_at: DateTime<Utc>,
    pub checksum: String,
    pub size: u64,
}

/// A document read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub meta: DocumentMeta,
    pub bytes: Vec<u8>,
}

/// Filesystem-backed document store keyed by match id
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("static key pattern"))
}

/// File-name key for a match id.
///
/// `m-1.x` stays `m-1.x`; `sr:sport_event:1` becomes
/// `sr_sport_event_1~<16 hex digits of blake3("sr:sport_event:1")>`.
pub fn document_key(match_id: &str) -> String {
    let plain = !match_id.is_empty()
        && !match_id.starts_with('.')
        && !key_pattern().is_match(match_id);
    if plain {
        return match_id.to_string();
    }

    let sanitized = key_pattern().replace_all(match_id, "_");
    let digest = blake3::hash(match_id.as_bytes()).to_hex();
    format!(
        "{}{}{}",
        sanitized.trim_start_matches('.'),
        HASH_SEPARATOR,
        &digest.as_str()[..HASH_DIGITS]
    )
}

impl DocumentStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!("Document store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, DOCUMENT_EXT))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", key, META_SUFFIX))
    }

    fn read_meta(&self, key: &str) -> Result<Option<DocumentMeta>> {
        let path = self.meta_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Whether a document for this match id is stored
    pub fn has(&self, match_id: &str) -> bool {
        let key = document_key(match_id);
        if !self.document_path(&key).exists() {
            return false;
        }
        match self.read_meta(&key) {
            Ok(Some(meta)) => meta.match_id == match_id,
            // A document without readable metadata still occupies the key
            Ok(None) | Err(_) => true,
        }
    }

    /// Store a document. Refuses to overwrite an existing one.
    pub fn put(&self, match_id: &str, bytes: &[u8]) -> Result<DocumentMeta> {
        let key = document_key(match_id);
        let doc_path = self.document_path(&key);
        if doc_path.exists() {
            return Err(Error::DocumentExists(match_id.to_string()));
        }

        let meta = DocumentMeta {
            match_id: match_id.to_string(),
            fetched_at: Utc::now(),
            checksum: blake3::hash(bytes).to_hex().to_string(),
            size: bytes.len() as u64,
        };

        // Sidecar first: a document is only visible once its file is renamed in
        write_atomic(&self.meta_path(&key), serde_json::to_string_pretty(&meta)?.as_bytes())?;
        write_atomic(&doc_path, bytes)?;

        debug!("Stored {} ({} bytes) as {}", match_id, bytes.len(), key);
        Ok(meta)
    }

    /// Read a document, verifying its checksum. `None` when not stored.
    pub fn get(&self, match_id: &str) -> Result<Option<RawDocument>> {
        let key = document_key(match_id);
        let doc_path = self.document_path(&key);
        if !doc_path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&doc_path)?;
        let meta = match self.read_meta(&key)? {
            Some(meta) => {
                if meta.match_id != match_id {
                    return Ok(None);
                }
                if blake3::hash(&bytes).to_hex().as_str() != meta.checksum {
                    return Err(Error::CorruptDocument {
                        match_id: match_id.to_string(),
                    });
                }
                meta
            }
            None => {
                warn!("Document {} has no metadata sidecar", key);
                DocumentMeta {
                    match_id: match_id.to_string(),
                    fetched_at: modified_time(&doc_path),
                    checksum: blake3::hash(&bytes).to_hex().to_string(),
                    size: bytes.len() as u64,
                }
            }
        };

        Ok(Some(RawDocument { meta, bytes }))
    }

    /// Remove one document so the next extraction fetches it again
    pub fn delete(&self, match_id: &str) -> Result<bool> {
        let key = document_key(match_id);
        let doc_path = self.document_path(&key);
        let existed = doc_path.exists();
        if existed {
            fs::remove_file(&doc_path)?;
        }
        let meta_path = self.meta_path(&key);
        if meta_path.exists() {
            fs::remove_file(&meta_path)?;
        }
        if existed {
            info!("Forgot document {}", match_id);
        }
        Ok(existed)
    }

    /// Match ids of every stored document, ordered by key
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for key in self.keys()? {
            let id = match self.read_meta(&key) {
                Ok(Some(meta)) => meta.match_id,
                Ok(None) => key,
                Err(e) => {
                    warn!("Unreadable metadata for {}: {}", key, e);
                    key
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    /// Delete every stored document and sidecar. Returns the number of documents removed.
    pub fn purge(&self) -> Result<usize> {
        let keys = self.keys()?;
        for key in &keys {
            fs::remove_file(self.document_path(key))?;
            let meta_path = self.meta_path(key);
            if meta_path.exists() {
                fs::remove_file(meta_path)?;
            }
        }
        info!("Purged {} document(s) from {:?}", keys.len(), self.root);
        Ok(keys.len())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::Other(format!("Cannot list documents: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            keys.push(stem.to_string());
        }
        keys.sort();
        Ok(keys)
    }
}

fn modified_time(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Write through a dot-prefixed temporary file, then rename into place
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Other(format!("Invalid document path {:?}", path)))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOC: &[u8] = b"<sport_event_summary/>";

    #[test]
    fn test_document_key() {
        assert_eq!(document_key("plain-id_1.x"), "plain-id_1.x");

        let key = document_key("sr:sport_event:50850035");
        let (prefix, hash) = key.split_once(HASH_SEPARATOR).unwrap();
        assert_eq!(prefix, "sr_sport_event_50850035");
        assert_eq!(hash.len(), HASH_DIGITS);
        assert_eq!(key, document_key("sr:sport_event:50850035"));

        assert!(document_key(".hidden").starts_with("hidden~"));
        assert!(document_key("").starts_with('~'));
    }

    #[test]
    fn test_sanitized_lookalikes_get_distinct_keys() {
        let ids = ["a:b", "a_b", "a/b", "a b", "a%3Ab"];
        let keys: std::collections::HashSet<String> =
            ids.iter().map(|id| document_key(id)).collect();
        assert_eq!(keys.len(), ids.len());
    }

    #[test]
    fn test_put_get_has() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path().join("games")).unwrap();

        assert!(!store.has("sr:sport_event:1"));
        assert!(store.get("sr:sport_event:1").unwrap().is_none());

        let meta = store.put("sr:sport_event:1", DOC).unwrap();
        assert_eq!(meta.size, DOC.len() as u64);
        assert!(store.has("sr:sport_event:1"));
        assert!(tmp
            .path()
            .join("games")
            .join(format!("{}.xml", document_key("sr:sport_event:1")))
            .exists());

        let doc = store.get("sr:sport_event:1").unwrap().unwrap();
        assert_eq!(doc.bytes, DOC);
        assert_eq!(doc.meta.match_id, "sr:sport_event:1");
    }

    #[test]
    fn test_put_is_write_once() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();

        store.put("m1", DOC).unwrap();
        assert!(matches!(
            store.put("m1", b"<other/>"),
            Err(Error::DocumentExists(_))
        ));
        assert_eq!(store.get("m1").unwrap().unwrap().bytes, DOC);
    }

    #[test]
    fn test_lookalike_ids_are_stored_apart() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();

        store.put("a:b", DOC).unwrap();
        assert!(!store.has("a_b"));
        assert!(store.get("a_b").unwrap().is_none());

        store.put("a_b", b"<other/>").unwrap();
        assert!(store.has("a:b"));
        assert!(store.has("a_b"));
        assert_eq!(store.get("a:b").unwrap().unwrap().bytes, DOC);
        assert_eq!(store.get("a_b").unwrap().unwrap().bytes, b"<other/>");
        assert_eq!(store.list().unwrap(), vec!["a_b", "a:b"]);

        assert!(store.delete("a_b").unwrap());
        assert!(store.has("a:b"));
    }

    #[test]
    fn test_key_held_by_another_id_refuses_put() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();

        store.put("m1", DOC).unwrap();
        let meta = DocumentMeta {
            match_id: "m0".to_string(),
            fetched_at: Utc::now(),
            checksum: blake3::hash(DOC).to_hex().to_string(),
            size: DOC.len() as u64,
        };
        fs::write(
            tmp.path().join("m1.meta.json"),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();

        assert!(!store.has("m1"));
        assert!(matches!(
            store.put("m1", DOC),
            Err(Error::DocumentExists(_))
        ));
    }

    #[test]
    fn test_corruption_is_detected() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();

        store.put("m1", DOC).unwrap();
        fs::write(tmp.path().join("m1.xml"), b"<tampered/>").unwrap();
        assert!(matches!(
            store.get("m1"),
            Err(Error::CorruptDocument { .. })
        ));
    }

    #[test]
    fn test_list_delete_purge() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();

        store.put("sr:sport_event:2", DOC).unwrap();
        store.put("sr:sport_event:1", DOC).unwrap();
        fs::write(tmp.path().join(".leftover.xml.tmp"), b"partial").unwrap();

        assert_eq!(
            store.list().unwrap(),
            vec!["sr:sport_event:1", "sr:sport_event:2"]
        );
        assert_eq!(store.count().unwrap(), 2);

        assert!(store.delete("sr:sport_event:1").unwrap());
        assert!(!store.delete("sr:sport_event:1").unwrap());
        assert!(!store.has("sr:sport_event:1"));

        assert_eq!(store.purge().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }
}
