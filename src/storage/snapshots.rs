use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::types::{Snapshot, SnapshotFile, SnapshotFileRef, StorageError};

// ============================================================================
// Snapshot Store
// ============================================================================

/// Durable per-term snapshots plus an in-process cache of the most recently
/// loaded or detected snapshot for each term.
///
/// Each term is stored as `<root>/<term>.json`. The cache lives as long as
/// the store; nothing is ever evicted or deleted.
#[derive(Debug)]
pub struct SnapshotStore {
    root: PathBuf,
    cache: HashMap<String, Snapshot>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the snapshot file for `term`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidTerm`] when the term could escape the
    /// storage directory or is not a usable file name.
    pub fn path_for(&self, term: &str) -> Result<PathBuf, StorageError> {
        validate_term(term)?;
        Ok(self.root.join(format!("{term}.json")))
    }

    /// Load the persisted snapshot for `term`.
    ///
    /// A missing file is `Ok(None)`, not an error.
    pub async fn load(&self, term: &str) -> Result<Option<Snapshot>, StorageError> {
        let path = self.path_for(term)?;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(term = %term, path = %path.display(), "No persisted snapshot");
                return Ok(None);
            }
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        let snapshot =
            decode(term, &bytes).map_err(|source| StorageError::Corrupt { path, source })?;
        Ok(Some(snapshot))
    }

    /// Persist `snapshot` atomically, creating the storage directory if needed.
    ///
    /// The JSON is written to a uniquely named temp file in the same
    /// directory, synced, then renamed over the destination, so readers only
    /// ever observe the previous or the new complete file.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let path = self.path_for(&snapshot.term)?;
        let bytes = encode(snapshot)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::Io {
                path: self.root.clone(),
                source,
            })?;

        // SEC-009: Temp name unique per process and per save, opened with
        // create_new so a pre-existing file or symlink at the temp path is
        // never followed.
        let temp_path = path.with_extension(temp_suffix());

        if let Err(source) = write_synced(&temp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::Io {
                path: temp_path,
                source,
            });
        }

        // On Windows, rename fails if destination exists, so remove it first
        #[cfg(windows)]
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if let Err(source) = tokio::fs::remove_file(&path).await {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(StorageError::Io { path, source });
            }
        }

        if let Err(source) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::Io { path, source });
        }

        tracing::debug!(
            term = %snapshot.term,
            entries = snapshot.entries.len(),
            path = %path.display(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Cached snapshot for `term`, if one was stored during this process.
    pub fn cached(&self, term: &str) -> Option<&Snapshot> {
        self.cache.get(term)
    }

    /// Replace the cached snapshot for the snapshot's term.
    pub fn set_cached(&mut self, snapshot: Snapshot) {
        self.cache.insert(snapshot.term.clone(), snapshot);
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("json.tmp.{:x}.{:016x}.{seq}", std::process::id(), nanos)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Reject terms that are not plain, visible file names.
pub fn validate_term(term: &str) -> Result<(), StorageError> {
    let bad = term.is_empty()
        || term.starts_with('.')
        || term.contains(['/', '\\', '\0'])
        || term.chars().any(char::is_control);
    if bad {
        return Err(StorageError::InvalidTerm(term.to_string()));
    }
    Ok(())
}

// ============================================================================
// On-disk Format
// ============================================================================

/// Serialize a snapshot to its on-disk JSON form.
///
/// Keys are sorted (`games` before `hash`, entry names in order), indented by
/// four spaces, with a trailing newline.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, StorageError> {
    let file = SnapshotFileRef {
        games: &snapshot.entries,
        hash: &snapshot.fingerprint,
    };

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    file.serialize(&mut ser).map_err(StorageError::Encode)?;
    out.push(b'\n');
    Ok(out)
}

/// Parse on-disk JSON into a snapshot for `term`.
pub fn decode(term: &str, bytes: &[u8]) -> Result<Snapshot, serde_json::Error> {
    let file: SnapshotFile = serde_json::from_slice(bytes)?;
    Ok(Snapshot::new(term, file.hash, file.games))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EntryMeta;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("relwatch_store_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn sample(term: &str) -> Snapshot {
        let entries = [
            ("Game1", "http://a"),
            ("Game \"Two\" / Ünïcode", "http://b/?q=1&r=2"),
        ]
        .into_iter()
        .map(|(n, l)| (n.to_string(), EntryMeta { link: l.to_string() }))
        .collect();
        Snapshot::new(term, "ab".repeat(32), entries)
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = test_dir("round_trip");
        let store = SnapshotStore::new(dir.join("lists"));
        let snapshot = sample("NSW-HR");

        store.save(&snapshot).await.unwrap();
        let loaded = store.load("NSW-HR").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = test_dir("missing");
        let store = SnapshotStore::new(&dir);
        assert!(store.load("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_creates_parent_and_leaves_no_temp_files() {
        let dir = test_dir("parent");
        let root = dir.join("nested").join("lists");
        let store = SnapshotStore::new(&root);

        store.save(&sample("t")).await.unwrap();
        store.save(&sample("t")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["t.json".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let dir = test_dir("overwrite");
        let store = SnapshotStore::new(&dir);

        store.save(&sample("t")).await.unwrap();
        let replacement = Snapshot::new("t", "cd".repeat(32), BTreeMap::new());
        store.save(&replacement).await.unwrap();

        assert_eq!(store.load("t").await.unwrap().unwrap(), replacement);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = test_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("t.json"), "{ \"hash\": ").unwrap();

        let store = SnapshotStore::new(&dir);
        let err = store.load("t").await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
        assert!(err.to_string().contains("corrupt"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_reads_existing_bot_file() {
        let dir = test_dir("legacy");
        std::fs::create_dir_all(&dir).unwrap();
        let legacy = r#"{
    "games": {
        "Some.Game.NSW-BigBlueBox": {
            "link": "https://predb.me/?post=1"
        }
    },
    "hash": "0123"
}"#;
        std::fs::write(dir.join("NSW-BigBlueBox.json"), legacy).unwrap();

        let store = SnapshotStore::new(&dir);
        let loaded = store.load("NSW-BigBlueBox").await.unwrap().unwrap();
        assert_eq!(loaded.fingerprint, "0123");
        assert_eq!(
            loaded.entries["Some.Game.NSW-BigBlueBox"].link,
            "https://predb.me/?post=1"
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_reads_null_link_as_empty() {
        let dir = test_dir("null_link");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("t.json"),
            r#"{"games": {"G": {"link": null}}, "hash": "ab"}"#,
        )
        .unwrap();

        let store = SnapshotStore::new(&dir);
        let loaded = store.load("t").await.unwrap().unwrap();
        assert_eq!(loaded.entries["G"].link, "");

        // Rewritten as a string, never as null
        store.save(&loaded).await.unwrap();
        let text = std::fs::read_to_string(dir.join("t.json")).unwrap();
        assert!(text.contains(r#""link": """#));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_link_is_still_corrupt() {
        let dir = test_dir("no_link");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("t.json"), r#"{"games": {"G": {}}, "hash": "ab"}"#).unwrap();

        let store = SnapshotStore::new(&dir);
        assert!(matches!(
            store.load("t").await,
            Err(StorageError::Corrupt { .. })
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_concurrent_saves_use_distinct_temp_files() {
        let dir = test_dir("concurrent");
        let first = SnapshotStore::new(&dir);
        let second = SnapshotStore::new(&dir);
        let a = sample("t");
        let b = Snapshot::new("t", "cd".repeat(32), BTreeMap::new());

        for _ in 0..20 {
            let (ra, rb) = tokio::join!(first.save(&a), second.save(&b));
            ra.unwrap();
            rb.unwrap();
        }

        let loaded = first.load("t").await.unwrap().unwrap();
        assert!(loaded == a || loaded == b);
        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["t.json".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rejects_unsafe_terms() {
        let store = SnapshotStore::new("/tmp/relwatch");
        for term in ["", "../escape", "a/b", "a\\b", ".hidden", "nul\0"] {
            assert!(
                matches!(store.path_for(term), Err(StorageError::InvalidTerm(_))),
                "{term:?} should be rejected"
            );
        }
        assert_eq!(
            store.path_for("NSW-HR").unwrap(),
            PathBuf::from("/tmp/relwatch/NSW-HR.json")
        );
    }

    #[test]
    fn test_cache_accessors() {
        let mut store = SnapshotStore::new("/tmp/relwatch");
        assert!(store.cached("t").is_none());

        store.set_cached(sample("t"));
        assert_eq!(store.cached("t"), Some(&sample("t")));

        let replacement = Snapshot::new("t", "x", BTreeMap::new());
        store.set_cached(replacement.clone());
        assert_eq!(store.cached("t"), Some(&replacement));
        assert!(store.cached("other").is_none());
    }

    #[test]
    fn test_encode_layout() {
        let snapshot = Snapshot::new(
            "t",
            "ff",
            [("B".to_string(), EntryMeta { link: "b".into() }), ("A".to_string(), EntryMeta { link: "a".into() })]
                .into_iter()
                .collect(),
        );
        let text = String::from_utf8(encode(&snapshot).unwrap()).unwrap();
        let expected = r#"{
    "games": {
        "A": {
            "link": "a"
        },
        "B": {
            "link": "b"
        }
    },
    "hash": "ff"
}
"#;
        assert_eq!(text, expected);
    }

    #[test]
    fn test_encode_writes_non_ascii_verbatim() {
        let snapshot = Snapshot::new(
            "t",
            "ff",
            [("Pokémon".to_string(), EntryMeta { link: "l".into() })]
                .into_iter()
                .collect(),
        );
        let text = String::from_utf8(encode(&snapshot).unwrap()).unwrap();
        assert!(text.contains("\"Pokémon\""));
        assert!(!text.contains("\\u00e9"));

        // Escaped files from older writers read back to the same name
        let escaped = br#"{"games": {"Pok\u00e9mon": {"link": "l"}}, "hash": "ff"}"#;
        assert_eq!(decode("t", escaped).unwrap(), snapshot);
    }

    proptest! {
        #[test]
        fn prop_encode_decode_preserves_snapshot(
            entries in proptest::collection::btree_map(".*", ".*", 0..16),
            hash in "[0-9a-f]{64}",
        ) {
            let entries = entries
                .into_iter()
                .map(|(name, link)| (name, EntryMeta { link }))
                .collect();
            let snapshot = Snapshot::new("t", hash, entries);
            let decoded = decode("t", &encode(&snapshot).unwrap()).unwrap();
            prop_assert_eq!(decoded, snapshot);
        }
    }
}
