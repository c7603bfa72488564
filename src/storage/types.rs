use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Snapshot storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The term cannot be used as a snapshot file name
    #[error("Term {0:?} cannot be stored: it must be a plain file name")]
    InvalidTerm(String),

    /// Reading, writing or renaming a snapshot file failed
    #[error("Snapshot I/O failed for '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted snapshot exists but is not in the expected JSON shape
    #[error("Snapshot file '{}' is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serializing a snapshot failed
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

// ============================================================================
// Data Structures
// ============================================================================

/// Metadata stored for one entry, keyed by entry name.
///
/// Serialized as `{ "link": "..." }` inside a snapshot's `games` map.
/// Older files may hold `"link": null` for an empty link; it reads as `""`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    #[serde(deserialize_with = "null_as_empty")]
    pub link: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// One announced item returned by the feed for a term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub link: String,
}

/// Last-known state of a term: the fingerprint of a raw feed document and
/// the entries parsed from those same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub term: String,
    pub fingerprint: String,
    pub entries: BTreeMap<String, EntryMeta>,
}

impl Snapshot {
    pub fn new(
        term: impl Into<String>,
        fingerprint: impl Into<String>,
        entries: BTreeMap<String, EntryMeta>,
    ) -> Self {
        Self {
            term: term.into(),
            fingerprint: fingerprint.into(),
            entries,
        }
    }

    /// Entries present here but absent (by name) from `prior`, sorted by name.
    ///
    /// With no prior snapshot every entry counts as added.
    pub fn added_since(&self, prior: Option<&Snapshot>) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|(name, _)| prior.map_or(true, |p| !p.entries.contains_key(*name)))
            .map(|(name, meta)| Entry {
                name: name.clone(),
                link: meta.link.clone(),
            })
            .collect()
    }
}

/// On-disk snapshot shape. Field order matches sorted key order.
#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotFile {
    pub games: BTreeMap<String, EntryMeta>,
    pub hash: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SnapshotFileRef<'a> {
    pub games: &'a BTreeMap<String, EntryMeta>,
    pub hash: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(names: &[&str]) -> Snapshot {
        let entries = names
            .iter()
            .map(|n| {
                (
                    n.to_string(),
                    EntryMeta {
                        link: format!("http://{n}"),
                    },
                )
            })
            .collect();
        Snapshot::new("term", "hash", entries)
    }

    #[test]
    fn test_added_since_reports_only_new_names() {
        let prior = snapshot(&["A", "B"]);
        let fresh = snapshot(&["A", "B", "C"]);

        assert_eq!(
            fresh.added_since(Some(&prior)),
            vec![Entry {
                name: "C".to_string(),
                link: "http://C".to_string(),
            }]
        );
    }

    #[test]
    fn test_added_since_ignores_removals() {
        let prior = snapshot(&["A", "B"]);
        let fresh = snapshot(&["A"]);
        assert!(fresh.added_since(Some(&prior)).is_empty());
    }

    #[test]
    fn test_added_since_without_prior_is_everything_sorted() {
        let fresh = snapshot(&["Zeta", "Alpha", "Mid"]);
        let names: Vec<_> = fresh
            .added_since(None)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Mid", "Zeta"]);
    }

    #[test]
    fn test_link_change_is_not_an_addition() {
        let prior = snapshot(&["A"]);
        let mut fresh = snapshot(&["A"]);
        fresh.entries.insert(
            "A".to_string(),
            EntryMeta {
                link: "http://elsewhere".to_string(),
            },
        );
        assert!(fresh.added_since(Some(&prior)).is_empty());
    }
}
