mod snapshots;
mod types;

pub use snapshots::{decode, encode, validate_term, SnapshotStore};
pub use types::{Entry, EntryMeta, Snapshot, StorageError};
