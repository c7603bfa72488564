//! Release feed watcher.
//!
//! Polls a release-announcement RSS search feed for a set of terms, keeps the
//! last-seen entries of each term on disk, and reports entries that were not
//! there before.
//!
//! - [`feed`] - fetch, parse and fingerprint feed documents
//! - [`storage`] - per-term snapshots on disk plus an in-process cache
//! - [`detector`] - the change detection engine
//! - [`notify`] - announcement delivery
//! - [`watch`] - polling loop around the detector
//! - [`config`] - TOML configuration

pub mod config;
pub mod detector;
pub mod feed;
pub mod notify;
pub mod storage;
pub mod watch;

pub use detector::{ChangeDetector, ChangeEvent, DetectError, TermReport};
