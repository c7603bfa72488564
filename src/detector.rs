//! Change detection: fetch, parse and fingerprint each term, diff against the
//! last-known snapshot, and persist the result.

use thiserror::Error;

use crate::feed::{digest, parse_entries, FeedFetcher, FetchError, ParseError};
use crate::storage::{Entry, Snapshot, SnapshotStore, StorageError};

/// A newly observed entry for a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub term: String,
    pub entry: Entry,
}

impl ChangeEvent {
    /// Human-readable announcement for a chat channel.
    pub fn message(&self) -> String {
        format!(
            "New game detected: {}.\nMore info: {}",
            self.entry.name, self.entry.link
        )
    }
}

/// Why a single term could not be checked.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Outcome of checking one term.
///
/// `Ok` holds the new entries (empty when nothing was added); `Err` means the
/// term could not be checked this round and its stored state is untouched.
#[derive(Debug)]
pub struct TermReport {
    pub term: String,
    pub result: Result<Vec<ChangeEvent>, DetectError>,
}

/// Flatten the successful events of a batch, preserving term order.
pub fn events(reports: &[TermReport]) -> impl Iterator<Item = &ChangeEvent> {
    reports
        .iter()
        .filter_map(|r| r.result.as_ref().ok())
        .flatten()
}

/// Reports whose term could not be checked.
pub fn failures(reports: &[TermReport]) -> impl Iterator<Item = (&str, &DetectError)> {
    reports
        .iter()
        .filter_map(|r| r.result.as_ref().err().map(|e| (r.term.as_str(), e)))
}

/// Orchestrates fetcher, parser, fingerprint and store for a list of terms.
///
/// `detect_changes` takes `&mut self`; callers sharing one detector between
/// a timer and an on-demand trigger wrap it in a mutex so whole runs are
/// serialized.
#[derive(Debug)]
pub struct ChangeDetector {
    fetcher: FeedFetcher,
    store: SnapshotStore,
    announce_on_first_run: bool,
}

impl ChangeDetector {
    pub fn new(fetcher: FeedFetcher, store: SnapshotStore) -> Self {
        Self {
            fetcher,
            store,
            announce_on_first_run: true,
        }
    }

    /// When false, a term with no prior snapshot is seeded without emitting
    /// events for the entries it already lists.
    pub fn announce_on_first_run(mut self, announce: bool) -> Self {
        self.announce_on_first_run = announce;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Check every term in order and report new entries per term.
    ///
    /// A failing term does not stop the others; its error is returned in
    /// that term's [`TermReport`].
    pub async fn detect_changes<S: AsRef<str>>(&mut self, terms: &[S]) -> Vec<TermReport> {
        let mut reports = Vec::with_capacity(terms.len());

        for term in terms {
            let term = term.as_ref();
            let result = self.check_term(term).await;

            match &result {
                Ok(events) if events.is_empty() => {
                    tracing::debug!(term = %term, "No new entries");
                }
                Ok(events) => {
                    tracing::info!(term = %term, added = events.len(), "New entries detected");
                }
                Err(e) => {
                    tracing::warn!(term = %term, error = %e, "Term check failed");
                }
            }

            reports.push(TermReport {
                term: term.to_string(),
                result,
            });
        }

        reports
    }

    async fn check_term(&mut self, term: &str) -> Result<Vec<ChangeEvent>, DetectError> {
        let has_prior = self.resolve_existing(term).await?;

        // Always fetch fresh, regardless of what is cached
        let raw = self.fetcher.fetch(term).await?;
        let entries = parse_entries(&raw)?;
        let fresh = Snapshot::new(term, digest(&raw), entries);

        let prior = self.store.cached(term);
        if prior.is_some_and(|p| p.fingerprint == fresh.fingerprint) {
            // Persist anyway so the file on disk always tracks the last fetch
            self.store.save(&fresh).await?;
            return Ok(Vec::new());
        }

        let added = if has_prior || self.announce_on_first_run {
            fresh.added_since(prior)
        } else {
            tracing::info!(
                term = %term,
                entries = fresh.entries.len(),
                "Seeding snapshot without announcing existing entries"
            );
            Vec::new()
        };

        self.store.save(&fresh).await?;
        self.store.set_cached(fresh);

        Ok(added
            .into_iter()
            .map(|entry| ChangeEvent {
                term: term.to_string(),
                entry,
            })
            .collect())
    }

    /// Make sure the cache holds the last-known snapshot for `term`, loading
    /// it from disk on first use. Returns false when the term has never been
    /// seen.
    async fn resolve_existing(&mut self, term: &str) -> Result<bool, DetectError> {
        if self.store.cached(term).is_some() {
            return Ok(true);
        }

        match self.store.load(term).await? {
            Some(snapshot) => {
                tracing::debug!(
                    term = %term,
                    entries = snapshot.entries.len(),
                    "Loaded persisted snapshot"
                );
                self.store.set_cached(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
