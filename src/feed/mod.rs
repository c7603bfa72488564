//! Feed retrieval and interpretation for release search terms.
//!
//! - [`fetcher`] - HTTP retrieval of the raw RSS document for a term
//! - [`parser`] - RSS `channel`/`item` extraction into an entry map
//! - [`fingerprint`] - SHA-256 content digest of the raw bytes
//!
//! The three stages are kept separate so the change detector can fingerprint
//! exactly the bytes it parsed.

mod fetcher;
mod fingerprint;
mod parser;

pub use fetcher::{FeedFetcher, FetchError, DEFAULT_USER_AGENT};
pub use fingerprint::digest;
pub use parser::{parse_entries, ParseError};
