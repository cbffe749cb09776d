//! Upstream advisory feeds.
//!
//! A source turns the vendor's publication index into raw [`FeedRecord`]s.
//! Parsing the payload is left to [`crate::normalizer`] so a malformed
//! document only costs its own record, never the whole batch.
//!
//! # Available Sources
//!
//! - [`csaf::CsafSource`] - CSAF v2 advisory documents with `changes.csv` /
//!   `releases.csv` / `deletions.csv` indexes

pub mod csaf;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One raw upstream document and the index timestamp it was listed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRecord {
    /// Path of the document relative to the feed root, e.g. `2024/rhsa-2024_0001.json`.
    pub id: String,
    /// Index timestamp; the cursor advances to the maximum of these.
    pub timestamp: DateTime<Utc>,
    /// Unparsed document body.
    pub payload: String,
}

/// Trait for upstream advisory feeds.
///
/// # Example
///
/// ```ignore
/// use advisory_mirror::sources::{FeedRecord, UpstreamSource};
/// use async_trait::async_trait;
///
/// struct MySource;
///
/// #[async_trait]
/// impl UpstreamSource for MySource {
///     async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<FeedRecord>> {
///         Ok(vec![])
///     }
///
///     fn name(&self) -> &str {
///         "MySource"
///     }
/// }
/// ```
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Fetch every record listed at or after `since`, oldest first.
    ///
    /// With `since == None` the whole feed is returned. Records at exactly
    /// `since` are included again; the store tolerates duplicates.
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<FeedRecord>>;

    /// Get the name of this source (used for logging and errors).
    fn name(&self) -> &str;
}
