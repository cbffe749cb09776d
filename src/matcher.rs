//! Mirror matching engine.
//!
//! For one active mirror, selects the upstream advisories with at least one
//! affected product satisfying the mirror's predicate:
//!
//! - `variant`, `major_version` and `arch` compare exactly
//! - a pinned `minor_version` compares exactly; an open one matches every
//!   minor version, including advisories that record none
//!
//! The store narrows candidates in SQL; the predicate is evaluated again here
//! so the result never depends on how the query was written.

use crate::error::Result;
use crate::models::{AffectedProduct, Mirror, UpstreamRecord};
use crate::store::UpstreamRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPredicate {
    pub variant: String,
    pub major_version: i32,
    /// `None` accepts any minor version.
    pub minor_version: Option<i32>,
    pub arch: String,
}

impl MatchPredicate {
    pub fn for_mirror(mirror: &Mirror) -> Self {
        Self {
            variant: mirror.match_variant.clone(),
            major_version: mirror.match_major_version,
            minor_version: mirror.match_minor_version,
            arch: mirror.match_arch.clone(),
        }
    }

    pub fn matches(&self, product: &AffectedProduct) -> bool {
        product.variant == self.variant
            && product.major_version == self.major_version
            && product.arch == self.arch
            && self
                .minor_version
                .is_none_or(|minor| product.minor_version == Some(minor))
    }
}

/// Issue-time window `[since, until)`; an open end is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl MatchWindow {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.since.is_none_or(|since| timestamp >= since)
            && self.until.is_none_or(|until| timestamp < until)
    }
}

/// Why an advisory ended up in a mirror's publish set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOrigin {
    Predicate,
    /// Forced in by an operator override.
    Override,
}

/// A (mirror, upstream advisory, matched affected products) triple.
#[derive(Debug, Clone)]
pub struct MatchedAdvisory {
    pub mirror: Arc<Mirror>,
    pub advisory: UpstreamRecord,
    /// Empty for override-only matches.
    pub matched_products: Vec<AffectedProduct>,
    pub origin: MatchOrigin,
}

/// Evaluate the predicate of one mirror against a set of records.
pub fn match_records(mirror: &Arc<Mirror>, records: Vec<UpstreamRecord>) -> Vec<MatchedAdvisory> {
    let predicate = MatchPredicate::for_mirror(mirror);
    records
        .into_iter()
        .filter_map(|record| {
            let matched_products: Vec<AffectedProduct> = record
                .advisory
                .affected_products
                .iter()
                .filter(|product| predicate.matches(product))
                .cloned()
                .collect();
            if matched_products.is_empty() {
                return None;
            }
            Some(MatchedAdvisory {
                mirror: Arc::clone(mirror),
                advisory: record,
                matched_products,
                origin: MatchOrigin::Predicate,
            })
        })
        .collect()
}

pub struct MatchingEngine<S: ?Sized> {
    store: Arc<S>,
}

impl<S> MatchingEngine<S>
where
    S: UpstreamRepository + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Every upstream advisory issued within `window` that applies to `mirror`.
    pub async fn match_mirror(
        &self,
        mirror: &Arc<Mirror>,
        window: &MatchWindow,
    ) -> Result<Vec<MatchedAdvisory>> {
        let predicate = MatchPredicate::for_mirror(mirror);
        let candidates = self.store.find_matching_upstream(&predicate, window).await?;
        let candidates: Vec<UpstreamRecord> = candidates
            .into_iter()
            .filter(|record| window.contains(record.advisory.issued_at))
            .collect();

        let matched = match_records(mirror, candidates);
        debug!(
            "Mirror {} matched {} upstream advisories",
            mirror.name,
            matched.len()
        );
        Ok(matched)
    }
}
