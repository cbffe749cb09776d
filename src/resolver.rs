//! Block/override resolution on top of the matching engine output.
//!
//! A block on (mirror, advisory) drops the triple for that mirror only. An
//! override forces the advisory into the mirror's publish set whether or not
//! the predicate selected it, and whatever issue-time window the run covers.
//! When both exist for the same pair the block wins.

use crate::error::Result;
use crate::matcher::{MatchOrigin, MatchedAdvisory};
use crate::models::Mirror;
use crate::store::{CatalogRepository, UpstreamRepository};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Publish set of one mirror after applying operator exceptions.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Ordered by upstream advisory id.
    pub published: Vec<MatchedAdvisory>,
    pub blocked: usize,
    pub overridden: usize,
}

pub struct Resolver<S: ?Sized> {
    store: Arc<S>,
}

impl<S> Resolver<S>
where
    S: UpstreamRepository + CatalogRepository + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        mirror: &Arc<Mirror>,
        matched: Vec<MatchedAdvisory>,
    ) -> Result<Resolution> {
        let blocked: HashSet<i64> = self
            .store
            .list_blocks(mirror.id)
            .await?
            .into_iter()
            .map(|b| b.upstream_advisory_id)
            .collect();
        let overrides: Vec<i64> = self
            .store
            .list_overrides(mirror.id)
            .await?
            .into_iter()
            .map(|o| o.upstream_advisory_id)
            .collect();

        let mut resolution = Resolution::default();
        let mut published: BTreeMap<i64, MatchedAdvisory> = BTreeMap::new();
        for triple in matched {
            if blocked.contains(&triple.advisory.id) {
                debug!(
                    "Blocked {} for mirror {}",
                    triple.advisory.advisory.name, mirror.name
                );
                resolution.blocked += 1;
                continue;
            }
            published.insert(triple.advisory.id, triple);
        }

        let forced: Vec<i64> = overrides
            .into_iter()
            .filter(|id| !blocked.contains(id))
            .collect();
        if !forced.is_empty() {
            for record in self.store.get_upstream_advisories(&forced).await? {
                resolution.overridden += 1;
                match published.get_mut(&record.id) {
                    Some(existing) => existing.origin = MatchOrigin::Override,
                    None => {
                        published.insert(
                            record.id,
                            MatchedAdvisory {
                                mirror: Arc::clone(mirror),
                                advisory: record,
                                matched_products: Vec::new(),
                                origin: MatchOrigin::Override,
                            },
                        );
                    }
                }
            }
        }

        resolution.published = published.into_values().collect();
        if resolution.blocked > 0 || resolution.overridden > 0 {
            info!(
                "Mirror {}: {} published, {} blocked, {} overridden",
                mirror.name,
                resolution.published.len(),
                resolution.blocked,
                resolution.overridden
            );
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{MatchWindow, MatchingEngine};
    use crate::store::SqlStore;
    use crate::testing::{mirror_fixture, supported_product_fixture, upstream_advisory};

    async fn setup() -> (Arc<SqlStore>, Arc<Mirror>, Arc<Mirror>, i64, i64) {
        let store = Arc::new(SqlStore::new_in_memory().await.unwrap());
        let product = store
            .create_supported_product(&supported_product_fixture("Rocky Linux 9", Some("RL")))
            .await
            .unwrap();
        let x86 = store
            .create_mirror(&mirror_fixture(product.id, "Rocky Linux 9 x86_64", None, "x86_64"))
            .await
            .unwrap();
        let arm = store
            .create_mirror(&mirror_fixture(product.id, "Rocky Linux 9 aarch64", None, "aarch64"))
            .await
            .unwrap();
        let (both, _) = store
            .upsert_upstream_advisory(&upstream_advisory(
                "RHSA-2024:0001",
                &[
                    ("Red Hat Enterprise Linux", 9, Some(4), "x86_64"),
                    ("Red Hat Enterprise Linux", 9, Some(4), "aarch64"),
                ],
            ))
            .await
            .unwrap();
        let (el8, _) = store
            .upsert_upstream_advisory(&upstream_advisory(
                "RHSA-2024:0002",
                &[("Red Hat Enterprise Linux", 8, Some(10), "x86_64")],
            ))
            .await
            .unwrap();
        (store, Arc::new(x86), Arc::new(arm), both, el8)
    }

    async fn resolve(store: &Arc<SqlStore>, mirror: &Arc<Mirror>) -> Resolution {
        let engine = MatchingEngine::new(Arc::clone(store));
        let matched = engine.match_mirror(mirror, &MatchWindow::all()).await.unwrap();
        Resolver::new(Arc::clone(store))
            .resolve(mirror, matched)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_block_applies_to_one_mirror() {
        let (store, x86, arm, both, _) = setup().await;
        store.add_block(x86.id, both).await.unwrap();

        let x86_resolution = resolve(&store, &x86).await;
        assert!(x86_resolution.published.is_empty());
        assert_eq!(x86_resolution.blocked, 1);

        let arm_resolution = resolve(&store, &arm).await;
        assert_eq!(arm_resolution.published.len(), 1);
        assert_eq!(arm_resolution.published[0].advisory.id, both);
    }

    #[tokio::test]
    async fn test_override_forces_unmatched_advisory() {
        let (store, x86, _, both, el8) = setup().await;
        store.add_override(x86.id, el8).await.unwrap();

        let resolution = resolve(&store, &x86).await;
        let ids: Vec<i64> = resolution.published.iter().map(|m| m.advisory.id).collect();
        assert_eq!(ids, vec![both, el8]);
        assert_eq!(resolution.published[0].origin, MatchOrigin::Predicate);
        assert_eq!(resolution.published[1].origin, MatchOrigin::Override);
        assert!(resolution.published[1].matched_products.is_empty());
        assert_eq!(resolution.overridden, 1);
    }

    #[tokio::test]
    async fn test_block_wins_over_override() {
        let (store, x86, _, both, _) = setup().await;
        store.add_override(x86.id, both).await.unwrap();
        store.add_block(x86.id, both).await.unwrap();

        let resolution = resolve(&store, &x86).await;
        assert!(resolution.published.is_empty());
        assert_eq!(resolution.overridden, 0);
    }
}
