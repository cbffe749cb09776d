//! Local advisory synthesis.
//!
//! Every (mirror, upstream advisory) pair that survives resolution contributes
//! the packages found in that mirror's repositories. Contributions for one
//! supported product are folded into a single local advisory whose name is the
//! product code plus the upstream name without its vendor prefix. An existing
//! local advisory is merged, never shrunk: affected products, packages, CVEs and
//! fixes are unioned by natural key with the newer rows winning.

use crate::config::RebrandConfig;
use crate::error::{MirrorError, Result};
use crate::matcher::MatchOrigin;
use crate::models::{
    Fix, LocalAdvisory, LocalAffectedProduct, LocalPackage, Mirror, SupportedProduct,
    UpsertOutcome, UpstreamRecord,
};
use crate::store::LocalRepository;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Container image prefixes such as `rhel9/` in upstream text.
static CONTAINER_PREFIX_RE: Lazy<std::result::Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"rhel\d?/"));

/// Packages one mirror contributes to a local advisory.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub mirror: Arc<Mirror>,
    pub origin: MatchOrigin,
    pub packages: Vec<LocalPackage>,
}

pub struct Synthesizer<S: ?Sized> {
    store: Arc<S>,
    rebrand: RebrandConfig,
    /// Per-name queue for workers of this process. The store merge is atomic
    /// on its own.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S> Synthesizer<S>
where
    S: LocalRepository + ?Sized,
{
    pub fn new(store: Arc<S>, rebrand: RebrandConfig) -> Self {
        Self {
            store,
            rebrand,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// `RHSA-2024:1234` with code `RL` becomes `RLSA-2024:1234`.
    pub fn local_name(&self, product: &SupportedProduct, upstream_name: &str) -> Result<String> {
        let code = product
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                MirrorError::unresolved(format!(
                    "supported product {} has no advisory code",
                    product.name
                ))
            })?;
        let stripped = upstream_name
            .strip_prefix(self.rebrand.upstream_prefix.as_str())
            .unwrap_or(upstream_name);
        Ok(format!("{code}{stripped}"))
    }

    /// Rewrite upstream branding in synopsis and description text.
    pub fn rebrand(
        &self,
        text: &str,
        product: &SupportedProduct,
        upstream_name: &str,
        local_name: &str,
    ) -> String {
        let mut names: Vec<&str> = self
            .rebrand
            .upstream_product_names
            .iter()
            .map(String::as_str)
            .collect();
        names.sort_by_key(|name| std::cmp::Reverse(name.len()));

        let mut text = text.to_string();
        for name in names.into_iter().filter(|name| !name.is_empty()) {
            text = text.replace(name, &product.name);
        }
        if let Ok(regex) = &*CONTAINER_PREFIX_RE {
            text = regex.replace_all(&text, "").into_owned();
        }
        if !self.rebrand.upstream_vendor.is_empty() {
            text = text.replace(&self.rebrand.upstream_vendor, &product.vendor);
        }
        text.replace(upstream_name, local_name)
    }

    /// The local advisory described by this run's contributions alone.
    ///
    /// `None` when no contributing mirror carries any package.
    pub fn derive(
        &self,
        product: &SupportedProduct,
        upstream: &UpstreamRecord,
        contributions: &[Contribution],
    ) -> Result<Option<LocalAdvisory>> {
        let contributing: Vec<&Contribution> = contributions
            .iter()
            .filter(|c| !c.packages.is_empty())
            .collect();
        if contributing.is_empty() {
            return Ok(None);
        }

        let source = &upstream.advisory;
        let name = self.local_name(product, &source.name)?;

        let affected_products = contributing
            .iter()
            .map(|c| LocalAffectedProduct {
                variant: product.name.clone(),
                name: c.mirror.name.clone(),
                major_version: c.mirror.match_major_version,
                minor_version: c.mirror.match_minor_version,
                arch: c.mirror.match_arch.clone(),
                supported_product_id: product.id,
                overridden: c.origin == MatchOrigin::Override,
            })
            .collect();

        let fixes = source
            .bugzilla_tickets
            .iter()
            .map(|ticket| Fix {
                ticket_id: ticket.bug_id.clone(),
                source: format!("{}{}", self.rebrand.ticket_url_prefix, ticket.bug_id),
                description: ticket.description.clone(),
            })
            .collect();

        let mut local = LocalAdvisory {
            synopsis: self.rebrand(&source.synopsis, product, &source.name, &name),
            description: self.rebrand(&source.description, product, &source.name, &name),
            topic: String::new(),
            kind: source.kind,
            severity: source.severity.clone(),
            published_at: source.issued_at,
            updated_at: source.modified_at,
            upstream_advisory_id: Some(upstream.id),
            affected_products,
            packages: contributing
                .iter()
                .flat_map(|c| c.packages.iter().cloned())
                .collect(),
            cves: source.cves.clone(),
            fixes,
            name,
        };
        local.canonicalize();
        local.topic = local.derived_topic();
        Ok(Some(local))
    }

    /// Derive, merge into any existing advisory and persist.
    ///
    /// Returns `None` when there was nothing to publish.
    #[instrument(skip_all, fields(upstream = %upstream.advisory.name, product = %product.name))]
    pub async fn synthesize(
        &self,
        product: &SupportedProduct,
        upstream: &UpstreamRecord,
        contributions: &[Contribution],
    ) -> Result<Option<UpsertOutcome>> {
        let Some(derived) = self.derive(product, upstream, contributions)? else {
            debug!("No packages to publish");
            return Ok(None);
        };

        let lock = self.lock_for(&derived.name).await;
        let outcome = async {
            let _guard = lock.lock().await;
            self.store.merge_local_advisory(&derived).await
        }
        .await;
        self.release_lock(lock).await;
        let outcome = outcome?;

        if outcome != UpsertOutcome::Unchanged {
            info!("Local advisory {:?}", outcome);
        }
        Ok(Some(outcome))
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    async fn release_lock(&self, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // map + our handle; nobody else is waiting
        if Arc::strong_count(&lock) <= 2 {
            locks.retain(|_, held| !Arc::ptr_eq(held, &lock));
        }
    }
}
