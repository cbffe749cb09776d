use crate::config::{Config, UpdateInfoConfig};
use crate::crossref::load_mirror_index;
use crate::cursor::{CursorController, CursorState, PollReport};
use crate::error::{MirrorError, Result};
use crate::matcher::{MatchWindow, MatchingEngine};
use crate::models::{Mirror, SupportedProduct, UpsertOutcome, UpstreamRecord};
use crate::normalizer::Normalizer;
use crate::repomd::{HttpRepositoryMetadata, RepositoryMetadata};
use crate::resolver::Resolver;
use crate::sources::UpstreamSource;
use crate::sources::csaf::CsafSource;
use crate::store::{RepositoryTarget, SqlStore, Store};
use crate::synthesizer::{Contribution, Synthesizer};
use crate::updateinfo;
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Scope of one matching run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    /// Only mirrors of these major versions; empty means all.
    #[serde(default)]
    pub major_versions: Vec<i32>,
    #[serde(default)]
    pub window: MatchWindow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    pub mirrors: usize,
    pub matched: usize,
    pub blocked: usize,
    pub overridden: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Advisories with no package present in any contributing mirror.
    pub skipped: usize,
    /// Dropped for unresolved references.
    pub errors: usize,
    /// Mirrors skipped because their repository metadata failed to load.
    pub repository_errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitReport {
    pub repositories: usize,
    pub written: usize,
    pub unchanged: usize,
    pub errors: usize,
}

/// Result of retiring a supported product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReport {
    pub mirrors: usize,
    pub matched: usize,
    /// Blocks that did not exist before this run.
    pub added: usize,
}

/// What one mirror contributes to a matching run.
#[derive(Default)]
struct MirrorPass {
    matched: usize,
    blocked: usize,
    overridden: usize,
    repository_error: bool,
    contributions: Vec<(UpstreamRecord, Contribution)>,
}

pub struct MirrorManager {
    store: Arc<dyn Store>,
    cursor: CursorController<dyn Store>,
    metadata: Arc<dyn RepositoryMetadata>,
    matcher: MatchingEngine<dyn Store>,
    resolver: Resolver<dyn Store>,
    synthesizer: Synthesizer<dyn Store>,
    updateinfo: UpdateInfoConfig,
    concurrency: usize,
}

impl MirrorManager {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn UpstreamSource>,
        metadata: Arc<dyn RepositoryMetadata>,
        config: &Config,
    ) -> Self {
        Self {
            cursor: CursorController::new(
                Arc::clone(&store),
                source,
                Normalizer::new(config.normalizer.clone()),
            ),
            matcher: MatchingEngine::new(Arc::clone(&store)),
            resolver: Resolver::new(Arc::clone(&store)),
            synthesizer: Synthesizer::new(Arc::clone(&store), config.rebrand.clone()),
            store,
            metadata,
            updateinfo: config.updateinfo.clone(),
            concurrency: config.workflow.match_concurrency.max(1),
        }
    }

    /// Connect to the configured database and the upstream CSAF feed.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(SqlStore::connect(&config.database_url).await?);
        let source = Arc::new(CsafSource::new(
            config.csaf_base_url.clone(),
            config.workflow.max_retries,
        )?);
        let metadata = Arc::new(HttpRepositoryMetadata::new(config.workflow.max_retries)?);
        Ok(Self::new(store, source, metadata, config))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn cursor_state(&self) -> CursorState {
        self.cursor.state()
    }

    /// Ingest every upstream record published since the cursor.
    pub async fn poll_upstream(&self) -> Result<PollReport> {
        self.cursor.poll().await
    }

    /// Match, resolve and synthesize for every active mirror in scope.
    pub async fn match_mirrors(&self, request: &MatchRequest) -> Result<MatchReport> {
        let mirrors: Vec<Arc<Mirror>> = self
            .store
            .list_active_mirrors()
            .await?
            .into_iter()
            .filter(|m| {
                request.major_versions.is_empty()
                    || request.major_versions.contains(&m.match_major_version)
            })
            .map(Arc::new)
            .collect();
        info!("Matching {} active mirrors", mirrors.len());

        let window = request.window;
        let passes: Vec<Result<MirrorPass>> = stream::iter(mirrors.clone())
            .map(|mirror| async move { self.match_mirror(&mirror, &window).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = MatchReport {
            mirrors: mirrors.len(),
            ..MatchReport::default()
        };
        let mut groups: BTreeMap<(i64, i64), (UpstreamRecord, Vec<Contribution>)> =
            BTreeMap::new();
        for pass in passes {
            let pass = pass?;
            report.matched += pass.matched;
            report.blocked += pass.blocked;
            report.overridden += pass.overridden;
            report.repository_errors += usize::from(pass.repository_error);
            for (record, contribution) in pass.contributions {
                groups
                    .entry((contribution.mirror.supported_product_id, record.id))
                    .or_insert_with(|| (record, Vec::new()))
                    .1
                    .push(contribution);
            }
        }

        let mut products: HashMap<i64, Option<SupportedProduct>> = HashMap::new();
        for (product_id, _) in groups.keys() {
            if !products.contains_key(product_id) {
                let product = self.store.get_supported_product(*product_id).await?;
                products.insert(*product_id, product);
            }
        }

        let products = &products;
        let outcomes: Vec<Result<Option<UpsertOutcome>>> = stream::iter(groups)
            .map(|((product_id, _), (record, mut contributions))| async move {
                contributions.sort_by_key(|c| c.mirror.id);
                let product = products
                    .get(&product_id)
                    .and_then(Option::as_ref)
                    .ok_or_else(|| {
                        MirrorError::unresolved(format!("supported product {product_id}"))
                    })?;
                self.synthesizer
                    .synthesize(product, &record, &contributions)
                    .await
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(Some(UpsertOutcome::Created)) => report.created += 1,
                Ok(Some(UpsertOutcome::Updated)) => report.updated += 1,
                Ok(Some(UpsertOutcome::Unchanged)) => report.unchanged += 1,
                Ok(None) => report.skipped += 1,
                Err(MirrorError::UnresolvedReference(reference)) => {
                    warn!("Dropping advisory: unresolved {}", reference);
                    report.errors += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Matching done: {} matched, {} created, {} updated, {} unchanged, {} errors",
            report.matched, report.created, report.updated, report.unchanged, report.errors
        );
        Ok(report)
    }

    async fn match_mirror(&self, mirror: &Arc<Mirror>, window: &MatchWindow) -> Result<MirrorPass> {
        let matched = self.matcher.match_mirror(mirror, window).await?;
        let mut pass = MirrorPass {
            matched: matched.len(),
            ..MirrorPass::default()
        };
        let resolution = self.resolver.resolve(mirror, matched).await?;
        pass.blocked = resolution.blocked;
        pass.overridden = resolution.overridden;
        if resolution.published.is_empty() {
            return Ok(pass);
        }

        let index = match load_mirror_index(self.metadata.as_ref(), mirror).await {
            Ok(index) => index,
            Err(e) => {
                error!("Repository metadata of {} failed to load: {}", mirror.name, e);
                pass.repository_error = true;
                return Ok(pass);
            }
        };

        for triple in resolution.published {
            let packages = index.resolve(mirror, &triple.advisory.advisory.packages);
            pass.contributions.push((
                triple.advisory,
                Contribution {
                    mirror: Arc::clone(mirror),
                    origin: triple.origin,
                    packages,
                },
            ));
        }
        Ok(pass)
    }

    /// Block every upstream advisory that currently matches any mirror of a
    /// supported product, active or not, so later matching runs publish
    /// nothing new for it. Existing blocks are kept.
    pub async fn block_remaining(&self, supported_product_id: i64) -> Result<BlockReport> {
        let product = self
            .store
            .get_supported_product(supported_product_id)
            .await?
            .ok_or_else(|| {
                MirrorError::unresolved(format!("supported product {supported_product_id}"))
            })?;
        let mirrors = self.store.list_product_mirrors(product.id).await?;

        let mut report = BlockReport {
            mirrors: mirrors.len(),
            ..BlockReport::default()
        };
        for mirror in mirrors.into_iter().map(Arc::new) {
            let existing: HashSet<i64> = self
                .store
                .list_blocks(mirror.id)
                .await?
                .into_iter()
                .map(|block| block.upstream_advisory_id)
                .collect();
            let matched = self.matcher.match_mirror(&mirror, &MatchWindow::all()).await?;
            report.matched += matched.len();
            for advisory in matched {
                self.store.add_block(mirror.id, advisory.advisory.id).await?;
                if !existing.contains(&advisory.advisory.id) {
                    report.added += 1;
                }
            }
        }

        info!(
            "Blocked remaining advisories of {}: {} matched, {} newly blocked across {} mirrors",
            product.name, report.matched, report.added, report.mirrors
        );
        Ok(report)
    }

    /// The updateinfo document of one published repository.
    pub async fn render_updateinfo(&self, target: &RepositoryTarget) -> Result<String> {
        let advisories = self.store.load_repository_advisories(target).await?;
        updateinfo::render(target, &advisories, &self.updateinfo)
    }

    /// Write `updateinfo.xml` for every published repository below `out_dir`.
    ///
    /// A repository that fails to render or write is counted and skipped.
    pub async fn emit_updateinfo(&self, out_dir: &Path) -> Result<EmitReport> {
        let targets = self.store.list_published_repositories().await?;
        let mut report = EmitReport {
            repositories: targets.len(),
            ..EmitReport::default()
        };

        for target in &targets {
            match self.emit_target(out_dir, target).await {
                Ok(true) => report.written += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    error!(
                        "updateinfo for {}/{} failed: {}",
                        target.mirror_name, target.repo_name, e
                    );
                    report.errors += 1;
                }
            }
        }

        info!(
            "Emitted {} repositories: {} written, {} unchanged, {} errors",
            report.repositories, report.written, report.unchanged, report.errors
        );
        Ok(report)
    }

    /// Returns whether the file changed.
    async fn emit_target(&self, out_dir: &Path, target: &RepositoryTarget) -> Result<bool> {
        let document = self.render_updateinfo(target).await?;
        let path = updateinfo::output_path(out_dir, target);
        if let Ok(existing) = tokio::fs::read_to_string(&path).await {
            if existing == document {
                return Ok(false);
            }
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, document).await?;
        Ok(true)
    }
}
