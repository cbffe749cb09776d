//! Relational advisory store.
//!
//! One repository trait per entity family: [`UpstreamRepository`] for
//! normalized vendor advisories and the ingestion cursor,
//! [`CatalogRepository`] for operator-managed rows, [`LocalRepository`] for
//! published advisories and [`RunRepository`] for workflow bookkeeping.
//! [`SqlStore`] implements all of them on top of sea-orm.
//!
//! Every upsert keys on a natural-key unique constraint and writes the parent
//! row and its children in one transaction. Child collections are replaced
//! wholesale, so replaying the same input is a no-op.

pub mod entity;
pub mod migration;

mod catalog;
mod local;
mod runs;
mod upstream;

use crate::error::{MirrorError, Result};
use crate::matcher::{MatchPredicate, MatchWindow};
use crate::models::{
    Block, LocalAdvisory, Mirror, Override, RepositorySource, RunStatus, SupportedProduct,
    UpsertOutcome, UpstreamAdvisory, UpstreamRecord, WorkflowRun,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, Database as SeaOrmDatabase, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// SQLite caps bound parameters per statement; `IN (...)` lists are chunked.
const ID_CHUNK: usize = 500;

/// One (mirror, repository) pair that has published packages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryTarget {
    pub mirror_name: String,
    pub repo_name: String,
    pub mirror_id: i64,
    pub arch: String,
}

#[async_trait]
pub trait UpstreamRepository: Send + Sync {
    /// Insert or update an upstream advisory by name, replacing its children.
    ///
    /// Returns the row id and whether anything changed.
    async fn upsert_upstream_advisory(
        &self,
        advisory: &UpstreamAdvisory,
    ) -> Result<(i64, UpsertOutcome)>;

    async fn get_upstream_advisory(&self, name: &str) -> Result<Option<UpstreamRecord>>;

    /// Load advisories by row id. Missing ids are silently absent.
    async fn get_upstream_advisories(&self, ids: &[i64]) -> Result<Vec<UpstreamRecord>>;

    /// Advisories issued within `window` with at least one affected product
    /// satisfying `predicate`.
    async fn find_matching_upstream(
        &self,
        predicate: &MatchPredicate,
        window: &MatchWindow,
    ) -> Result<Vec<UpstreamRecord>>;

    /// Admin deletion; children, blocks and overrides cascade.
    async fn delete_upstream_advisory(&self, name: &str) -> Result<bool>;

    async fn count_upstream_advisories(&self) -> Result<u64>;

    async fn get_cursor(&self) -> Result<Option<DateTime<Utc>>>;

    /// Move the watermark forward. Returns `false` (and writes nothing) when
    /// `timestamp` is not strictly newer than the stored value.
    async fn advance_cursor(&self, timestamp: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Active mirrors with their repository sources, ordered by id.
    async fn list_active_mirrors(&self) -> Result<Vec<Mirror>>;
    /// Every mirror of one product, active or not.
    async fn list_product_mirrors(&self, supported_product_id: i64) -> Result<Vec<Mirror>>;
    async fn get_supported_product(&self, id: i64) -> Result<Option<SupportedProduct>>;
    async fn list_blocks(&self, mirror_id: i64) -> Result<Vec<Block>>;
    async fn list_overrides(&self, mirror_id: i64) -> Result<Vec<Override>>;

    async fn create_supported_product(&self, product: &SupportedProduct)
    -> Result<SupportedProduct>;
    /// Create a mirror and the repository sources listed on it.
    async fn create_mirror(&self, mirror: &Mirror) -> Result<Mirror>;
    async fn add_repository(&self, repository: &RepositorySource) -> Result<RepositorySource>;
    async fn set_mirror_active(&self, mirror_id: i64, active: bool) -> Result<()>;
    async fn add_block(&self, mirror_id: i64, upstream_advisory_id: i64) -> Result<Block>;
    async fn remove_block(&self, mirror_id: i64, upstream_advisory_id: i64) -> Result<bool>;
    async fn add_override(&self, mirror_id: i64, upstream_advisory_id: i64) -> Result<Override>;
    async fn remove_override(&self, mirror_id: i64, upstream_advisory_id: i64) -> Result<bool>;
}

#[async_trait]
pub trait LocalRepository: Send + Sync {
    async fn get_local_advisory(&self, name: &str) -> Result<Option<LocalAdvisory>>;

    /// Insert or update a published advisory by name.
    ///
    /// `published_at` is only taken from the argument on creation. `updated_at`
    /// moves only when the content differs from what is stored.
    async fn upsert_local_advisory(&self, advisory: &LocalAdvisory) -> Result<UpsertOutcome>;

    /// Union `contribution` into the stored advisory of the same name.
    ///
    /// The stored rows are re-read and rewritten in one transaction, with the
    /// header row locked where the backend supports it, so concurrent writers
    /// never drop each other's children.
    async fn merge_local_advisory(&self, contribution: &LocalAdvisory) -> Result<UpsertOutcome>;

    async fn list_published_repositories(&self) -> Result<Vec<RepositoryTarget>>;

    /// Advisories with at least one package in `target`, ordered by name.
    async fn load_repository_advisories(
        &self,
        target: &RepositoryTarget,
    ) -> Result<Vec<LocalAdvisory>>;

    async fn count_local_advisories(&self) -> Result<u64>;
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn start_run(&self, workflow: &str, request: &str) -> Result<i64>;
    async fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        attempts: i32,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<()>;
    async fn list_runs_with_status(&self, status: RunStatus) -> Result<Vec<WorkflowRun>>;
}

/// Everything the pipeline needs from persistence.
pub trait Store: UpstreamRepository + CatalogRepository + LocalRepository + RunRepository {}

impl<T> Store for T where
    T: UpstreamRepository + CatalogRepository + LocalRepository + RunRepository
{
}

/// sea-orm backed store for SQLite and PostgreSQL.
#[derive(Clone)]
pub struct SqlStore {
    conn: DatabaseConnection,
}

impl SqlStore {
    /// Connect to `url` and bring the schema up to date.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = SeaOrmDatabase::connect(url).await?;
        let store = Self { conn };
        store.migrate().await?;
        info!("Connected advisory store");
        Ok(store)
    }

    /// In-memory SQLite database, migrated. Used by tests.
    pub async fn new_in_memory() -> Result<Self> {
        let mut options = ConnectOptions::new("sqlite::memory:");
        // every pooled connection would otherwise open its own empty database
        options.max_connections(1).sqlx_logging(false);
        let conn = SeaOrmDatabase::connect(options).await?;
        let store = Self { conn };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        migration::Migrator::up(&self.conn, None).await?;
        Ok(())
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }
}

fn parse_kind(raw: &str) -> Result<crate::models::AdvisoryKind> {
    raw.parse()
        .map_err(|e: String| MirrorError::Database(sea_orm::DbErr::Custom(e)))
}
