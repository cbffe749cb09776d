use super::entity::{
    index_state, upstream_advisory, upstream_affected_product, upstream_bugzilla_bug,
    upstream_cve, upstream_package,
};
use super::{ID_CHUNK, SqlStore, UpstreamRepository, parse_kind};
use crate::error::Result;
use crate::matcher::{MatchPredicate, MatchWindow};
use crate::models::{UpsertOutcome, UpstreamAdvisory, UpstreamRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, instrument};

const CURSOR_ID: i64 = 1;

/// Load children for a set of headers with one query per child table.
pub(super) async fn load_upstream_records<C: ConnectionTrait>(
    conn: &C,
    headers: Vec<upstream_advisory::Model>,
) -> Result<Vec<UpstreamRecord>> {
    let ids: Vec<i64> = headers.iter().map(|h| h.id).collect();

    let mut products: HashMap<i64, Vec<upstream_affected_product::Model>> = HashMap::new();
    let mut packages: HashMap<i64, Vec<upstream_package::Model>> = HashMap::new();
    let mut cves: HashMap<i64, Vec<upstream_cve::Model>> = HashMap::new();
    let mut bugs: HashMap<i64, Vec<upstream_bugzilla_bug::Model>> = HashMap::new();

    for chunk in ids.chunks(ID_CHUNK) {
        for row in upstream_affected_product::Entity::find()
            .filter(upstream_affected_product::Column::UpstreamAdvisoryId.is_in(chunk.to_vec()))
            .all(conn)
            .await?
        {
            products.entry(row.upstream_advisory_id).or_default().push(row);
        }
        for row in upstream_package::Entity::find()
            .filter(upstream_package::Column::UpstreamAdvisoryId.is_in(chunk.to_vec()))
            .all(conn)
            .await?
        {
            packages.entry(row.upstream_advisory_id).or_default().push(row);
        }
        for row in upstream_cve::Entity::find()
            .filter(upstream_cve::Column::UpstreamAdvisoryId.is_in(chunk.to_vec()))
            .all(conn)
            .await?
        {
            cves.entry(row.upstream_advisory_id).or_default().push(row);
        }
        for row in upstream_bugzilla_bug::Entity::find()
            .filter(upstream_bugzilla_bug::Column::UpstreamAdvisoryId.is_in(chunk.to_vec()))
            .all(conn)
            .await?
        {
            bugs.entry(row.upstream_advisory_id).or_default().push(row);
        }
    }

    let mut records = Vec::with_capacity(headers.len());
    for header in headers {
        let id = header.id;
        let mut advisory = UpstreamAdvisory {
            name: header.name,
            issued_at: header.issued_at,
            modified_at: header.modified_at,
            synopsis: header.synopsis,
            description: header.description,
            topic: header.topic,
            kind: parse_kind(&header.kind)?,
            severity: header.severity,
            affected_products: products
                .remove(&id)
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
            packages: packages
                .remove(&id)
                .unwrap_or_default()
                .into_iter()
                .map(|p| p.nevra)
                .collect(),
            cves: cves
                .remove(&id)
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
            bugzilla_tickets: bugs
                .remove(&id)
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
        };
        advisory.canonicalize();
        records.push(UpstreamRecord { id, advisory });
    }
    Ok(records)
}

async fn replace_upstream_children<C: ConnectionTrait>(
    conn: &C,
    id: i64,
    advisory: &UpstreamAdvisory,
) -> Result<()> {
    upstream_affected_product::Entity::delete_many()
        .filter(upstream_affected_product::Column::UpstreamAdvisoryId.eq(id))
        .exec(conn)
        .await?;
    upstream_package::Entity::delete_many()
        .filter(upstream_package::Column::UpstreamAdvisoryId.eq(id))
        .exec(conn)
        .await?;
    upstream_cve::Entity::delete_many()
        .filter(upstream_cve::Column::UpstreamAdvisoryId.eq(id))
        .exec(conn)
        .await?;
    upstream_bugzilla_bug::Entity::delete_many()
        .filter(upstream_bugzilla_bug::Column::UpstreamAdvisoryId.eq(id))
        .exec(conn)
        .await?;

    if !advisory.affected_products.is_empty() {
        upstream_affected_product::Entity::insert_many(advisory.affected_products.iter().map(
            |p| upstream_affected_product::ActiveModel {
                id: NotSet,
                upstream_advisory_id: Set(id),
                variant: Set(p.variant.clone()),
                name: Set(p.name.clone()),
                major_version: Set(p.major_version),
                minor_version: Set(p.minor_version),
                arch: Set(p.arch.clone()),
            },
        ))
        .exec_without_returning(conn)
        .await?;
    }
    if !advisory.packages.is_empty() {
        upstream_package::Entity::insert_many(advisory.packages.iter().map(|nevra| {
            upstream_package::ActiveModel {
                id: NotSet,
                upstream_advisory_id: Set(id),
                nevra: Set(nevra.clone()),
            }
        }))
        .exec_without_returning(conn)
        .await?;
    }
    if !advisory.cves.is_empty() {
        upstream_cve::Entity::insert_many(advisory.cves.iter().map(|c| upstream_cve::ActiveModel {
            id: NotSet,
            upstream_advisory_id: Set(id),
            cve: Set(c.cve.clone()),
            cvss3_scoring_vector: Set(c.cvss3_scoring_vector.clone()),
            cvss3_base_score: Set(c.cvss3_base_score.clone()),
            cwe: Set(c.cwe.clone()),
        }))
        .exec_without_returning(conn)
        .await?;
    }
    if !advisory.bugzilla_tickets.is_empty() {
        upstream_bugzilla_bug::Entity::insert_many(advisory.bugzilla_tickets.iter().map(|b| {
            upstream_bugzilla_bug::ActiveModel {
                id: NotSet,
                upstream_advisory_id: Set(id),
                bug_id: Set(b.bug_id.clone()),
                description: Set(b.description.clone()),
            }
        }))
        .exec_without_returning(conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl UpstreamRepository for SqlStore {
    #[instrument(skip(self, advisory), fields(name = %advisory.name))]
    async fn upsert_upstream_advisory(
        &self,
        advisory: &UpstreamAdvisory,
    ) -> Result<(i64, UpsertOutcome)> {
        let mut advisory = advisory.clone();
        advisory.canonicalize();

        let txn = self.conn.begin().await?;

        let existing = upstream_advisory::Entity::find()
            .filter(upstream_advisory::Column::Name.eq(advisory.name.as_str()))
            .one(&txn)
            .await?;
        if let Some(header) = existing.clone() {
            let id = header.id;
            let stored = load_upstream_records(&txn, vec![header]).await?;
            if stored.first().is_some_and(|r| r.advisory == advisory) {
                txn.commit().await?;
                debug!("Upstream advisory {} unchanged", advisory.name);
                return Ok((id, UpsertOutcome::Unchanged));
            }
        }

        let now = Utc::now();
        let header = upstream_advisory::ActiveModel {
            id: NotSet,
            name: Set(advisory.name.clone()),
            issued_at: Set(advisory.issued_at),
            modified_at: Set(advisory.modified_at),
            synopsis: Set(advisory.synopsis.clone()),
            description: Set(advisory.description.clone()),
            topic: Set(advisory.topic.clone()),
            kind: Set(advisory.kind.as_str().to_string()),
            severity: Set(advisory.severity.clone()),
            created_at: Set(now),
            updated_at: Set(None),
        };
        upstream_advisory::Entity::insert(header)
            .on_conflict(
                OnConflict::column(upstream_advisory::Column::Name)
                    .update_columns([
                        upstream_advisory::Column::IssuedAt,
                        upstream_advisory::Column::ModifiedAt,
                        upstream_advisory::Column::Synopsis,
                        upstream_advisory::Column::Description,
                        upstream_advisory::Column::Topic,
                        upstream_advisory::Column::Kind,
                        upstream_advisory::Column::Severity,
                    ])
                    .value(upstream_advisory::Column::UpdatedAt, Expr::value(now))
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        let id = upstream_advisory::Entity::find()
            .filter(upstream_advisory::Column::Name.eq(advisory.name.as_str()))
            .select_only()
            .column(upstream_advisory::Column::Id)
            .into_tuple::<i64>()
            .one(&txn)
            .await?
            .ok_or(sea_orm::DbErr::RecordNotInserted)?;

        replace_upstream_children(&txn, id, &advisory).await?;
        txn.commit().await?;

        let outcome = if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        };
        debug!("Upstream advisory {} {:?}", advisory.name, outcome);
        Ok((id, outcome))
    }

    async fn get_upstream_advisory(&self, name: &str) -> Result<Option<UpstreamRecord>> {
        let Some(header) = upstream_advisory::Entity::find()
            .filter(upstream_advisory::Column::Name.eq(name))
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };
        Ok(load_upstream_records(&self.conn, vec![header])
            .await?
            .into_iter()
            .next())
    }

    async fn get_upstream_advisories(&self, ids: &[i64]) -> Result<Vec<UpstreamRecord>> {
        let mut headers = Vec::new();
        for chunk in ids.chunks(ID_CHUNK) {
            headers.extend(
                upstream_advisory::Entity::find()
                    .filter(upstream_advisory::Column::Id.is_in(chunk.to_vec()))
                    .all(&self.conn)
                    .await?,
            );
        }
        headers.sort_by_key(|h| h.id);
        load_upstream_records(&self.conn, headers).await
    }

    #[instrument(skip(self))]
    async fn find_matching_upstream(
        &self,
        predicate: &MatchPredicate,
        window: &MatchWindow,
    ) -> Result<Vec<UpstreamRecord>> {
        let mut query = upstream_affected_product::Entity::find()
            .filter(upstream_affected_product::Column::Variant.eq(predicate.variant.as_str()))
            .filter(upstream_affected_product::Column::MajorVersion.eq(predicate.major_version))
            .filter(upstream_affected_product::Column::Arch.eq(predicate.arch.as_str()));
        // no minor filter at all when the mirror leaves it open
        if let Some(minor) = predicate.minor_version {
            query = query.filter(upstream_affected_product::Column::MinorVersion.eq(minor));
        }
        let candidate_ids: BTreeSet<i64> = query
            .select_only()
            .column(upstream_affected_product::Column::UpstreamAdvisoryId)
            .into_tuple::<i64>()
            .all(&self.conn)
            .await?
            .into_iter()
            .collect();

        let candidate_ids: Vec<i64> = candidate_ids.into_iter().collect();
        let mut headers = Vec::new();
        for chunk in candidate_ids.chunks(ID_CHUNK) {
            let mut query = upstream_advisory::Entity::find()
                .filter(upstream_advisory::Column::Id.is_in(chunk.to_vec()));
            if let Some(since) = window.since {
                query = query.filter(upstream_advisory::Column::IssuedAt.gte(since));
            }
            if let Some(until) = window.until {
                query = query.filter(upstream_advisory::Column::IssuedAt.lt(until));
            }
            headers.extend(
                query
                    .order_by_asc(upstream_advisory::Column::Id)
                    .all(&self.conn)
                    .await?,
            );
        }
        headers.sort_by_key(|h| h.id);

        debug!("{} upstream advisories pass the prefilter", headers.len());
        load_upstream_records(&self.conn, headers).await
    }

    async fn delete_upstream_advisory(&self, name: &str) -> Result<bool> {
        let result = upstream_advisory::Entity::delete_many()
            .filter(upstream_advisory::Column::Name.eq(name))
            .exec(&self.conn)
            .await?;
        if result.rows_affected > 0 {
            info!("Deleted upstream advisory {}", name);
        }
        Ok(result.rows_affected > 0)
    }

    async fn count_upstream_advisories(&self) -> Result<u64> {
        Ok(upstream_advisory::Entity::find().count(&self.conn).await?)
    }

    async fn get_cursor(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(index_state::Entity::find_by_id(CURSOR_ID)
            .one(&self.conn)
            .await?
            .map(|state| state.last_indexed_at))
    }

    #[instrument(skip(self))]
    async fn advance_cursor(&self, timestamp: DateTime<Utc>) -> Result<bool> {
        let txn = self.conn.begin().await?;
        let current = index_state::Entity::find_by_id(CURSOR_ID).one(&txn).await?;
        if current
            .as_ref()
            .is_some_and(|state| state.last_indexed_at >= timestamp)
        {
            txn.commit().await?;
            return Ok(false);
        }

        let row = index_state::ActiveModel {
            id: Set(CURSOR_ID),
            last_indexed_at: Set(timestamp),
            updated_at: Set(Utc::now()),
        };
        index_state::Entity::insert(row)
            .on_conflict(
                OnConflict::column(index_state::Column::Id)
                    .update_columns([
                        index_state::Column::LastIndexedAt,
                        index_state::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;
        txn.commit().await?;

        info!("Cursor advanced to {}", timestamp);
        Ok(true)
    }
}
