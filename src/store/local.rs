use super::entity::{
    advisory, advisory_affected_product, advisory_cve, advisory_fix, advisory_package, mirror,
};
use super::{ID_CHUNK, LocalRepository, RepositoryTarget, SqlStore, parse_kind};
use crate::error::Result;
use crate::models::{LocalAdvisory, UpsertOutcome};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::HashMap;
use tracing::{debug, instrument};

async fn load_local_advisories<C: ConnectionTrait>(
    conn: &C,
    headers: Vec<advisory::Model>,
) -> Result<Vec<LocalAdvisory>> {
    let ids: Vec<i64> = headers.iter().map(|h| h.id).collect();

    let mut products: HashMap<i64, Vec<advisory_affected_product::Model>> = HashMap::new();
    let mut packages: HashMap<i64, Vec<advisory_package::Model>> = HashMap::new();
    let mut cves: HashMap<i64, Vec<advisory_cve::Model>> = HashMap::new();
    let mut fixes: HashMap<i64, Vec<advisory_fix::Model>> = HashMap::new();

    for chunk in ids.chunks(ID_CHUNK) {
        for row in advisory_affected_product::Entity::find()
            .filter(advisory_affected_product::Column::AdvisoryId.is_in(chunk.to_vec()))
            .all(conn)
            .await?
        {
            products.entry(row.advisory_id).or_default().push(row);
        }
        for row in advisory_package::Entity::find()
            .filter(advisory_package::Column::AdvisoryId.is_in(chunk.to_vec()))
            .all(conn)
            .await?
        {
            packages.entry(row.advisory_id).or_default().push(row);
        }
        for row in advisory_cve::Entity::find()
            .filter(advisory_cve::Column::AdvisoryId.is_in(chunk.to_vec()))
            .all(conn)
            .await?
        {
            cves.entry(row.advisory_id).or_default().push(row);
        }
        for row in advisory_fix::Entity::find()
            .filter(advisory_fix::Column::AdvisoryId.is_in(chunk.to_vec()))
            .all(conn)
            .await?
        {
            fixes.entry(row.advisory_id).or_default().push(row);
        }
    }

    let mut advisories = Vec::with_capacity(headers.len());
    for header in headers {
        let id = header.id;
        let mut local = LocalAdvisory {
            name: header.name,
            synopsis: header.synopsis,
            description: header.description,
            topic: header.topic,
            kind: parse_kind(&header.kind)?,
            severity: header.severity,
            published_at: header.published_at,
            updated_at: header.updated_at,
            upstream_advisory_id: header.upstream_advisory_id,
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
                .map(Into::into)
                .collect(),
            cves: cves
                .remove(&id)
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
            fixes: fixes
                .remove(&id)
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
        };
        local.canonicalize();
        advisories.push(local);
    }
    Ok(advisories)
}

async fn replace_local_children<C: ConnectionTrait>(
    conn: &C,
    id: i64,
    local: &LocalAdvisory,
) -> Result<()> {
    advisory_affected_product::Entity::delete_many()
        .filter(advisory_affected_product::Column::AdvisoryId.eq(id))
        .exec(conn)
        .await?;
    advisory_package::Entity::delete_many()
        .filter(advisory_package::Column::AdvisoryId.eq(id))
        .exec(conn)
        .await?;
    advisory_cve::Entity::delete_many()
        .filter(advisory_cve::Column::AdvisoryId.eq(id))
        .exec(conn)
        .await?;
    advisory_fix::Entity::delete_many()
        .filter(advisory_fix::Column::AdvisoryId.eq(id))
        .exec(conn)
        .await?;

    if !local.affected_products.is_empty() {
        advisory_affected_product::Entity::insert_many(local.affected_products.iter().map(|p| {
            advisory_affected_product::ActiveModel {
                id: NotSet,
                advisory_id: Set(id),
                variant: Set(p.variant.clone()),
                name: Set(p.name.clone()),
                major_version: Set(p.major_version),
                minor_version: Set(p.minor_version),
                arch: Set(p.arch.clone()),
                supported_product_id: Set(p.supported_product_id),
                overridden: Set(p.overridden),
            }
        }))
        .exec_without_returning(conn)
        .await?;
    }
    // packages can run into the thousands for kernel-sized advisories
    for chunk in local.packages.chunks(ID_CHUNK / 10) {
        advisory_package::Entity::insert_many(chunk.iter().map(|p| {
            advisory_package::ActiveModel {
                id: NotSet,
                advisory_id: Set(id),
                nevra: Set(p.nevra.clone()),
                checksum: Set(p.checksum.clone()),
                checksum_type: Set(p.checksum_type.clone()),
                module_context: Set(p.module_context.clone()),
                module_name: Set(p.module_name.clone()),
                module_stream: Set(p.module_stream.clone()),
                module_version: Set(p.module_version.clone()),
                repo_name: Set(p.repo_name.clone()),
                package_name: Set(p.package_name.clone()),
                mirror_id: Set(p.mirror_id),
                supported_product_id: Set(p.supported_product_id),
                product_name: Set(p.product_name.clone()),
            }
        }))
        .exec_without_returning(conn)
        .await?;
    }
    if !local.cves.is_empty() {
        advisory_cve::Entity::insert_many(local.cves.iter().map(|c| advisory_cve::ActiveModel {
            id: NotSet,
            advisory_id: Set(id),
            cve: Set(c.cve.clone()),
            cvss3_scoring_vector: Set(c.cvss3_scoring_vector.clone()),
            cvss3_base_score: Set(c.cvss3_base_score.clone()),
            cwe: Set(c.cwe.clone()),
        }))
        .exec_without_returning(conn)
        .await?;
    }
    if !local.fixes.is_empty() {
        advisory_fix::Entity::insert_many(local.fixes.iter().map(|f| advisory_fix::ActiveModel {
            id: NotSet,
            advisory_id: Set(id),
            ticket_id: Set(f.ticket_id.clone()),
            source: Set(f.source.clone()),
            description: Set(f.description.clone()),
        }))
        .exec_without_returning(conn)
        .await?;
    }
    Ok(())
}

fn header_model(local: &LocalAdvisory) -> advisory::ActiveModel {
    advisory::ActiveModel {
        id: NotSet,
        name: Set(local.name.clone()),
        synopsis: Set(local.synopsis.clone()),
        description: Set(local.description.clone()),
        topic: Set(local.topic.clone()),
        kind: Set(local.kind.as_str().to_string()),
        severity: Set(local.severity.clone()),
        upstream_advisory_id: Set(local.upstream_advisory_id),
        published_at: Set(local.published_at),
        updated_at: Set(local.updated_at),
    }
}

async fn local_advisory_id<C: ConnectionTrait>(conn: &C, name: &str) -> Result<i64> {
    Ok(advisory::Entity::find()
        .filter(advisory::Column::Name.eq(name))
        .select_only()
        .column(advisory::Column::Id)
        .into_tuple::<i64>()
        .one(conn)
        .await?
        .ok_or(sea_orm::DbErr::RecordNotInserted)?)
}

/// Upsert the header by name and replace every child row.
async fn write_local_advisory<C: ConnectionTrait>(conn: &C, local: &LocalAdvisory) -> Result<()> {
    advisory::Entity::insert(header_model(local))
        .on_conflict(
            OnConflict::column(advisory::Column::Name)
                .update_columns([
                    advisory::Column::Synopsis,
                    advisory::Column::Description,
                    advisory::Column::Topic,
                    advisory::Column::Kind,
                    advisory::Column::Severity,
                    advisory::Column::UpstreamAdvisoryId,
                    advisory::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    let id = local_advisory_id(conn, &local.name).await?;
    replace_local_children(conn, id, local).await
}

#[async_trait]
impl LocalRepository for SqlStore {
    async fn get_local_advisory(&self, name: &str) -> Result<Option<LocalAdvisory>> {
        let Some(header) = advisory::Entity::find()
            .filter(advisory::Column::Name.eq(name))
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };
        Ok(load_local_advisories(&self.conn, vec![header])
            .await?
            .into_iter()
            .next())
    }

    #[instrument(skip(self, local), fields(name = %local.name))]
    async fn upsert_local_advisory(&self, local: &LocalAdvisory) -> Result<UpsertOutcome> {
        let mut local = local.clone();
        local.canonicalize();

        let txn = self.conn.begin().await?;
        let existing = advisory::Entity::find()
            .filter(advisory::Column::Name.eq(local.name.as_str()))
            .one(&txn)
            .await?;

        let outcome = match existing {
            Some(header) => {
                let published_at = header.published_at;
                let stored = load_local_advisories(&txn, vec![header]).await?;
                if stored.first().is_some_and(|s| s.same_content(&local)) {
                    txn.commit().await?;
                    debug!("Local advisory {} unchanged", local.name);
                    return Ok(UpsertOutcome::Unchanged);
                }
                local.published_at = published_at;
                local.updated_at = Utc::now();
                UpsertOutcome::Updated
            }
            None => UpsertOutcome::Created,
        };

        write_local_advisory(&txn, &local).await?;
        txn.commit().await?;

        debug!("Local advisory {} {:?}", local.name, outcome);
        Ok(outcome)
    }

    #[instrument(skip(self, contribution), fields(name = %contribution.name))]
    async fn merge_local_advisory(&self, contribution: &LocalAdvisory) -> Result<UpsertOutcome> {
        let mut incoming = contribution.clone();
        incoming.canonicalize();

        let txn = self.conn.begin().await?;

        // Claim the name first. A concurrent creator waits on the unique index
        // and then merges into the committed row.
        let inserted = advisory::Entity::insert(header_model(&incoming))
            .on_conflict(
                OnConflict::column(advisory::Column::Name)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;
        if inserted > 0 {
            let id = local_advisory_id(&txn, &incoming.name).await?;
            replace_local_children(&txn, id, &incoming).await?;
            txn.commit().await?;
            debug!("Local advisory {} Created", incoming.name);
            return Ok(UpsertOutcome::Created);
        }

        let mut query =
            advisory::Entity::find().filter(advisory::Column::Name.eq(incoming.name.as_str()));
        // SQLite has no row locks; its write transaction already excludes other writers.
        if txn.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }
        let header = query
            .one(&txn)
            .await?
            .ok_or(sea_orm::DbErr::RecordNotFound(incoming.name.clone()))?;
        let stored = load_local_advisories(&txn, vec![header])
            .await?
            .into_iter()
            .next()
            .ok_or(sea_orm::DbErr::RecordNotFound(incoming.name.clone()))?;

        let mut merged = stored.clone().merged_with(incoming);
        if stored.same_content(&merged) {
            txn.commit().await?;
            debug!("Local advisory {} unchanged", merged.name);
            return Ok(UpsertOutcome::Unchanged);
        }
        merged.updated_at = Utc::now();
        write_local_advisory(&txn, &merged).await?;
        txn.commit().await?;

        debug!("Local advisory {} Updated", merged.name);
        Ok(UpsertOutcome::Updated)
    }

    async fn list_published_repositories(&self) -> Result<Vec<RepositoryTarget>> {
        let pairs: Vec<(i64, String)> = advisory_package::Entity::find()
            .select_only()
            .column(advisory_package::Column::MirrorId)
            .column(advisory_package::Column::RepoName)
            .distinct()
            .into_tuple()
            .all(&self.conn)
            .await?;
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let mut mirror_ids: Vec<i64> = pairs.iter().map(|(id, _)| *id).collect();
        mirror_ids.sort_unstable();
        mirror_ids.dedup();
        let mirrors: HashMap<i64, mirror::Model> = mirror::Entity::find()
            .filter(mirror::Column::Id.is_in(mirror_ids))
            .all(&self.conn)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let mut targets: Vec<RepositoryTarget> = pairs
            .into_iter()
            .filter_map(|(mirror_id, repo_name)| {
                let mirror = mirrors.get(&mirror_id)?;
                Some(RepositoryTarget {
                    mirror_name: mirror.name.clone(),
                    repo_name,
                    mirror_id,
                    arch: mirror.match_arch.clone(),
                })
            })
            .collect();
        targets.sort();
        Ok(targets)
    }

    async fn load_repository_advisories(
        &self,
        target: &RepositoryTarget,
    ) -> Result<Vec<LocalAdvisory>> {
        let ids: Vec<i64> = advisory_package::Entity::find()
            .filter(advisory_package::Column::MirrorId.eq(target.mirror_id))
            .filter(advisory_package::Column::RepoName.eq(target.repo_name.as_str()))
            .select_only()
            .column(advisory_package::Column::AdvisoryId)
            .distinct()
            .into_tuple()
            .all(&self.conn)
            .await?;

        let mut headers = Vec::new();
        for chunk in ids.chunks(ID_CHUNK) {
            headers.extend(
                advisory::Entity::find()
                    .filter(advisory::Column::Id.is_in(chunk.to_vec()))
                    .order_by_asc(advisory::Column::Name)
                    .all(&self.conn)
                    .await?,
            );
        }
        headers.sort_by(|a, b| a.name.cmp(&b.name));
        load_local_advisories(&self.conn, headers).await
    }

    async fn count_local_advisories(&self) -> Result<u64> {
        Ok(advisory::Entity::find().count(&self.conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CatalogRepository;
    use crate::testing::{
        local_advisory, local_package, mirror_fixture, supported_product_fixture,
    };
    use chrono::Duration;

    #[tokio::test]
    async fn test_upsert_unchanged_keeps_timestamps() {
        let store = SqlStore::new_in_memory().await.unwrap();
        let advisory = local_advisory("RLSA-2024:0001", vec![local_package("bash", 1, "BaseOS")]);

        assert_eq!(
            store.upsert_local_advisory(&advisory).await.unwrap(),
            UpsertOutcome::Created
        );
        let stored = store.get_local_advisory("RLSA-2024:0001").await.unwrap().unwrap();

        // a replay carrying a fresh timestamp is still a no-op
        let mut replay = advisory.clone();
        replay.updated_at = replay.updated_at + Duration::days(3);
        assert_eq!(
            store.upsert_local_advisory(&replay).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        let again = store.get_local_advisory("RLSA-2024:0001").await.unwrap().unwrap();
        assert_eq!(again.updated_at, stored.updated_at);
        assert_eq!(store.count_local_advisories().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_changed_preserves_published_at() {
        let store = SqlStore::new_in_memory().await.unwrap();
        let advisory = local_advisory("RLSA-2024:0002", vec![local_package("bash", 1, "BaseOS")]);
        store.upsert_local_advisory(&advisory).await.unwrap();

        let mut changed = advisory.clone();
        changed.packages.push(local_package("bash-doc", 1, "BaseOS"));
        changed.published_at = changed.published_at + Duration::days(10);
        assert_eq!(
            store.upsert_local_advisory(&changed).await.unwrap(),
            UpsertOutcome::Updated
        );

        let stored = store.get_local_advisory("RLSA-2024:0002").await.unwrap().unwrap();
        assert_eq!(stored.published_at, advisory.published_at);
        assert!(stored.updated_at > advisory.updated_at);
        assert_eq!(stored.packages.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_unions_children_and_keeps_published_at() {
        let store = SqlStore::new_in_memory().await.unwrap();
        let first = local_advisory("RLSA-2024:0006", vec![local_package("bash", 1, "BaseOS")]);
        assert_eq!(
            store.merge_local_advisory(&first).await.unwrap(),
            UpsertOutcome::Created
        );

        let mut second =
            local_advisory("RLSA-2024:0006", vec![local_package("bash", 2, "BaseOS")]);
        second.synopsis = "Moderate: bash security update".to_string();
        second.published_at = second.published_at + Duration::days(10);
        assert_eq!(
            store.merge_local_advisory(&second).await.unwrap(),
            UpsertOutcome::Updated
        );

        let stored = store.get_local_advisory("RLSA-2024:0006").await.unwrap().unwrap();
        assert_eq!(stored.packages.len(), 2);
        assert_eq!(stored.synopsis, "Moderate: bash security update");
        assert_eq!(stored.published_at, first.published_at);

        // a replayed contribution is already contained
        assert_eq!(
            store.merge_local_advisory(&second).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            store.get_local_advisory("RLSA-2024:0006").await.unwrap().unwrap().packages.len(),
            2
        );
    }

    #[tokio::test]
    async fn test_same_nevra_allowed_once_per_repo_and_mirror() {
        let store = SqlStore::new_in_memory().await.unwrap();
        let mut advisory = local_advisory(
            "RLSA-2024:0003",
            vec![
                local_package("bash", 1, "BaseOS"),
                local_package("bash", 1, "BaseOS"),
                local_package("bash", 2, "BaseOS"),
                local_package("bash", 1, "AppStream"),
            ],
        );
        store.upsert_local_advisory(&advisory).await.unwrap();
        let stored = store.get_local_advisory("RLSA-2024:0003").await.unwrap().unwrap();
        assert_eq!(stored.packages.len(), 3);

        advisory.canonicalize();
        assert_eq!(stored.packages, advisory.packages);
    }

    #[tokio::test]
    async fn test_repository_targets_and_loading() {
        let store = SqlStore::new_in_memory().await.unwrap();
        let product = store
            .create_supported_product(&supported_product_fixture("Rocky Linux 9", Some("RL")))
            .await
            .unwrap();
        let mirror = store
            .create_mirror(&mirror_fixture(product.id, "Rocky Linux 9 x86_64", None, "x86_64"))
            .await
            .unwrap();

        let mut package = local_package("bash", mirror.id, "BaseOS");
        package.supported_product_id = product.id;
        store
            .upsert_local_advisory(&local_advisory("RLSA-2024:0005", vec![package.clone()]))
            .await
            .unwrap();
        store
            .upsert_local_advisory(&local_advisory("RLBA-2024:0004", vec![package]))
            .await
            .unwrap();

        let targets = store.list_published_repositories().await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].mirror_name, "Rocky Linux 9 x86_64");
        assert_eq!(targets[0].arch, "x86_64");

        let names: Vec<String> = store
            .load_repository_advisories(&targets[0])
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["RLBA-2024:0004", "RLSA-2024:0005"]);
    }
}
