use super::entity::{mirror, mirror_block, mirror_override, mirror_repository, supported_product};
use super::{CatalogRepository, SqlStore};
use crate::error::Result;
use crate::models::{Block, Mirror, Override, RepositorySource, SupportedProduct};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::collections::HashMap;
use tracing::{info, instrument};

fn mirror_from_model(model: mirror::Model, repositories: Vec<RepositorySource>) -> Mirror {
    Mirror {
        id: model.id,
        supported_product_id: model.supported_product_id,
        name: model.name,
        match_variant: model.match_variant,
        match_major_version: model.match_major_version,
        match_minor_version: model.match_minor_version,
        match_arch: model.match_arch,
        active: model.active,
        repositories,
    }
}

async fn insert_repository<C: ConnectionTrait>(
    conn: &C,
    mirror_id: i64,
    repository: &RepositorySource,
) -> Result<RepositorySource> {
    let model = mirror_repository::ActiveModel {
        id: NotSet,
        mirror_id: Set(mirror_id),
        production: Set(repository.production),
        arch: Set(repository.arch.clone()),
        url: Set(repository.url.clone()),
        debug_url: Set(repository.debug_url.clone()),
        source_url: Set(repository.source_url.clone()),
        repo_name: Set(repository.repo_name.clone()),
    };
    Ok(model.insert(conn).await?.into())
}

async fn with_repositories<C: ConnectionTrait>(
    conn: &C,
    mirrors: Vec<mirror::Model>,
) -> Result<Vec<Mirror>> {
    let ids: Vec<i64> = mirrors.iter().map(|m| m.id).collect();

    let mut repositories: HashMap<i64, Vec<RepositorySource>> = HashMap::new();
    if !ids.is_empty() {
        for row in mirror_repository::Entity::find()
            .filter(mirror_repository::Column::MirrorId.is_in(ids))
            .order_by_asc(mirror_repository::Column::Id)
            .all(conn)
            .await?
        {
            repositories
                .entry(row.mirror_id)
                .or_default()
                .push(row.into());
        }
    }

    Ok(mirrors
        .into_iter()
        .map(|model| {
            let repos = repositories.remove(&model.id).unwrap_or_default();
            mirror_from_model(model, repos)
        })
        .collect())
}

#[async_trait]
impl CatalogRepository for SqlStore {
    async fn list_active_mirrors(&self) -> Result<Vec<Mirror>> {
        let mirrors = mirror::Entity::find()
            .filter(mirror::Column::Active.eq(true))
            .order_by_asc(mirror::Column::Id)
            .all(&self.conn)
            .await?;
        with_repositories(&self.conn, mirrors).await
    }

    async fn list_product_mirrors(&self, supported_product_id: i64) -> Result<Vec<Mirror>> {
        let mirrors = mirror::Entity::find()
            .filter(mirror::Column::SupportedProductId.eq(supported_product_id))
            .order_by_asc(mirror::Column::Id)
            .all(&self.conn)
            .await?;
        with_repositories(&self.conn, mirrors).await
    }

    async fn get_supported_product(&self, id: i64) -> Result<Option<SupportedProduct>> {
        Ok(supported_product::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .map(Into::into))
    }

    async fn list_blocks(&self, mirror_id: i64) -> Result<Vec<Block>> {
        let rows = mirror_block::Entity::find()
            .filter(mirror_block::Column::MirrorId.eq(mirror_id))
            .order_by_asc(mirror_block::Column::Id)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_overrides(&self, mirror_id: i64) -> Result<Vec<Override>> {
        let rows = mirror_override::Entity::find()
            .filter(mirror_override::Column::MirrorId.eq(mirror_id))
            .order_by_asc(mirror_override::Column::Id)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, product), fields(name = %product.name))]
    async fn create_supported_product(
        &self,
        product: &SupportedProduct,
    ) -> Result<SupportedProduct> {
        let model = supported_product::ActiveModel {
            id: NotSet,
            name: Set(product.name.clone()),
            variant: Set(product.variant.clone()),
            vendor: Set(product.vendor.clone()),
            code: Set(product.code.clone()),
            eol_at: Set(product.eol_at),
            created_at: Set(Utc::now()),
        };
        let created: SupportedProduct = model.insert(&self.conn).await?.into();
        info!("Created supported product {} ({})", created.name, created.id);
        Ok(created)
    }

    #[instrument(skip(self, mirror), fields(name = %mirror.name))]
    async fn create_mirror(&self, mirror: &Mirror) -> Result<Mirror> {
        let txn = self.conn.begin().await?;
        let model = mirror::ActiveModel {
            id: NotSet,
            supported_product_id: Set(mirror.supported_product_id),
            name: Set(mirror.name.clone()),
            match_variant: Set(mirror.match_variant.clone()),
            match_major_version: Set(mirror.match_major_version),
            match_minor_version: Set(mirror.match_minor_version),
            match_arch: Set(mirror.match_arch.clone()),
            active: Set(mirror.active),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        let mut repositories = Vec::with_capacity(mirror.repositories.len());
        for repository in &mirror.repositories {
            repositories.push(insert_repository(&txn, model.id, repository).await?);
        }
        txn.commit().await?;

        info!("Created mirror {} ({})", model.name, model.id);
        Ok(mirror_from_model(model, repositories))
    }

    async fn add_repository(&self, repository: &RepositorySource) -> Result<RepositorySource> {
        insert_repository(&self.conn, repository.mirror_id, repository).await
    }

    async fn set_mirror_active(&self, mirror_id: i64, active: bool) -> Result<()> {
        mirror::Entity::update_many()
            .col_expr(
                mirror::Column::Active,
                sea_orm::sea_query::Expr::value(active),
            )
            .filter(mirror::Column::Id.eq(mirror_id))
            .exec(&self.conn)
            .await?;
        info!("Mirror {} active={}", mirror_id, active);
        Ok(())
    }

    async fn add_block(&self, mirror_id: i64, upstream_advisory_id: i64) -> Result<Block> {
        mirror_block::Entity::insert(mirror_block::ActiveModel {
            id: NotSet,
            mirror_id: Set(mirror_id),
            upstream_advisory_id: Set(upstream_advisory_id),
            created_at: Set(Utc::now()),
        })
        .on_conflict(
            OnConflict::columns([
                mirror_block::Column::MirrorId,
                mirror_block::Column::UpstreamAdvisoryId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(&self.conn)
        .await?;

        let block = mirror_block::Entity::find()
            .filter(mirror_block::Column::MirrorId.eq(mirror_id))
            .filter(mirror_block::Column::UpstreamAdvisoryId.eq(upstream_advisory_id))
            .one(&self.conn)
            .await?
            .ok_or(sea_orm::DbErr::RecordNotInserted)?;
        Ok(block.into())
    }

    async fn remove_block(&self, mirror_id: i64, upstream_advisory_id: i64) -> Result<bool> {
        let result = mirror_block::Entity::delete_many()
            .filter(mirror_block::Column::MirrorId.eq(mirror_id))
            .filter(mirror_block::Column::UpstreamAdvisoryId.eq(upstream_advisory_id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn add_override(&self, mirror_id: i64, upstream_advisory_id: i64) -> Result<Override> {
        mirror_override::Entity::insert(mirror_override::ActiveModel {
            id: NotSet,
            mirror_id: Set(mirror_id),
            upstream_advisory_id: Set(upstream_advisory_id),
            created_at: Set(Utc::now()),
        })
        .on_conflict(
            OnConflict::columns([
                mirror_override::Column::MirrorId,
                mirror_override::Column::UpstreamAdvisoryId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(&self.conn)
        .await?;

        let row = mirror_override::Entity::find()
            .filter(mirror_override::Column::MirrorId.eq(mirror_id))
            .filter(mirror_override::Column::UpstreamAdvisoryId.eq(upstream_advisory_id))
            .one(&self.conn)
            .await?
            .ok_or(sea_orm::DbErr::RecordNotInserted)?;
        Ok(row.into())
    }

    async fn remove_override(&self, mirror_id: i64, upstream_advisory_id: i64) -> Result<bool> {
        let result = mirror_override::Entity::delete_many()
            .filter(mirror_override::Column::MirrorId.eq(mirror_id))
            .filter(mirror_override::Column::UpstreamAdvisoryId.eq(upstream_advisory_id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UpstreamRepository;
    use crate::testing::{mirror_fixture, supported_product_fixture, upstream_advisory};

    #[tokio::test]
    async fn test_create_mirror_with_repositories() {
        let store = SqlStore::new_in_memory().await.unwrap();
        let product = store
            .create_supported_product(&supported_product_fixture("Rocky Linux 9", Some("RL")))
            .await
            .unwrap();
        let mirror = store
            .create_mirror(&mirror_fixture(product.id, "Rocky Linux 9 x86_64", None, "x86_64"))
            .await
            .unwrap();

        let active = store.list_active_mirrors().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, mirror.id);
        assert_eq!(active[0].repositories.len(), mirror.repositories.len());
        assert!(!active[0].repositories.is_empty());

        store.set_mirror_active(mirror.id, false).await.unwrap();
        assert!(store.list_active_mirrors().await.unwrap().is_empty());

        // inactive mirrors still belong to their product
        let owned = store.list_product_mirrors(product.id).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert!(!owned[0].active);
        assert!(!owned[0].repositories.is_empty());
        assert!(store.list_product_mirrors(product.id + 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocks_and_overrides_are_unique_per_pair() {
        let store = SqlStore::new_in_memory().await.unwrap();
        let product = store
            .create_supported_product(&supported_product_fixture("Rocky Linux 9", Some("RL")))
            .await
            .unwrap();
        let mirror = store
            .create_mirror(&mirror_fixture(product.id, "Rocky Linux 9 x86_64", None, "x86_64"))
            .await
            .unwrap();
        let (advisory_id, _) = store
            .upsert_upstream_advisory(&upstream_advisory(
                "RHSA-2024:0001",
                &[("Red Hat Enterprise Linux", 9, None, "x86_64")],
            ))
            .await
            .unwrap();

        let first = store.add_block(mirror.id, advisory_id).await.unwrap();
        let second = store.add_block(mirror.id, advisory_id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_blocks(mirror.id).await.unwrap().len(), 1);

        store.add_override(mirror.id, advisory_id).await.unwrap();
        assert_eq!(store.list_overrides(mirror.id).await.unwrap().len(), 1);

        assert!(store.remove_block(mirror.id, advisory_id).await.unwrap());
        assert!(!store.remove_block(mirror.id, advisory_id).await.unwrap());
        assert!(store.list_blocks(mirror.id).await.unwrap().is_empty());

        // deleting the upstream advisory takes its overrides with it
        store.delete_upstream_advisory("RHSA-2024:0001").await.unwrap();
        assert!(store.list_overrides(mirror.id).await.unwrap().is_empty());
    }
}
