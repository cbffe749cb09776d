//! mirror repository entity.

use sea_orm::entity::prelude::*;

use crate::models::RepositorySource;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "mirror_repositories")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub mirror_id: i64,
    pub production: bool,
    pub arch: String,
    pub url: String,
    pub debug_url: Option<String>,
    pub source_url: Option<String>,
    pub repo_name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::mirror::Entity",
        from = "Column::MirrorId",
        to = "super::mirror::Column::Id",
        on_delete = "Cascade"
    )]
    Mirror,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for RepositorySource {
    fn from(model: Model) -> Self {
        RepositorySource {
            id: model.id,
            mirror_id: model.mirror_id,
            production: model.production,
            arch: model.arch,
            url: model.url,
            debug_url: model.debug_url,
            source_url: model.source_url,
            repo_name: model.repo_name,
        }
    }
}
