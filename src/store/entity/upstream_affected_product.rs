//! upstream affected product entity.

use sea_orm::entity::prelude::*;

use crate::models::AffectedProduct;

/// uniqueness of (advisory, variant, name, major, minor, arch) is enforced by two
/// partial indexes split on `minor_version IS NULL`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "upstream_advisory_affected_products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub upstream_advisory_id: i64,
    pub variant: String,
    pub name: String,
    pub major_version: i32,
    pub minor_version: Option<i32>,
    pub arch: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::upstream_advisory::Entity",
        from = "Column::UpstreamAdvisoryId",
        to = "super::upstream_advisory::Column::Id",
        on_delete = "Cascade"
    )]
    UpstreamAdvisory,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for AffectedProduct {
    fn from(model: Model) -> Self {
        AffectedProduct {
            variant: model.variant,
            name: model.name,
            major_version: model.major_version,
            minor_version: model.minor_version,
            arch: model.arch,
        }
    }
}
