//! mirror override entity.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

use crate::models::Override;

/// forces publication of one upstream advisory for one mirror.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "mirror_overrides")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub mirror_id: i64,
    pub upstream_advisory_id: i64,
    pub created_at: DateTime<Utc>,
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
    #[sea_orm(
        belongs_to = "super::upstream_advisory::Entity",
        from = "Column::UpstreamAdvisoryId",
        to = "super::upstream_advisory::Column::Id",
        on_delete = "Cascade"
    )]
    UpstreamAdvisory,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Override {
    fn from(model: Model) -> Self {
        Override {
            id: model.id,
            mirror_id: model.mirror_id,
            upstream_advisory_id: model.upstream_advisory_id,
            created_at: model.created_at,
        }
    }
}
