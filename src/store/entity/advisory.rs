//! local advisory header entity.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "advisories")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub synopsis: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Text")]
    pub topic: String,
    pub kind: String,
    pub severity: String,
    /// NULL for hand-authored advisories or once the upstream row is deleted.
    pub upstream_advisory_id: Option<i64>,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::upstream_advisory::Entity",
        from = "Column::UpstreamAdvisoryId",
        to = "super::upstream_advisory::Column::Id",
        on_delete = "SetNull"
    )]
    UpstreamAdvisory,
}

impl ActiveModelBehavior for ActiveModel {}
