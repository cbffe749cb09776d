//! upstream advisory header entity.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// one normalized vendor advisory. children live in the `upstream_advisory_*` tables.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "upstream_advisories")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    pub issued_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[sea_orm(column_type = "Text")]
    pub synopsis: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Text")]
    pub topic: String,
    pub kind: String,
    pub severity: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
