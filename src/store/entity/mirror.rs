//! mirror entity.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// a match predicate selecting upstream advisories for one supported product stream.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "mirrors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub supported_product_id: i64,
    pub name: String,
    pub match_variant: String,
    pub match_major_version: i32,
    /// NULL matches every minor version.
    pub match_minor_version: Option<i32>,
    pub match_arch: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::supported_product::Entity",
        from = "Column::SupportedProductId",
        to = "super::supported_product::Column::Id",
        on_delete = "Cascade"
    )]
    SupportedProduct,
}

impl ActiveModelBehavior for ActiveModel {}
