//! supported product entity.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

use crate::models::SupportedProduct;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "supported_products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    pub variant: String,
    pub vendor: String,
    /// advisory name prefix; products without one cannot publish.
    pub code: Option<String>,
    pub eol_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for SupportedProduct {
    fn from(model: Model) -> Self {
        SupportedProduct {
            id: model.id,
            name: model.name,
            variant: model.variant,
            vendor: model.vendor,
            code: model.code,
            eol_at: model.eol_at,
        }
    }
}
