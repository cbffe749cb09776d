//! local advisory affected product entity.

use sea_orm::entity::prelude::*;

use crate::models::LocalAffectedProduct;

/// same partial-index uniqueness split as the upstream table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "advisory_affected_products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub advisory_id: i64,
    pub variant: String,
    pub name: String,
    pub major_version: i32,
    pub minor_version: Option<i32>,
    pub arch: String,
    pub supported_product_id: i64,
    pub overridden: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::advisory::Entity",
        from = "Column::AdvisoryId",
        to = "super::advisory::Column::Id",
        on_delete = "Cascade"
    )]
    Advisory,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for LocalAffectedProduct {
    fn from(model: Model) -> Self {
        LocalAffectedProduct {
            variant: model.variant,
            name: model.name,
            major_version: model.major_version,
            minor_version: model.minor_version,
            arch: model.arch,
            supported_product_id: model.supported_product_id,
            overridden: model.overridden,
        }
    }
}
