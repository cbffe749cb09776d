//! local advisory package entity.

use sea_orm::entity::prelude::*;

use crate::models::LocalPackage;

/// unique on (advisory_id, nevra, repo_name, mirror_id).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "advisory_packages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub advisory_id: i64,
    pub nevra: String,
    pub checksum: String,
    pub checksum_type: String,
    pub module_context: Option<String>,
    pub module_name: Option<String>,
    pub module_stream: Option<String>,
    pub module_version: Option<String>,
    pub repo_name: String,
    pub package_name: String,
    pub mirror_id: i64,
    pub supported_product_id: i64,
    pub product_name: String,
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

impl From<Model> for LocalPackage {
    fn from(model: Model) -> Self {
        LocalPackage {
            nevra: model.nevra,
            checksum: model.checksum,
            checksum_type: model.checksum_type,
            module_context: model.module_context,
            module_name: model.module_name,
            module_stream: model.module_stream,
            module_version: model.module_version,
            repo_name: model.repo_name,
            package_name: model.package_name,
            mirror_id: model.mirror_id,
            supported_product_id: model.supported_product_id,
            product_name: model.product_name,
        }
    }
}
