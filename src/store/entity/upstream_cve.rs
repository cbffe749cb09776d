//! upstream advisory cve entity.

use sea_orm::entity::prelude::*;

use crate::models::Cve;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "upstream_advisory_cves")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub upstream_advisory_id: i64,
    pub cve: String,
    pub cvss3_scoring_vector: Option<String>,
    pub cvss3_base_score: Option<String>,
    pub cwe: Option<String>,
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

impl From<Model> for Cve {
    fn from(model: Model) -> Self {
        Cve {
            cve: model.cve,
            cvss3_scoring_vector: model.cvss3_scoring_vector,
            cvss3_base_score: model.cvss3_base_score,
            cwe: model.cwe,
        }
    }
}
