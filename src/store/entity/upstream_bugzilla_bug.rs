//! upstream advisory bugzilla ticket entity.

use sea_orm::entity::prelude::*;

use crate::models::BugzillaTicket;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "upstream_advisory_bugzilla_bugs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub upstream_advisory_id: i64,
    pub bug_id: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
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

impl From<Model> for BugzillaTicket {
    fn from(model: Model) -> Self {
        BugzillaTicket {
            bug_id: model.bug_id,
            description: model.description,
        }
    }
}
