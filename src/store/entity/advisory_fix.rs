//! local advisory fix (ticket) entity.

use sea_orm::entity::prelude::*;

use crate::models::Fix;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "advisory_fixes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub advisory_id: i64,
    pub ticket_id: String,
    pub source: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
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

impl From<Model> for Fix {
    fn from(model: Model) -> Self {
        Fix {
            ticket_id: model.ticket_id,
            source: model.source,
            description: model.description,
        }
    }
}
