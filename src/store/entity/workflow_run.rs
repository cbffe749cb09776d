//! workflow run entity.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// persisted state of one workflow invocation.
///
/// `status` is one of `running`, `succeeded`, `failed`, `abandoned`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "workflow_runs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub workflow: String,
    pub status: String,
    /// json-serialized request
    #[sea_orm(column_type = "Text")]
    pub request: String,
    /// json-serialized report
    #[sea_orm(column_type = "Text", nullable)]
    pub output: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
    pub attempts: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
