use super::entity::workflow_run;
use super::{RunRepository, SqlStore};
use crate::error::{MirrorError, Result};
use crate::models::{RunStatus, WorkflowRun};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};

impl TryFrom<workflow_run::Model> for WorkflowRun {
    type Error = MirrorError;

    fn try_from(model: workflow_run::Model) -> Result<Self> {
        let status = model
            .status
            .parse()
            .map_err(|e: String| MirrorError::Database(sea_orm::DbErr::Custom(e)))?;
        Ok(WorkflowRun {
            id: model.id,
            workflow: model.workflow,
            status,
            request: model.request,
            output: model.output,
            error: model.error,
            attempts: model.attempts,
            started_at: model.started_at,
            finished_at: model.finished_at,
        })
    }
}

#[async_trait]
impl RunRepository for SqlStore {
    async fn start_run(&self, workflow: &str, request: &str) -> Result<i64> {
        let model = workflow_run::ActiveModel {
            id: NotSet,
            workflow: Set(workflow.to_string()),
            status: Set(RunStatus::Running.as_str().to_string()),
            request: Set(request.to_string()),
            output: Set(None),
            error: Set(None),
            attempts: Set(0),
            started_at: Set(Utc::now()),
            finished_at: Set(None),
        };
        Ok(model.insert(&self.conn).await?.id)
    }

    async fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        attempts: i32,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        workflow_run::Entity::update_many()
            .col_expr(workflow_run::Column::Status, Expr::value(status.as_str()))
            .col_expr(workflow_run::Column::Attempts, Expr::value(attempts))
            .col_expr(workflow_run::Column::Output, Expr::value(output))
            .col_expr(workflow_run::Column::Error, Expr::value(error))
            .col_expr(workflow_run::Column::FinishedAt, Expr::value(Utc::now()))
            .filter(workflow_run::Column::Id.eq(id))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    async fn list_runs_with_status(&self, status: RunStatus) -> Result<Vec<WorkflowRun>> {
        workflow_run::Entity::find()
            .filter(workflow_run::Column::Status.eq(status.as_str()))
            .order_by_asc(workflow_run::Column::Id)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }
}
