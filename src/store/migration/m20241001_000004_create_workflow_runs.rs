//! create workflow run bookkeeping.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowRuns::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkflowRuns::Workflow).string().not_null())
                    .col(ColumnDef::new(WorkflowRuns::Status).string().not_null())
                    .col(ColumnDef::new(WorkflowRuns::Request).text().not_null())
                    .col(ColumnDef::new(WorkflowRuns::Output).text())
                    .col(ColumnDef::new(WorkflowRuns::Error).text())
                    .col(
                        ColumnDef::new(WorkflowRuns::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkflowRuns::FinishedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_runs_status")
                    .table(WorkflowRuns::Table)
                    .col(WorkflowRuns::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkflowRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkflowRuns {
    Table,
    Id,
    Workflow,
    Status,
    Request,
    Output,
    Error,
    Attempts,
    StartedAt,
    FinishedAt,
}
