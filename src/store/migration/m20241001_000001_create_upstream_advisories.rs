//! create upstream advisory tables and the ingestion cursor.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UpstreamAdvisories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UpstreamAdvisories::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UpstreamAdvisories::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(UpstreamAdvisories::IssuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UpstreamAdvisories::ModifiedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UpstreamAdvisories::Synopsis).text().not_null())
                    .col(ColumnDef::new(UpstreamAdvisories::Description).text().not_null())
                    .col(ColumnDef::new(UpstreamAdvisories::Topic).text().not_null())
                    .col(ColumnDef::new(UpstreamAdvisories::Kind).string().not_null())
                    .col(ColumnDef::new(UpstreamAdvisories::Severity).string().not_null())
                    .col(
                        ColumnDef::new(UpstreamAdvisories::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UpstreamAdvisories::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // the matching engine filters on issue time
        manager
            .create_index(
                Index::create()
                    .name("idx_upstream_advisories_issued_at")
                    .table(UpstreamAdvisories::Table)
                    .col(UpstreamAdvisories::IssuedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UpstreamAffectedProducts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UpstreamAffectedProducts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UpstreamAffectedProducts::UpstreamAdvisoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UpstreamAffectedProducts::Variant).string().not_null())
                    .col(ColumnDef::new(UpstreamAffectedProducts::Name).string().not_null())
                    .col(
                        ColumnDef::new(UpstreamAffectedProducts::MajorVersion)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UpstreamAffectedProducts::MinorVersion).integer())
                    .col(ColumnDef::new(UpstreamAffectedProducts::Arch).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_upstream_affected_products_advisory")
                            .from(
                                UpstreamAffectedProducts::Table,
                                UpstreamAffectedProducts::UpstreamAdvisoryId,
                            )
                            .to(UpstreamAdvisories::Table, UpstreamAdvisories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // NULL never equals NULL under a plain unique index, so the tuple is
        // split into two partial indexes on whether minor_version is present.
        let db = manager.get_connection();
        db.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_upstream_affected_products_minor \
             ON upstream_advisory_affected_products \
             (upstream_advisory_id, variant, name, major_version, minor_version, arch) \
             WHERE minor_version IS NOT NULL",
        )
        .await?;
        db.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_upstream_affected_products_no_minor \
             ON upstream_advisory_affected_products \
             (upstream_advisory_id, variant, name, major_version, arch) \
             WHERE minor_version IS NULL",
        )
        .await?;

        // match lookups go through (variant, major_version, arch)
        manager
            .create_index(
                Index::create()
                    .name("idx_upstream_affected_products_match")
                    .table(UpstreamAffectedProducts::Table)
                    .col(UpstreamAffectedProducts::Variant)
                    .col(UpstreamAffectedProducts::MajorVersion)
                    .col(UpstreamAffectedProducts::Arch)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UpstreamPackages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UpstreamPackages::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UpstreamPackages::UpstreamAdvisoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UpstreamPackages::Nevra).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_upstream_packages_advisory")
                            .from(UpstreamPackages::Table, UpstreamPackages::UpstreamAdvisoryId)
                            .to(UpstreamAdvisories::Table, UpstreamAdvisories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_upstream_packages_advisory_nevra")
                    .table(UpstreamPackages::Table)
                    .col(UpstreamPackages::UpstreamAdvisoryId)
                    .col(UpstreamPackages::Nevra)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UpstreamCves::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UpstreamCves::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UpstreamCves::UpstreamAdvisoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UpstreamCves::Cve).string().not_null())
                    .col(ColumnDef::new(UpstreamCves::Cvss3ScoringVector).string())
                    .col(ColumnDef::new(UpstreamCves::Cvss3BaseScore).string())
                    .col(ColumnDef::new(UpstreamCves::Cwe).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_upstream_cves_advisory")
                            .from(UpstreamCves::Table, UpstreamCves::UpstreamAdvisoryId)
                            .to(UpstreamAdvisories::Table, UpstreamAdvisories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_upstream_cves_advisory_cve")
                    .table(UpstreamCves::Table)
                    .col(UpstreamCves::UpstreamAdvisoryId)
                    .col(UpstreamCves::Cve)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UpstreamBugzillaBugs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UpstreamBugzillaBugs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UpstreamBugzillaBugs::UpstreamAdvisoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UpstreamBugzillaBugs::BugId).string().not_null())
                    .col(
                        ColumnDef::new(UpstreamBugzillaBugs::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_upstream_bugzilla_bugs_advisory")
                            .from(
                                UpstreamBugzillaBugs::Table,
                                UpstreamBugzillaBugs::UpstreamAdvisoryId,
                            )
                            .to(UpstreamAdvisories::Table, UpstreamAdvisories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_upstream_bugzilla_bugs_advisory_bug")
                    .table(UpstreamBugzillaBugs::Table)
                    .col(UpstreamBugzillaBugs::UpstreamAdvisoryId)
                    .col(UpstreamBugzillaBugs::BugId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(IndexState::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IndexState::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IndexState::LastIndexedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IndexState::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IndexState::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UpstreamBugzillaBugs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UpstreamCves::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UpstreamPackages::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UpstreamAffectedProducts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UpstreamAdvisories::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum UpstreamAdvisories {
    #[sea_orm(iden = "upstream_advisories")]
    Table,
    Id,
    Name,
    IssuedAt,
    ModifiedAt,
    Synopsis,
    Description,
    Topic,
    Kind,
    Severity,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum UpstreamAffectedProducts {
    #[sea_orm(iden = "upstream_advisory_affected_products")]
    Table,
    Id,
    UpstreamAdvisoryId,
    Variant,
    Name,
    MajorVersion,
    MinorVersion,
    Arch,
}

#[derive(DeriveIden)]
pub enum UpstreamPackages {
    #[sea_orm(iden = "upstream_advisory_packages")]
    Table,
    Id,
    UpstreamAdvisoryId,
    Nevra,
}

#[derive(DeriveIden)]
pub enum UpstreamCves {
    #[sea_orm(iden = "upstream_advisory_cves")]
    Table,
    Id,
    UpstreamAdvisoryId,
    Cve,
    Cvss3ScoringVector,
    Cvss3BaseScore,
    Cwe,
}

#[derive(DeriveIden)]
pub enum UpstreamBugzillaBugs {
    #[sea_orm(iden = "upstream_advisory_bugzilla_bugs")]
    Table,
    Id,
    UpstreamAdvisoryId,
    BugId,
    Description,
}

#[derive(DeriveIden)]
pub enum IndexState {
    #[sea_orm(iden = "index_state")]
    Table,
    Id,
    LastIndexedAt,
    UpdatedAt,
}
