//! create locally published advisory tables.

use sea_orm_migration::prelude::*;

use super::m20241001_000001_create_upstream_advisories::UpstreamAdvisories;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Advisories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Advisories::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Advisories::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Advisories::Synopsis).text().not_null())
                    .col(ColumnDef::new(Advisories::Description).text().not_null())
                    .col(ColumnDef::new(Advisories::Topic).text().not_null())
                    .col(ColumnDef::new(Advisories::Kind).string().not_null())
                    .col(ColumnDef::new(Advisories::Severity).string().not_null())
                    .col(ColumnDef::new(Advisories::UpstreamAdvisoryId).big_integer())
                    .col(
                        ColumnDef::new(Advisories::PublishedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Advisories::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_advisories_upstream_advisory")
                            .from(Advisories::Table, Advisories::UpstreamAdvisoryId)
                            .to(UpstreamAdvisories::Table, UpstreamAdvisories::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AdvisoryPackages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AdvisoryPackages::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AdvisoryPackages::AdvisoryId).big_integer().not_null())
                    .col(ColumnDef::new(AdvisoryPackages::Nevra).string().not_null())
                    .col(ColumnDef::new(AdvisoryPackages::Checksum).string().not_null())
                    .col(ColumnDef::new(AdvisoryPackages::ChecksumType).string().not_null())
                    .col(ColumnDef::new(AdvisoryPackages::ModuleContext).string())
                    .col(ColumnDef::new(AdvisoryPackages::ModuleName).string())
                    .col(ColumnDef::new(AdvisoryPackages::ModuleStream).string())
                    .col(ColumnDef::new(AdvisoryPackages::ModuleVersion).string())
                    .col(ColumnDef::new(AdvisoryPackages::RepoName).string().not_null())
                    .col(ColumnDef::new(AdvisoryPackages::PackageName).string().not_null())
                    .col(ColumnDef::new(AdvisoryPackages::MirrorId).big_integer().not_null())
                    .col(
                        ColumnDef::new(AdvisoryPackages::SupportedProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AdvisoryPackages::ProductName).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_advisory_packages_advisory")
                            .from(AdvisoryPackages::Table, AdvisoryPackages::AdvisoryId)
                            .to(Advisories::Table, Advisories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_advisory_packages_advisory_nevra_repo_mirror")
                    .table(AdvisoryPackages::Table)
                    .col(AdvisoryPackages::AdvisoryId)
                    .col(AdvisoryPackages::Nevra)
                    .col(AdvisoryPackages::RepoName)
                    .col(AdvisoryPackages::MirrorId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // repository emission loads packages by (mirror, repo)
        manager
            .create_index(
                Index::create()
                    .name("idx_advisory_packages_mirror_repo")
                    .table(AdvisoryPackages::Table)
                    .col(AdvisoryPackages::MirrorId)
                    .col(AdvisoryPackages::RepoName)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AdvisoryCves::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AdvisoryCves::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AdvisoryCves::AdvisoryId).big_integer().not_null())
                    .col(ColumnDef::new(AdvisoryCves::Cve).string().not_null())
                    .col(ColumnDef::new(AdvisoryCves::Cvss3ScoringVector).string())
                    .col(ColumnDef::new(AdvisoryCves::Cvss3BaseScore).string())
                    .col(ColumnDef::new(AdvisoryCves::Cwe).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_advisory_cves_advisory")
                            .from(AdvisoryCves::Table, AdvisoryCves::AdvisoryId)
                            .to(Advisories::Table, Advisories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_advisory_cves_advisory_cve")
                    .table(AdvisoryCves::Table)
                    .col(AdvisoryCves::AdvisoryId)
                    .col(AdvisoryCves::Cve)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AdvisoryFixes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AdvisoryFixes::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AdvisoryFixes::AdvisoryId).big_integer().not_null())
                    .col(ColumnDef::new(AdvisoryFixes::TicketId).string().not_null())
                    .col(ColumnDef::new(AdvisoryFixes::Source).string().not_null())
                    .col(
                        ColumnDef::new(AdvisoryFixes::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_advisory_fixes_advisory")
                            .from(AdvisoryFixes::Table, AdvisoryFixes::AdvisoryId)
                            .to(Advisories::Table, Advisories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_advisory_fixes_advisory_ticket")
                    .table(AdvisoryFixes::Table)
                    .col(AdvisoryFixes::AdvisoryId)
                    .col(AdvisoryFixes::TicketId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AdvisoryAffectedProducts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AdvisoryAffectedProducts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AdvisoryAffectedProducts::AdvisoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AdvisoryAffectedProducts::Variant).string().not_null())
                    .col(ColumnDef::new(AdvisoryAffectedProducts::Name).string().not_null())
                    .col(
                        ColumnDef::new(AdvisoryAffectedProducts::MajorVersion)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AdvisoryAffectedProducts::MinorVersion).integer())
                    .col(ColumnDef::new(AdvisoryAffectedProducts::Arch).string().not_null())
                    .col(
                        ColumnDef::new(AdvisoryAffectedProducts::SupportedProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AdvisoryAffectedProducts::Overridden)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_advisory_affected_products_advisory")
                            .from(
                                AdvisoryAffectedProducts::Table,
                                AdvisoryAffectedProducts::AdvisoryId,
                            )
                            .to(Advisories::Table, Advisories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        let db = manager.get_connection();
        db.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_advisory_affected_products_minor \
             ON advisory_affected_products \
             (advisory_id, variant, name, major_version, minor_version, arch) \
             WHERE minor_version IS NOT NULL",
        )
        .await?;
        db.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_advisory_affected_products_no_minor \
             ON advisory_affected_products \
             (advisory_id, variant, name, major_version, arch) \
             WHERE minor_version IS NULL",
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AdvisoryAffectedProducts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AdvisoryFixes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AdvisoryCves::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AdvisoryPackages::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Advisories::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Advisories {
    Table,
    Id,
    Name,
    Synopsis,
    Description,
    Topic,
    Kind,
    Severity,
    UpstreamAdvisoryId,
    PublishedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AdvisoryPackages {
    Table,
    Id,
    AdvisoryId,
    Nevra,
    Checksum,
    ChecksumType,
    ModuleContext,
    ModuleName,
    ModuleStream,
    ModuleVersion,
    RepoName,
    PackageName,
    MirrorId,
    SupportedProductId,
    ProductName,
}

#[derive(DeriveIden)]
enum AdvisoryCves {
    Table,
    Id,
    AdvisoryId,
    Cve,
    Cvss3ScoringVector,
    Cvss3BaseScore,
    Cwe,
}

#[derive(DeriveIden)]
enum AdvisoryFixes {
    Table,
    Id,
    AdvisoryId,
    TicketId,
    Source,
    Description,
}

#[derive(DeriveIden)]
enum AdvisoryAffectedProducts {
    Table,
    Id,
    AdvisoryId,
    Variant,
    Name,
    MajorVersion,
    MinorVersion,
    Arch,
    SupportedProductId,
    Overridden,
}
