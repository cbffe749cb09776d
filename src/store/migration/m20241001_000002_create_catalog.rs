//! create supported products, mirrors, repositories, blocks and overrides.

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
                    .table(SupportedProducts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SupportedProducts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SupportedProducts::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(SupportedProducts::Variant).string().not_null())
                    .col(ColumnDef::new(SupportedProducts::Vendor).string().not_null())
                    .col(ColumnDef::new(SupportedProducts::Code).string())
                    .col(ColumnDef::new(SupportedProducts::EolAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(SupportedProducts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Mirrors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Mirrors::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Mirrors::SupportedProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Mirrors::Name).string().not_null())
                    .col(ColumnDef::new(Mirrors::MatchVariant).string().not_null())
                    .col(ColumnDef::new(Mirrors::MatchMajorVersion).integer().not_null())
                    .col(ColumnDef::new(Mirrors::MatchMinorVersion).integer())
                    .col(ColumnDef::new(Mirrors::MatchArch).string().not_null())
                    .col(
                        ColumnDef::new(Mirrors::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Mirrors::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mirrors_supported_product")
                            .from(Mirrors::Table, Mirrors::SupportedProductId)
                            .to(SupportedProducts::Table, SupportedProducts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MirrorRepositories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MirrorRepositories::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MirrorRepositories::MirrorId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MirrorRepositories::Production)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(MirrorRepositories::Arch).string().not_null())
                    .col(ColumnDef::new(MirrorRepositories::Url).string().not_null())
                    .col(ColumnDef::new(MirrorRepositories::DebugUrl).string())
                    .col(ColumnDef::new(MirrorRepositories::SourceUrl).string())
                    .col(ColumnDef::new(MirrorRepositories::RepoName).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mirror_repositories_mirror")
                            .from(MirrorRepositories::Table, MirrorRepositories::MirrorId)
                            .to(Mirrors::Table, Mirrors::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_mirror_repositories_mirror_repo_arch")
                    .table(MirrorRepositories::Table)
                    .col(MirrorRepositories::MirrorId)
                    .col(MirrorRepositories::RepoName)
                    .col(MirrorRepositories::Arch)
                    .unique()
                    .to_owned(),
            )
            .await?;

        create_mirror_link_table(manager, MirrorBlocks::Table, "mirror_blocks").await?;
        create_mirror_link_table(manager, MirrorOverrides::Table, "mirror_overrides").await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MirrorOverrides::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MirrorBlocks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MirrorRepositories::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Mirrors::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SupportedProducts::Table).to_owned())
            .await
    }
}

/// blocks and overrides share one shape: (mirror, upstream advisory) unique.
async fn create_mirror_link_table<T>(
    manager: &SchemaManager<'_>,
    table: T,
    name: &str,
) -> Result<(), DbErr>
where
    T: IntoIden + Copy + 'static,
{
    manager
        .create_table(
            Table::create()
                .table(table)
                .if_not_exists()
                .col(
                    ColumnDef::new(MirrorLink::Id)
                        .big_integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(ColumnDef::new(MirrorLink::MirrorId).big_integer().not_null())
                .col(
                    ColumnDef::new(MirrorLink::UpstreamAdvisoryId)
                        .big_integer()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(MirrorLink::CreatedAt)
                        .timestamp_with_time_zone()
                        .not_null(),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name(format!("fk_{name}_mirror"))
                        .from(table, MirrorLink::MirrorId)
                        .to(Mirrors::Table, Mirrors::Id)
                        .on_delete(ForeignKeyAction::Cascade),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name(format!("fk_{name}_upstream_advisory"))
                        .from(table, MirrorLink::UpstreamAdvisoryId)
                        .to(UpstreamAdvisories::Table, UpstreamAdvisories::Id)
                        .on_delete(ForeignKeyAction::Cascade),
                )
                .to_owned(),
        )
        .await?;

    manager
        .create_index(
            Index::create()
                .name(format!("uq_{name}_mirror_advisory"))
                .table(table)
                .col(MirrorLink::MirrorId)
                .col(MirrorLink::UpstreamAdvisoryId)
                .unique()
                .to_owned(),
        )
        .await
}

#[derive(DeriveIden)]
pub enum SupportedProducts {
    Table,
    Id,
    Name,
    Variant,
    Vendor,
    Code,
    EolAt,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum Mirrors {
    Table,
    Id,
    SupportedProductId,
    Name,
    MatchVariant,
    MatchMajorVersion,
    MatchMinorVersion,
    MatchArch,
    Active,
    CreatedAt,
}

#[derive(DeriveIden)]
enum MirrorRepositories {
    Table,
    Id,
    MirrorId,
    Production,
    Arch,
    Url,
    DebugUrl,
    SourceUrl,
    RepoName,
}

#[derive(DeriveIden, Clone, Copy)]
enum MirrorBlocks {
    Table,
}

#[derive(DeriveIden, Clone, Copy)]
enum MirrorOverrides {
    Table,
}

#[derive(DeriveIden)]
enum MirrorLink {
    Id,
    MirrorId,
    UpstreamAdvisoryId,
    CreatedAt,
}
