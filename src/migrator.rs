use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_stock_tables::Migration),
            Box::new(m20240101_000002_create_mutation_tables::Migration),
            Box::new(m20240101_000003_create_usage_tables::Migration),
            Box::new(m20240101_000004_create_rollback_tables::Migration),
        ]
    }
}

mod m20240101_000001_create_stock_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_stock_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // matches entities/stock_lot.rs
            manager
                .create_table(
                    Table::create()
                        .table(StockLots::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(StockLots::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(StockLots::TenantId).uuid().not_null())
                        .col(ColumnDef::new(StockLots::OwnerId).uuid().not_null())
                        .col(ColumnDef::new(StockLots::ItemId).uuid().not_null())
                        .col(ColumnDef::new(StockLots::ItemType).string().not_null())
                        .col(ColumnDef::new(StockLots::AcquiredOn).date().not_null())
                        .col(
                            ColumnDef::new(StockLots::QuantityIn)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockLots::QuantityUsed)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockLots::QuantityMutated)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(StockLots::SourceType).string().not_null())
                        .col(ColumnDef::new(StockLots::SourceId).uuid().null())
                        .col(
                            ColumnDef::new(StockLots::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLots::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // FIFO scans always filter by the full balance key
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_lots_key")
                        .table(StockLots::Table)
                        .col(StockLots::TenantId)
                        .col(StockLots::OwnerId)
                        .col(StockLots::ItemId)
                        .col(StockLots::ItemType)
                        .col(StockLots::AcquiredOn)
                        .to_owned(),
                )
                .await?;

            // matches entities/aggregate_supply.rs
            manager
                .create_table(
                    Table::create()
                        .table(AggregateSupply::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AggregateSupply::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AggregateSupply::TenantId).uuid().not_null())
                        .col(ColumnDef::new(AggregateSupply::OwnerId).uuid().not_null())
                        .col(ColumnDef::new(AggregateSupply::ItemId).uuid().not_null())
                        .col(ColumnDef::new(AggregateSupply::ItemType).string().not_null())
                        .col(
                            ColumnDef::new(AggregateSupply::Quantity)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(AggregateSupply::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(AggregateSupply::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AggregateSupply::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // At most one balance row per key
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_aggregate_supply_key")
                        .table(AggregateSupply::Table)
                        .col(AggregateSupply::TenantId)
                        .col(AggregateSupply::OwnerId)
                        .col(AggregateSupply::ItemId)
                        .col(AggregateSupply::ItemType)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AggregateSupply::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockLots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockLots {
        Table,
        Id,
        TenantId,
        OwnerId,
        ItemId,
        ItemType,
        AcquiredOn,
        QuantityIn,
        QuantityUsed,
        QuantityMutated,
        SourceType,
        SourceId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum AggregateSupply {
        Table,
        Id,
        TenantId,
        OwnerId,
        ItemId,
        ItemType,
        Quantity,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_mutation_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_mutation_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Mutations::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Mutations::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Mutations::TenantId).uuid().not_null())
                        .col(ColumnDef::new(Mutations::SourceOwnerId).uuid().not_null())
                        .col(
                            ColumnDef::new(Mutations::DestinationOwnerId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Mutations::MutatedOn).date().not_null())
                        .col(ColumnDef::new(Mutations::Notes).string().null())
                        .col(ColumnDef::new(Mutations::Status).string().not_null())
                        .col(ColumnDef::new(Mutations::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Mutations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Mutations::RolledBackAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Mutations::RolledBackBy).uuid().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_mutations_tenant_source")
                        .table(Mutations::Table)
                        .col(Mutations::TenantId)
                        .col(Mutations::SourceOwnerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(MutationDetails::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MutationDetails::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MutationDetails::MutationId).uuid().not_null())
                        .col(ColumnDef::new(MutationDetails::LineNo).integer().not_null())
                        .col(ColumnDef::new(MutationDetails::ItemId).uuid().not_null())
                        .col(ColumnDef::new(MutationDetails::ItemType).string().not_null())
                        .col(ColumnDef::new(MutationDetails::UnitId).uuid().not_null())
                        .col(
                            ColumnDef::new(MutationDetails::RequestedQuantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MutationDetails::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MutationDetails::DestinationLotId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MutationDetails::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_mutation_details_mutation")
                                .from(MutationDetails::Table, MutationDetails::MutationId)
                                .to(Mutations::Table, Mutations::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(MutationSources::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MutationSources::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MutationSources::MutationDetailId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MutationSources::LotId).uuid().not_null())
                        .col(ColumnDef::new(MutationSources::Seq).integer().not_null())
                        .col(
                            ColumnDef::new(MutationSources::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_mutation_sources_detail")
                                .from(MutationSources::Table, MutationSources::MutationDetailId)
                                .to(MutationDetails::Table, MutationDetails::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_mutation_sources_lot")
                        .table(MutationSources::Table)
                        .col(MutationSources::LotId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MutationSources::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(MutationDetails::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Mutations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Mutations {
        Table,
        Id,
        TenantId,
        SourceOwnerId,
        DestinationOwnerId,
        MutatedOn,
        Notes,
        Status,
        CreatedBy,
        CreatedAt,
        RolledBackAt,
        RolledBackBy,
    }

    #[derive(DeriveIden)]
    enum MutationDetails {
        Table,
        Id,
        MutationId,
        LineNo,
        ItemId,
        ItemType,
        UnitId,
        RequestedQuantity,
        Quantity,
        DestinationLotId,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum MutationSources {
        Table,
        Id,
        MutationDetailId,
        LotId,
        Seq,
        Quantity,
    }
}

mod m20240101_000003_create_usage_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_usage_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Usages::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Usages::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Usages::TenantId).uuid().not_null())
                        .col(ColumnDef::new(Usages::OwnerId).uuid().not_null())
                        .col(ColumnDef::new(Usages::UsedOn).date().not_null())
                        .col(ColumnDef::new(Usages::Status).string().not_null())
                        .col(ColumnDef::new(Usages::Notes).string().null())
                        .col(ColumnDef::new(Usages::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Usages::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Usages::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Usages::ConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Usages::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Usages::FailureReason).string().null())
                        .col(
                            ColumnDef::new(Usages::FailedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UsageItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(UsageItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(UsageItems::UsageId).uuid().not_null())
                        .col(ColumnDef::new(UsageItems::LineNo).integer().not_null())
                        .col(ColumnDef::new(UsageItems::ItemId).uuid().not_null())
                        .col(ColumnDef::new(UsageItems::ItemType).string().not_null())
                        .col(ColumnDef::new(UsageItems::UnitId).uuid().not_null())
                        .col(
                            ColumnDef::new(UsageItems::RequestedQuantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UsageItems::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_usage_items_usage")
                                .from(UsageItems::Table, UsageItems::UsageId)
                                .to(Usages::Table, Usages::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UsageDetails::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UsageDetails::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UsageDetails::UsageId).uuid().not_null())
                        .col(ColumnDef::new(UsageDetails::UsageItemId).uuid().not_null())
                        .col(ColumnDef::new(UsageDetails::LotId).uuid().not_null())
                        .col(ColumnDef::new(UsageDetails::Seq).integer().not_null())
                        .col(
                            ColumnDef::new(UsageDetails::QuantityTaken)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UsageDetails::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UsageDetails::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_usage_details_usage")
                                .from(UsageDetails::Table, UsageDetails::UsageId)
                                .to(Usages::Table, Usages::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_usage_details_lot")
                        .table(UsageDetails::Table)
                        .col(UsageDetails::LotId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UsageDetails::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(UsageItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Usages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Usages {
        Table,
        Id,
        TenantId,
        OwnerId,
        UsedOn,
        Status,
        Notes,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
        ConfirmedAt,
        CancelledAt,
        FailureReason,
        FailedAt,
    }

    #[derive(DeriveIden)]
    enum UsageItems {
        Table,
        Id,
        UsageId,
        LineNo,
        ItemId,
        ItemType,
        UnitId,
        RequestedQuantity,
        Quantity,
    }

    #[derive(DeriveIden)]
    enum UsageDetails {
        Table,
        Id,
        UsageId,
        UsageItemId,
        LotId,
        Seq,
        QuantityTaken,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_rollback_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_rollback_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Rollbacks::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Rollbacks::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Rollbacks::TenantId).uuid().not_null())
                        .col(ColumnDef::new(Rollbacks::RollbackType).string().not_null())
                        .col(ColumnDef::new(Rollbacks::TargetId).uuid().not_null())
                        .col(
                            ColumnDef::new(Rollbacks::RestoredQuantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Rollbacks::Snapshot).json().not_null())
                        .col(ColumnDef::new(Rollbacks::Reason).string().null())
                        .col(ColumnDef::new(Rollbacks::PerformedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Rollbacks::PerformedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_rollbacks_target")
                        .table(Rollbacks::Table)
                        .col(Rollbacks::TenantId)
                        .col(Rollbacks::TargetId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RollbackDetails::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RollbackDetails::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RollbackDetails::RollbackId).uuid().not_null())
                        .col(ColumnDef::new(RollbackDetails::LotId).uuid().not_null())
                        .col(
                            ColumnDef::new(RollbackDetails::BookingKind)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RollbackDetails::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RollbackDetails::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_rollback_details_rollback")
                                .from(RollbackDetails::Table, RollbackDetails::RollbackId)
                                .to(Rollbacks::Table, Rollbacks::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RollbackLogs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RollbackLogs::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RollbackLogs::RollbackId).uuid().not_null())
                        .col(ColumnDef::new(RollbackLogs::Entity).string().not_null())
                        .col(ColumnDef::new(RollbackLogs::EntityId).uuid().not_null())
                        .col(ColumnDef::new(RollbackLogs::Field).string().not_null())
                        .col(ColumnDef::new(RollbackLogs::BeforeValue).string().null())
                        .col(ColumnDef::new(RollbackLogs::AfterValue).string().null())
                        .col(
                            ColumnDef::new(RollbackLogs::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_rollback_logs_rollback")
                                .from(RollbackLogs::Table, RollbackLogs::RollbackId)
                                .to(Rollbacks::Table, Rollbacks::Id),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RollbackLogs::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RollbackDetails::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Rollbacks::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Rollbacks {
        Table,
        Id,
        TenantId,
        RollbackType,
        TargetId,
        RestoredQuantity,
        Snapshot,
        Reason,
        PerformedBy,
        PerformedAt,
    }

    #[derive(DeriveIden)]
    enum RollbackDetails {
        Table,
        Id,
        RollbackId,
        LotId,
        BookingKind,
        Quantity,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum RollbackLogs {
        Table,
        Id,
        RollbackId,
        Entity,
        EntityId,
        Field,
        BeforeValue,
        AfterValue,
        CreatedAt,
    }
}
