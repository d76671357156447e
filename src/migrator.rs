use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_orders_table::Migration),
            Box::new(m20240301_000002_create_order_items_table::Migration),
            Box::new(m20240301_000003_create_delivery_options_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(Orders::Total)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentIntentId).string().not_null())
                        .col(ColumnDef::new(Orders::OrderType).string().not_null())
                        .col(ColumnDef::new(Orders::Metadata).json().null())
                        .col(
                            ColumnDef::new(Orders::IsAnonymousOrder)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            // The unique index on payment_intent_id is the last line of
            // defense against concurrent reconciliation of the same payment.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_payment_intent_id")
                        .table(Orders::Table)
                        .col(Orders::PaymentIntentId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Orders {
        Table,
        Id,
        UserId,
        Total,
        Status,
        PaymentMethod,
        PaymentIntentId,
        OrderType,
        Metadata,
        IsAnonymousOrder,
        CreatedAt,
    }
}

mod m20240301_000002_create_order_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::Price)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Quantity,
        Price,
    }
}

mod m20240301_000003_create_delivery_options_table {
    use rust_decimal::Decimal;
    use sea_orm_migration::prelude::*;
    use uuid::Uuid;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_delivery_options_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DeliveryOptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DeliveryOptions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DeliveryOptions::Name).string().not_null())
                        .col(
                            ColumnDef::new(DeliveryOptions::Description)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DeliveryOptions::DeliveryPrice)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DeliveryOptions::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .to_owned(),
                )
                .await?;

            // Seed the closed catalog. The default row guarantees a valid
            // selection exists as soon as options are loaded.
            let insert = Query::insert()
                .into_table(DeliveryOptions::Table)
                .columns([
                    DeliveryOptions::Id,
                    DeliveryOptions::Name,
                    DeliveryOptions::Description,
                    DeliveryOptions::DeliveryPrice,
                    DeliveryOptions::IsDefault,
                ])
                .values_panic([
                    Uuid::from_u128(0x7a1c4a57_6c2e_4f7f_9b61_0f6a3c1d0001).into(),
                    "Standard".into(),
                    "Delivered within 3-5 business days".into(),
                    Decimal::new(490, 2).into(),
                    true.into(),
                ])
                .values_panic([
                    Uuid::from_u128(0x7a1c4a57_6c2e_4f7f_9b61_0f6a3c1d0002).into(),
                    "Express".into(),
                    "Delivered next business day".into(),
                    Decimal::new(990, 2).into(),
                    false.into(),
                ])
                .values_panic([
                    Uuid::from_u128(0x7a1c4a57_6c2e_4f7f_9b61_0f6a3c1d0003).into(),
                    "Pickup".into(),
                    "Collect from the store counter".into(),
                    Decimal::ZERO.into(),
                    false.into(),
                ])
                .to_owned();

            manager.exec_stmt(insert).await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DeliveryOptions::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum DeliveryOptions {
        Table,
        Id,
        Name,
        Description,
        DeliveryPrice,
        IsDefault,
    }
}
