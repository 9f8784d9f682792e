use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Schools::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Schools::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Schools::SchoolName).string().not_null())
                    .col(ColumnDef::new(Schools::DisplayName).string().not_null())
                    .col(ColumnDef::new(Schools::InstituteType).string().not_null())
                    .col(ColumnDef::new(Schools::SchoolAddress).string().not_null())
                    .col(ColumnDef::new(Schools::PrincipalName).string().not_null())
                    .col(ColumnDef::new(Schools::PrincipalEmail).string().not_null())
                    .col(ColumnDef::new(Schools::PrincipalPhone).string().not_null())
                    .col(
                        ColumnDef::new(Schools::SubscriptionStatus)
                            .string()
                            .not_null()
                            .default("TRIAL"),
                    )
                    .col(
                        ColumnDef::new(Schools::TrialEndsAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Schools::CreatedBy).string().not_null())
                    .col(
                        ColumnDef::new(Schools::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Schools::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Schools {
    Table,
    Id,
    SchoolName,
    DisplayName,
    InstituteType,
    SchoolAddress,
    PrincipalName,
    PrincipalEmail,
    PrincipalPhone,
    SubscriptionStatus,
    TrialEndsAt,
    CreatedBy,
    CreatedAt,
}
