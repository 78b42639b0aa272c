use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE TABLE "tokens" (
                "address" text PRIMARY KEY,
                "symbol" text NOT NULL,
                "decimals" integer NOT NULL
            );

            CREATE TABLE "ens" (
                "address" text PRIMARY KEY,
                "name" text NOT NULL
            );

            CREATE TABLE "selectors" (
                "selector" text PRIMARY KEY,
                "signature" text NOT NULL
            );
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP TABLE "tokens";
            DROP TABLE "ens";
            DROP TABLE "selectors";
        "#;
        crate::from_sql(manager, sql).await
    }
}
