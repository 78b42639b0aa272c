use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE TABLE "access" (
                "chat_id" bigint NOT NULL,
                "bot_id" text NOT NULL,
                "username" text,
                "alltx" boolean NOT NULL DEFAULT false,
                "swap" boolean NOT NULL DEFAULT false,
                "deploy" boolean NOT NULL DEFAULT false,
                PRIMARY KEY ("chat_id", "bot_id")
            );

            CREATE TABLE "watchlist" (
                "address" text NOT NULL,
                "chat_id" bigint NOT NULL,
                "bot_id" text NOT NULL,
                "username" text,
                "name" text NOT NULL,
                "time" bigint NOT NULL,
                "blocked" boolean NOT NULL DEFAULT false,
                PRIMARY KEY ("address", "chat_id", "bot_id")
            );

            CREATE INDEX "watchlist_address_idx" ON "watchlist" ("address");

            CREATE TABLE "cex" (
                "address" text PRIMARY KEY,
                "name" text NOT NULL
            );
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP TABLE "access";
            DROP TABLE "watchlist";
            DROP TABLE "cex";
        "#;
        crate::from_sql(manager, sql).await
    }
}
