use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use wallet_monitor_entity::watchlist::{Column, Entity, Model};

pub async fn load_active(db: &DatabaseConnection) -> Result<Vec<Model>, anyhow::Error> {
    Ok(Entity::find()
        .filter(Column::Blocked.eq(false))
        .all(db)
        .await?)
}

/// Marks every entry of the subscriber as blocked; used when the chat
/// platform reports the subscriber as unreachable.
pub async fn mark_blocked(
    db: &DatabaseConnection,
    chat_id: i64,
    bot_id: &str,
) -> Result<u64, anyhow::Error> {
    let result = Entity::update_many()
        .col_expr(Column::Blocked, Expr::value(true))
        .filter(Column::ChatId.eq(chat_id))
        .filter(Column::BotId.eq(bot_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}
