use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use wallet_monitor_entity::access::{Column, Entity, Model};

/// Subscribers that opted into all-transaction notifications.
pub async fn load_alltx(db: &DatabaseConnection) -> Result<Vec<Model>, anyhow::Error> {
    Ok(Entity::find()
        .filter(Column::Alltx.eq(true))
        .all(db)
        .await?)
}
