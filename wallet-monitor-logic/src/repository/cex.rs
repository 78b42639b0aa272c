use sea_orm::{DatabaseConnection, EntityTrait};
use wallet_monitor_entity::cex::{Entity, Model};

pub async fn load_all(db: &DatabaseConnection) -> Result<Vec<Model>, anyhow::Error> {
    Ok(Entity::find().all(db).await?)
}
