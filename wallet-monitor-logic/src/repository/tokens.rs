use sea_orm::{sea_query::OnConflict, DatabaseConnection, EntityTrait};
use wallet_monitor_entity::tokens::{ActiveModel, Column, Entity, Model};

pub async fn load_all(db: &DatabaseConnection) -> Result<Vec<Model>, anyhow::Error> {
    Ok(Entity::find().all(db).await?)
}

/// Token records are write-once; a concurrent insert of the same
/// address is silently ignored.
pub async fn insert_if_absent(
    db: &DatabaseConnection,
    address: &str,
    symbol: &str,
    decimals: u8,
) -> Result<(), anyhow::Error> {
    let model = Model {
        address: address.to_string(),
        symbol: symbol.to_string(),
        decimals: decimals as i32,
    };
    let active: ActiveModel = model.into();
    Entity::insert(active)
        .on_conflict(
            OnConflict::column(Column::Address)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}
