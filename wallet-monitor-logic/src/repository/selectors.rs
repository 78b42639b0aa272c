use sea_orm::{sea_query::OnConflict, DatabaseConnection, EntityTrait};
use wallet_monitor_entity::selectors::{ActiveModel, Column, Entity, Model};

pub async fn get(
    db: &DatabaseConnection,
    selector: &str,
) -> Result<Option<Model>, anyhow::Error> {
    Ok(Entity::find_by_id(selector.to_string()).one(db).await?)
}

pub async fn insert_if_absent(
    db: &DatabaseConnection,
    selector: &str,
    signature: &str,
) -> Result<(), anyhow::Error> {
    let model = Model {
        selector: selector.to_string(),
        signature: signature.to_string(),
    };
    let active: ActiveModel = model.into();
    Entity::insert(active)
        .on_conflict(
            OnConflict::column(Column::Selector)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}
