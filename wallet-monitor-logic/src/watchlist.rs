//! In-memory watchlist snapshot, refreshed periodically from the
//! shared store and swapped wholesale so readers always see a
//! consistent view.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use alloy::primitives::Address;
use parking_lot::RwLock;
use sea_orm::DatabaseConnection;
use tokio::{sync::watch, time::sleep};

use crate::repository;

/// Composite delivery target, `"<chat_id>@<bot_id>"`.
pub type SubscriberId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherPrefs {
    pub display_name: String,
    pub want_incoming: bool,
    pub want_outgoing: bool,
}

impl WatcherPrefs {
    /// Direction flags replicate the historical row defaults:
    /// incoming off, outgoing on.
    // TODO: revisit once product decides whether incoming
    // notifications were really meant to stay silenced for everyone
    fn from_row(display_name: String) -> Self {
        Self {
            display_name,
            want_incoming: false,
            want_outgoing: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct WatchlistSnapshot {
    entries: HashMap<Address, HashMap<SubscriberId, WatcherPrefs>>,
}

impl WatchlistSnapshot {
    pub fn insert(&mut self, address: Address, subscriber: SubscriberId, prefs: WatcherPrefs) {
        self.entries
            .entry(address)
            .or_default()
            .insert(subscriber, prefs);
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    pub fn watchers(&self, address: &Address) -> Option<&HashMap<SubscriberId, WatcherPrefs>> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct WatchlistCache {
    snapshot: RwLock<Arc<WatchlistSnapshot>>,
}

impl WatchlistCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<WatchlistSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn replace(&self, next: WatchlistSnapshot) {
        *self.snapshot.write() = Arc::new(next);
    }

    /// Rebuilds the snapshot from the store. A subscriber makes it in
    /// when its bot is open-access or an `alltx` access grant exists.
    pub async fn refresh(
        &self,
        db: &DatabaseConnection,
        open_access_bots: &HashSet<String>,
    ) -> anyhow::Result<usize> {
        let rows = repository::watchlist::load_active(db).await?;
        let grants: HashSet<(i64, String)> = repository::access::load_alltx(db)
            .await?
            .into_iter()
            .map(|row| (row.chat_id, row.bot_id))
            .collect();

        let mut next = WatchlistSnapshot::default();
        for row in rows {
            let Ok(address) = row.address.parse::<Address>() else {
                tracing::warn!(address = %row.address, "watchlist row with unparsable address, skipping");
                continue;
            };
            let eligible = open_access_bots.contains(&row.bot_id)
                || grants.contains(&(row.chat_id, row.bot_id.clone()));
            if !eligible {
                continue;
            }
            let subscriber = format!("{}@{}", row.chat_id, row.bot_id);
            next.insert(address, subscriber, WatcherPrefs::from_row(row.name));
        }
        let count = next.len();
        self.replace(next);
        Ok(count)
    }
}

pub async fn run_refresher(
    cache: Arc<WatchlistCache>,
    db: Arc<DatabaseConnection>,
    open_access_bots: HashSet<String>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(err) = cache.refresh(&db, &open_access_bots).await {
            tracing::warn!(error = ?err, "watchlist refresh failed, keeping previous snapshot");
        }
        tokio::select! {
            _ = sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use sea_orm::{Database, EntityTrait};
    use wallet_monitor_entity::{access, watchlist};

    const WATCHED: Address = address!("00000000219ab540356cBB839Cbe05303d7705Fa");

    async fn shared_db() -> DatabaseConnection {
        use migration::MigratorTrait;
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    fn watch_row(chat_id: i64, bot_id: &str, blocked: bool) -> watchlist::Model {
        watchlist::Model {
            address: format!("{WATCHED:#x}"),
            chat_id,
            bot_id: bot_id.to_string(),
            username: None,
            name: "whale".to_string(),
            time: 1,
            blocked,
        }
    }

    #[tokio::test]
    async fn refresh_applies_access_and_blocked_gates() {
        let db = shared_db().await;
        let rows = vec![
            watch_row(1, "open_bot", false),
            watch_row(2, "closed_bot", false),
            watch_row(3, "closed_bot", false),
            watch_row(4, "open_bot", true),
        ];
        watchlist::Entity::insert_many(
            rows.into_iter().map(watchlist::ActiveModel::from),
        )
        .exec(&db)
        .await
        .unwrap();
        // chat 2 holds an alltx grant, chat 3 does not
        access::Entity::insert(access::ActiveModel::from(access::Model {
            chat_id: 2,
            bot_id: "closed_bot".to_string(),
            username: None,
            alltx: true,
            swap: false,
            deploy: false,
        }))
        .exec(&db)
        .await
        .unwrap();

        let cache = WatchlistCache::new();
        let open_access = HashSet::from(["open_bot".to_string()]);
        cache.refresh(&db, &open_access).await.unwrap();

        let snapshot = cache.snapshot();
        let watchers = snapshot.watchers(&WATCHED).unwrap();
        assert_eq!(watchers.len(), 2);
        assert!(watchers.contains_key("1@open_bot"));
        assert!(watchers.contains_key("2@closed_bot"));
        let prefs = &watchers["1@open_bot"];
        assert_eq!(prefs.display_name, "whale");
        assert!(!prefs.want_incoming);
        assert!(prefs.want_outgoing);
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_a_swap() {
        let cache = WatchlistCache::new();
        let mut first = WatchlistSnapshot::default();
        first.insert(
            WATCHED,
            "1@bot".to_string(),
            WatcherPrefs::from_row("old".to_string()),
        );
        cache.replace(first);

        let held = cache.snapshot();
        cache.replace(WatchlistSnapshot::default());

        assert!(held.contains(&WATCHED));
        assert!(cache.snapshot().is_empty());
    }
}
