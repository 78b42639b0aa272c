pub mod client;
pub mod queue;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;

use crate::{repository, settings::DeliverySettings};

use client::{InlineKeyboardMarkup, TelegramClient};
use queue::{Delivered, DeliveryError, DeliveryQueue, OpClass, Outbound, RemovalSender};

pub struct BotHandle {
    pub client: Arc<TelegramClient>,
    pub open_access: bool,
    send_queue: DeliveryQueue,
    edit_queue: DeliveryQueue,
}

/// Routes deliveries to per-bot send/edit queues by subscriber id.
pub struct DeliveryService {
    bots: HashMap<String, BotHandle>,
}

impl DeliveryService {
    pub fn new(settings: &DeliverySettings, removals: RemovalSender) -> Self {
        let mut bots = HashMap::new();
        for bot in &settings.bots {
            let client = Arc::new(TelegramClient::new(
                settings.api_base_url.clone(),
                bot.token.clone(),
            ));
            let handle = BotHandle {
                client: client.clone(),
                open_access: bot.open_access,
                send_queue: DeliveryQueue::start(
                    client.clone(),
                    bot.id.clone(),
                    OpClass::Send,
                    settings.op_spacing,
                    removals.clone(),
                ),
                edit_queue: DeliveryQueue::start(
                    client,
                    bot.id.clone(),
                    OpClass::Edit,
                    settings.op_spacing,
                    removals.clone(),
                ),
            };
            bots.insert(bot.id.clone(), handle);
        }
        Self { bots }
    }

    pub fn is_active(&self, bot_id: &str) -> bool {
        self.bots.contains_key(bot_id)
    }

    pub fn open_access_bots(&self) -> HashSet<String> {
        self.bots
            .iter()
            .filter(|(_, handle)| handle.open_access)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn bots(&self) -> impl Iterator<Item = (&String, &BotHandle)> {
        self.bots.iter()
    }

    pub async fn send(
        &self,
        subscriber: &str,
        text: String,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<i64, DeliveryError> {
        let (chat_id, handle) = self.route(subscriber)?;
        match handle
            .send_queue
            .submit(Outbound::Send {
                chat_id,
                text,
                markup,
            })
            .await?
        {
            Delivered::Message(message_id) => Ok(message_id),
            Delivered::Edited(_) => Err(DeliveryError::Other(
                "send resolved to an edit outcome".to_string(),
            )),
        }
    }

    pub async fn edit(
        &self,
        subscriber: &str,
        message_id: i64,
        text: String,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<bool, DeliveryError> {
        let (chat_id, handle) = self.route(subscriber)?;
        match handle
            .edit_queue
            .submit(Outbound::Edit {
                chat_id,
                message_id,
                text,
                markup,
            })
            .await?
        {
            Delivered::Edited(done) => Ok(done),
            Delivered::Message(_) => Err(DeliveryError::Other(
                "edit resolved to a send outcome".to_string(),
            )),
        }
    }

    fn route(&self, subscriber: &str) -> Result<(i64, &BotHandle), DeliveryError> {
        let (chat_id, bot_id) = parse_subscriber(subscriber)
            .ok_or_else(|| DeliveryError::Other(format!("malformed subscriber id: {subscriber}")))?;
        let handle = self
            .bots
            .get(bot_id)
            .ok_or_else(|| DeliveryError::Other(format!("unknown bot: {bot_id}")))?;
        Ok((chat_id, handle))
    }
}

/// Splits `"<chat_id>@<bot_id>"`; chat ids may be negative for groups.
pub fn parse_subscriber(subscriber: &str) -> Option<(i64, &str)> {
    let (chat, bot) = subscriber.split_once('@')?;
    Some((chat.parse().ok()?, bot))
}

/// Marks unreachable subscribers as blocked, outside the delivery
/// path.
pub async fn run_removal_task(
    db: Arc<DatabaseConnection>,
    mut removals: mpsc::UnboundedReceiver<(i64, String)>,
) {
    while let Some((chat_id, bot_id)) = removals.recv().await {
        match repository::watchlist::mark_blocked(&db, chat_id, &bot_id).await {
            Ok(rows) => {
                tracing::info!(chat_id, bot = %bot_id, rows, "marked unreachable subscriber as blocked")
            }
            Err(err) => {
                tracing::warn!(chat_id, bot = %bot_id, error = ?err, "failed to mark subscriber as blocked")
            }
        }
    }
}
