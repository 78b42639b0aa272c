//! Per-bot delivery FIFOs. One worker per queue drains items strictly
//! in arrival order with a minimum spacing between operations; a
//! rate-limited item stays at the head until the platform accepts it.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, Instant},
};

use super::client::{
    InlineKeyboardMarkup, TelegramClient, TelegramError, MAX_CAPTION_LEN, MAX_TEXT_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Send,
    Edit,
}

#[derive(Debug, Clone)]
pub enum Outbound {
    Send {
        chat_id: i64,
        text: String,
        markup: Option<InlineKeyboardMarkup>,
    },
    Photo {
        chat_id: i64,
        photo_url: String,
        caption: String,
        markup: Option<InlineKeyboardMarkup>,
    },
    Edit {
        chat_id: i64,
        message_id: i64,
        text: String,
        markup: Option<InlineKeyboardMarkup>,
    },
}

impl Outbound {
    fn chat_id(&self) -> i64 {
        match self {
            Outbound::Send { chat_id, .. }
            | Outbound::Photo { chat_id, .. }
            | Outbound::Edit { chat_id, .. } => *chat_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    Message(i64),
    Edited(bool),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("message is too long: {0} characters")]
    MessageTooLong(usize),
    #[error("subscriber unreachable: {0}")]
    Unreachable(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("delivery failed: {0}")]
    Other(String),
    #[error("delivery queue closed")]
    QueueClosed,
}

/// Subscribers reported unreachable by the platform, keyed
/// (chat_id, bot_id); drained by the out-of-band removal task.
pub type RemovalSender = mpsc::UnboundedSender<(i64, String)>;

struct QueueItem {
    op: Outbound,
    done: oneshot::Sender<Result<Delivered, DeliveryError>>,
}

pub struct DeliveryQueue {
    queue: mpsc::UnboundedSender<QueueItem>,
}

impl DeliveryQueue {
    pub fn start(
        client: Arc<TelegramClient>,
        bot_id: String,
        class: OpClass,
        spacing: Duration,
        removals: RemovalSender,
    ) -> Self {
        let (queue, inbox) = mpsc::unbounded_channel();
        tokio::spawn(worker(client, bot_id, class, spacing, removals, inbox));
        Self { queue }
    }

    /// Enqueues the operation; the future resolves once the worker
    /// reaches a final outcome for it.
    pub async fn submit(&self, op: Outbound) -> Result<Delivered, DeliveryError> {
        preflight(&op)?;
        let (done, outcome) = oneshot::channel();
        self.queue
            .send(QueueItem { op, done })
            .map_err(|_| DeliveryError::QueueClosed)?;
        outcome.await.map_err(|_| DeliveryError::QueueClosed)?
    }
}

fn preflight(op: &Outbound) -> Result<(), DeliveryError> {
    let (len, max) = match op {
        Outbound::Send { text, .. } | Outbound::Edit { text, .. } => {
            (text.chars().count(), MAX_TEXT_LEN)
        }
        Outbound::Photo { caption, .. } => (caption.chars().count(), MAX_CAPTION_LEN),
    };
    if len > max {
        return Err(DeliveryError::MessageTooLong(len));
    }
    Ok(())
}

async fn worker(
    client: Arc<TelegramClient>,
    bot_id: String,
    class: OpClass,
    spacing: Duration,
    removals: RemovalSender,
    mut inbox: mpsc::UnboundedReceiver<QueueItem>,
) {
    let mut last_op: Option<Instant> = None;
    while let Some(item) = inbox.recv().await {
        let outcome = loop {
            if let Some(last) = last_op {
                let since = last.elapsed();
                if since < spacing {
                    sleep(spacing - since).await;
                }
            }
            let result = execute(&client, &item.op).await;
            last_op = Some(Instant::now());
            match result {
                Ok(delivered) => break Ok(delivered),
                Err(TelegramError::RateLimited { retry_after }) => {
                    tracing::warn!(
                        bot = %bot_id,
                        ?class,
                        ?retry_after,
                        "rate limited, retrying the head item"
                    );
                    sleep(retry_after).await;
                }
                Err(TelegramError::Unreachable(description)) => {
                    let chat_id = item.op.chat_id();
                    tracing::info!(
                        bot = %bot_id,
                        chat_id,
                        %description,
                        "subscriber unreachable, scheduling removal"
                    );
                    let _ = removals.send((chat_id, bot_id.clone()));
                    break Err(DeliveryError::Unreachable(description));
                }
                Err(TelegramError::Malformed(description)) => {
                    tracing::warn!(bot = %bot_id, %description, "message rejected by the platform");
                    break Err(DeliveryError::Malformed(description));
                }
                Err(err) => {
                    tracing::warn!(bot = %bot_id, error = %err, "delivery failed");
                    break Err(DeliveryError::Other(err.to_string()));
                }
            }
        };
        let _ = item.done.send(outcome);
    }
}

async fn execute(client: &TelegramClient, op: &Outbound) -> Result<Delivered, TelegramError> {
    match op {
        Outbound::Send {
            chat_id,
            text,
            markup,
        } => client
            .send_message(*chat_id, text, markup.as_ref())
            .await
            .map(Delivered::Message),
        Outbound::Photo {
            chat_id,
            photo_url,
            caption,
            markup,
        } => client
            .send_photo(*chat_id, photo_url, caption, markup.as_ref())
            .await
            .map(Delivered::Message),
        Outbound::Edit {
            chat_id,
            message_id,
            text,
            markup,
        } => client
            .edit_message_text(*chat_id, *message_id, text, markup.as_ref())
            .await
            .map(Delivered::Edited),
    }
}
