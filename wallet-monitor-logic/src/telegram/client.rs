use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

pub const MAX_TEXT_LEN: usize = 4096;
pub const MAX_CAPTION_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("subscriber unreachable: {0}")]
    Unreachable(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotProfile {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// Thin Bot API client. Formatting defaults are injected at the
/// single transport chokepoint so call sites never set them.
pub struct TelegramClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl TelegramClient {
    pub fn new(base_url: Url, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        }
    }

    pub async fn get_me(&self) -> Result<BotProfile, TelegramError> {
        self.call("getMe", json!({})).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<i64, TelegramError> {
        let mut payload = json!({"chat_id": chat_id, "text": text});
        attach_markup(&mut payload, reply_markup);
        let message: Message = self.call("sendMessage", payload).await?;
        Ok(message.message_id)
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<bool, TelegramError> {
        let mut payload = json!({"chat_id": chat_id, "message_id": message_id, "text": text});
        attach_markup(&mut payload, reply_markup);
        match self.call::<Value>("editMessageText", payload).await {
            Ok(_) => Ok(true),
            // re-issuing an identical rendering is fine from the
            // user's perspective
            Err(TelegramError::Malformed(description))
                if description.contains("message is not modified") =>
            {
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        photo_url: &str,
        caption: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<i64, TelegramError> {
        let mut payload = json!({"chat_id": chat_id, "photo": photo_url, "caption": caption});
        attach_markup(&mut payload, reply_markup);
        let message: Message = self.call("sendPhoto", payload).await?;
        Ok(message.message_id)
    }

    pub async fn set_my_commands(&self, commands: &[(String, String)]) -> Result<bool, TelegramError> {
        let commands: Vec<Value> = commands
            .iter()
            .map(|(command, description)| json!({"command": command, "description": description}))
            .collect();
        self.call("setMyCommands", json!({"commands": commands}))
            .await
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        api_method: &str,
        mut payload: Value,
    ) -> Result<T, TelegramError> {
        inject_defaults(api_method, &mut payload);
        let url = format!("{}bot{}/{}", self.base_url, self.token, api_method);
        let response = self.http.post(url).json(&payload).send().await?;
        let envelope: ApiEnvelope<T> = response.json().await?;
        if envelope.ok {
            envelope.result.ok_or(TelegramError::Api {
                code: 0,
                description: "ok response without result".to_string(),
            })
        } else {
            Err(classify(
                envelope.error_code.unwrap_or_default(),
                envelope.description.unwrap_or_default(),
                envelope.parameters,
            ))
        }
    }
}

/// The transport-layer defaults every text-bearing call gets.
fn inject_defaults(api_method: &str, payload: &mut Value) {
    if !matches!(api_method, "sendMessage" | "editMessageText" | "sendPhoto") {
        return;
    }
    if let Some(object) = payload.as_object_mut() {
        object.entry("parse_mode").or_insert(json!("HTML"));
        object
            .entry("disable_web_page_preview")
            .or_insert(json!(true));
    }
}

fn attach_markup(payload: &mut Value, reply_markup: Option<&InlineKeyboardMarkup>) {
    if let (Some(markup), Some(object)) = (reply_markup, payload.as_object_mut()) {
        if let Ok(value) = serde_json::to_value(markup) {
            object.insert("reply_markup".to_string(), value);
        }
    }
}

const UNREACHABLE_MARKERS: [&str; 5] = [
    "bot was blocked",
    "user is deactivated",
    "chat not found",
    "bot was kicked",
    "user not found",
];

const MALFORMED_MARKERS: [&str; 4] = [
    "can't parse entities",
    "message to edit not found",
    "message is not modified",
    "message text is empty",
];

fn classify(code: i64, description: String, parameters: Option<ResponseParameters>) -> TelegramError {
    if code == 429 {
        let retry_after = parameters.and_then(|p| p.retry_after).unwrap_or(1);
        return TelegramError::RateLimited {
            retry_after: Duration::from_secs(retry_after),
        };
    }
    let lowered = description.to_lowercase();
    if UNREACHABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        TelegramError::Unreachable(description)
    } else if MALFORMED_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        TelegramError::Malformed(description)
    } else {
        TelegramError::Api { code, description }
    }
}
