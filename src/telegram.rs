//! Telegram Bot API client used to deliver confirmation messages.
//!
//! The bot is an explicit service object: construct it, `start()` it once the
//! token has been verified, and `stop()` it on shutdown. Handlers receive it
//! through application state instead of reaching for a global.

use crate::config::TelegramConfig;
use crate::flow::document::Button;
use crate::flow::resolver::OutboundMessage;
use crate::logging::mask_secret;
use crate::services::notification::{NotificationError, Notifier};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Telegram rejects media captions longer than this.
const CAPTION_LIMIT: usize = 1024;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BotIdentity {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

pub struct TelegramBot {
    http: Client,
    api_url: String,
    token: String,
    running: AtomicBool,
    identity: RwLock<Option<BotIdentity>>,
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig) -> Result<Self, NotificationError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotificationError::Delivery {
                message: format!("failed to build Telegram client: {}", e),
                retryable: false,
            })?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            running: AtomicBool::new(false),
            identity: RwLock::new(None),
        })
    }

    /// Verify the token with `getMe` and begin accepting messages.
    pub async fn start(&self) -> Result<BotIdentity, NotificationError> {
        let result = self.call("getMe", &json!({})).await?;
        let identity: BotIdentity =
            serde_json::from_value(result).map_err(|e| NotificationError::Delivery {
                message: format!("unexpected getMe reply: {}", e),
                retryable: false,
            })?;

        *self.identity.write().await = Some(identity.clone());
        self.running.store(true, Ordering::SeqCst);
        info!(
            bot_id = identity.id,
            username = identity.username.as_deref().unwrap_or_default(),
            "Telegram bot started"
        );
        Ok(identity)
    }

    pub async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Telegram bot stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn identity(&self) -> Option<BotIdentity> {
        self.identity.read().await.clone()
    }

    /// Invoke a Bot API method and return its `result`.
    pub async fn call(&self, method: &str, payload: &JsonValue) -> Result<JsonValue, NotificationError> {
        let url = format!("{}/bot{}/{}", self.api_url, self.token, method);
        debug!(method, token = %mask_secret(&self.token), "calling Telegram API");

        let response = self.http.post(&url).json(payload).send().await.map_err(|e| {
            NotificationError::Delivery {
                // reqwest errors embed the URL, which carries the token
                message: format!("{} request failed: {}", method, e.without_url()),
                retryable: true,
            }
        })?;

        let status = response.status();
        let reply: ApiReply = response.json().await.map_err(|e| NotificationError::Delivery {
            message: format!("{} returned HTTP {} with unreadable body: {}", method, status, e.without_url()),
            retryable: status.is_server_error(),
        })?;

        if !reply.ok {
            let code = reply.error_code.unwrap_or(status.as_u16());
            return Err(NotificationError::Delivery {
                message: format!(
                    "{} failed ({}): {}",
                    method,
                    code,
                    reply.description.unwrap_or_else(|| "no description".to_string())
                ),
                retryable: code == 429 || code >= 500,
            });
        }

        Ok(reply.result.unwrap_or(JsonValue::Null))
    }
}

fn inline_keyboard(buttons: &[Vec<Button>]) -> Option<JsonValue> {
    let rows: Vec<Vec<JsonValue>> = buttons
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|button| {
                    if let Some(url) = button.url.as_deref().filter(|u| !u.is_empty()) {
                        Some(json!({"text": button.text, "url": url}))
                    } else {
                        button
                            .callback
                            .as_deref()
                            .filter(|c| !c.is_empty())
                            .map(|callback| json!({"text": button.text, "callback_data": callback}))
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    if rows.is_empty() {
        None
    } else {
        Some(json!({ "inline_keyboard": rows }))
    }
}

#[async_trait]
impl Notifier for TelegramBot {
    async fn send(&self, chat_id: i64, message: &OutboundMessage) -> Result<(), NotificationError> {
        if !self.is_running() {
            return Err(NotificationError::NotRunning);
        }

        let keyboard = inline_keyboard(&message.buttons);
        let media = message
            .video_url
            .as_deref()
            .map(|url| ("sendVideo", "video", url))
            .or_else(|| message.image_url.as_deref().map(|url| ("sendPhoto", "photo", url)));

        let Some((method, field, url)) = media else {
            let mut payload = json!({"chat_id": chat_id, "text": message.text});
            if let Some(keyboard) = keyboard {
                payload["reply_markup"] = keyboard;
            }
            self.call("sendMessage", &payload).await?;
            return Ok(());
        };

        let fits_caption = message.text.chars().count() <= CAPTION_LIMIT;
        let mut payload = json!({ "chat_id": chat_id });
        payload[field] = json!(url);
        if fits_caption {
            payload["caption"] = json!(message.text);
            if let Some(keyboard) = keyboard.clone() {
                payload["reply_markup"] = keyboard;
            }
        }
        self.call(method, &payload).await?;

        if !fits_caption {
            warn!(chat_id, "message too long for a caption, sending text separately");
            let mut payload = json!({"chat_id": chat_id, "text": message.text});
            if let Some(keyboard) = keyboard {
                payload["reply_markup"] = keyboard;
            }
            self.call("sendMessage", &payload).await?;
        }
        Ok(())
    }
}
