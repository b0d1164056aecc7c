use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, error, instrument, trace};

use crate::RecipientId;
use crate::config::TelegramConfig;
use crate::notifier::{DeliveryChannel, DeliveryError};

#[derive(Debug, Clone, Serialize)]
pub struct SendMessage<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    pub parse_mode: &'static str,
    pub disable_web_page_preview: bool,
}

impl<'a> SendMessage<'a> {
    pub fn html(chat_id: &'a str, text: &'a str) -> Self {
        Self {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GetUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

/// Envelope every Bot API response is wrapped in
#[derive(Debug, Clone, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

/// Update kinds requested from `getUpdates`
const ALLOWED_UPDATES: &[&str] = &["message", "my_chat_member"];

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,

    /// The bot's own membership in a chat changed
    pub my_chat_member: Option<ChatMemberUpdated>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: Option<String>,
}

impl Chat {
    pub fn is_group(&self) -> bool {
        matches!(self.kind.as_deref(), Some("group" | "supergroup"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub new_chat_member: ChatMember,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: MemberStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
    #[serde(other)]
    Unknown,
}

/// Minimal Telegram Bot API client
#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: Client,
    /// `{api_url}/bot{token}`
    base_url: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        // long polling holds requests open, so the timeout must exceed the poll timeout
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, DeliveryError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        match serde_json::from_str::<ApiResponse<T>>(&text) {
            Ok(ApiResponse {
                ok: true,
                result: Some(result),
                ..
            }) => Ok(result),
            Ok(ApiResponse {
                description,
                error_code,
                ..
            }) => Err(DeliveryError::Rejected {
                status: error_code.unwrap_or(status.as_u16()),
                description: description.unwrap_or_else(|| "no description".to_string()),
            }),
            Err(_) => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description: text,
            }),
        }
    }

    #[instrument(skip(self, text))]
    pub async fn send_message(&self, chat_id: &RecipientId, text: &str) -> Result<(), DeliveryError> {
        let message = SendMessage::html(chat_id.as_str(), text);
        match self.call::<_, serde_json::Value>("sendMessage", &message).await {
            Ok(_) => {
                trace!("delivered message to {chat_id}");
                Ok(())
            }
            Err(e) => {
                error!("Telegram message to {chat_id} failed: {e}");
                Err(e)
            }
        }
    }

    /// Long-poll for new updates, acknowledging everything before `offset`.
    #[instrument(skip(self))]
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> anyhow::Result<Vec<Update>> {
        let request = GetUpdates {
            offset,
            timeout: timeout_secs,
            allowed_updates: ALLOWED_UPDATES,
        };

        match self.call::<_, Vec<Update>>("getUpdates", &request).await {
            Ok(updates) => {
                debug!("received {} updates", updates.len());
                Ok(updates)
            }
            Err(e) => bail!("getUpdates failed: {e}"),
        }
    }
}

#[async_trait]
impl DeliveryChannel for TelegramClient {
    async fn send(&self, recipient: &RecipientId, text: &str) -> Result<(), DeliveryError> {
        self.send_message(recipient, text).await
    }
}
