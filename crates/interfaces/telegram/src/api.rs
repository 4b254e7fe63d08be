//! Thin Bot API client: the handful of methods the bot uses and their wire
//! types.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use onoffpc_control::KEYBOARD_LAYOUT;

const API_ROOT: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram {method} failed ({status}): {description}")]
    Api {
        method: &'static str,
        status: u16,
        description: String,
    },
}

impl ApiError {
    /// Another process is polling with the same token.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { status: 409, .. })
    }

    /// The edit carried exactly the text the message already shows.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::Api { description, .. } if description.contains("message is not modified"))
    }
}

pub struct TelegramApi {
    client: Client,
    base_url: String,
    poll_timeout: Duration,
}

impl TelegramApi {
    pub fn new(token: &str, poll_timeout: Duration) -> Result<Self, ApiError> {
        Self::with_base_url(format!("{API_ROOT}/bot{token}"), poll_timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, poll_timeout: Duration) -> Result<Self, ApiError> {
        // Long polls hold the request open for `poll_timeout`.
        let client = Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            poll_timeout,
        })
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>, ApiError> {
        let body = GetUpdatesRequest {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: &["message", "callback_query"],
        };
        self.call("getUpdates", &body).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<TelegramMessage, ApiError> {
        let body = SendMessageRequest {
            chat_id,
            text,
            disable_web_page_preview: true,
            reply_markup,
        };
        self.call("sendMessage", &body).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), ApiError> {
        let body = EditMessageTextRequest {
            chat_id,
            message_id,
            text,
            reply_markup,
        };
        let _: serde_json::Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str, text: &str) -> Result<(), ApiError> {
        let body = AnswerCallbackQueryRequest {
            callback_query_id,
            text,
        };
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    async fn call<B, T>(&self, method: &'static str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{method}", self.base_url);
        let response = self.client.post(url).json(body).send().await?;

        // Error replies still carry a JSON body with the description.
        let status = response.status().as_u16();
        let payload: TelegramResponse<T> = response.json().await?;
        match payload {
            TelegramResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            TelegramResponse { description, .. } => Err(ApiError::Api {
                method,
                status,
                description: description.unwrap_or_else(|| format!("telegram {method} failed")),
            }),
        }
    }
}

/// The control keyboard attached to every status message.
pub fn control_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: KEYBOARD_LAYOUT
            .iter()
            .map(|row| {
                row.iter()
                    .map(|kind| InlineKeyboardButton {
                        text: kind.label().to_string(),
                        callback_data: kind.callback_data().to_string(),
                    })
                    .collect()
            })
            .collect(),
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackQueryRequest<'a> {
    callback_query_id: &'a str,
    text: &'a str,
}
