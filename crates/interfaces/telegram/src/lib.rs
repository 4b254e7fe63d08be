mod api;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use onoffpc_control::{
    ActionKind, ControlContext, EditOutcome, Responder, SurfaceEditor, SurfaceError, SurfaceId,
    UserId, messages,
};

pub use api::{
    ApiError, InlineKeyboardButton, InlineKeyboardMarkup, TelegramApi, TelegramCallbackQuery,
    TelegramMessage, TelegramUpdate, control_keyboard,
};

const HELP_TEXT: &str = "/start - show the live status message with controls\n\
/status - print the current status once\n\
/help - this list";

const UNKNOWN_COMMAND: &str = "Unknown command. Use /help.";
const UNKNOWN_ACTION: &str = "Unknown action.";

/// Long-polls for updates and routes them to the control context.  Runs until
/// the surrounding task is cancelled.
pub async fn start_bot(api: Arc<TelegramApi>, ctx: Arc<ControlContext>) -> Result<()> {
    let mut offset: i64 = 0;
    info!("telegram bot listening for updates");

    loop {
        let updates = match api.get_updates(offset).await {
            Ok(updates) => updates,
            Err(err) if err.is_conflict() => {
                warn!("another bot instance is polling with this token; retrying in 15s");
                tokio::time::sleep(Duration::from_secs(15)).await;
                continue;
            }
            Err(err) => {
                warn!(%err, "getUpdates failed; retrying in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = update.update_id + 1;
            if let Err(err) = handle_update(&api, &ctx, update).await {
                warn!(%err, "failed to handle telegram update");
            }
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}

async fn handle_update(api: &Arc<TelegramApi>, ctx: &ControlContext, update: TelegramUpdate) -> Result<()> {
    if let Some(message) = update.message {
        handle_message(api, ctx, message).await
    } else if let Some(query) = update.callback_query {
        handle_callback(api, ctx, query).await
    } else {
        Ok(())
    }
}

async fn handle_message(api: &TelegramApi, ctx: &ControlContext, message: TelegramMessage) -> Result<()> {
    let (Some(text), Some(user)) = (message.text.as_deref(), message.from.as_ref()) else {
        return Ok(());
    };
    if !ctx.is_authorized(user.id) {
        info!(user = user.id, username = ?user.username, "rejected message from user not on the allow-list");
    }
    handle_command(api, ctx, message.chat.id, user.id, text).await
}

/// Where command replies go.  `with_keyboard` attaches the control keyboard;
/// the id of the sent message comes back.
#[async_trait]
trait ChatSink: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str, with_keyboard: bool) -> Result<SurfaceId>;
}

#[async_trait]
impl ChatSink for TelegramApi {
    async fn send_text(&self, chat_id: i64, text: &str, with_keyboard: bool) -> Result<SurfaceId> {
        let keyboard = with_keyboard.then(control_keyboard);
        let sent = self.send_message(chat_id, text, keyboard.as_ref()).await?;
        Ok(SurfaceId {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }
}

/// Allow-list gate plus command routing for text messages.
async fn handle_command<S>(sink: &S, ctx: &ControlContext, chat_id: i64, user: UserId, text: &str) -> Result<()>
where
    S: ChatSink + ?Sized,
{
    if !ctx.is_authorized(user) {
        sink.send_text(chat_id, messages::REJECTED, false).await?;
        return Ok(());
    }

    let command = normalize_telegram_command(text);
    debug!(user, %command, "command received");
    match command.as_str() {
        "/start" => {
            let surface = sink.send_text(chat_id, messages::STATUS_PLACEHOLDER, true).await?;
            ctx.start_status(surface).await;
        }
        "/status" => {
            let text = ctx.status_text().await;
            sink.send_text(chat_id, &text, false).await?;
        }
        "/help" => {
            sink.send_text(chat_id, HELP_TEXT, false).await?;
        }
        _ => {
            sink.send_text(chat_id, UNKNOWN_COMMAND, false).await?;
        }
    }
    Ok(())
}

async fn handle_callback(
    api: &Arc<TelegramApi>,
    ctx: &ControlContext,
    query: TelegramCallbackQuery,
) -> Result<()> {
    let responder = Arc::new(CallbackResponder {
        api: Arc::clone(api),
        query_id: query.id,
        chat_id: query.message.as_ref().map(|message| message.chat.id),
    });

    let Some(action) = query.data.as_deref().and_then(ActionKind::from_callback_data) else {
        debug!(data = ?query.data, "ignoring unknown callback data");
        return responder.respond(UNKNOWN_ACTION).await;
    };

    let outcome = ctx.dispatch(query.from.id, action, responder).await;
    debug!(user = query.from.id, %action, ?outcome, "callback dispatched");
    Ok(())
}

/// Answers the button press that triggered an action.  Falls back to a plain
/// chat message once the callback can no longer be answered.
struct CallbackResponder {
    api: Arc<TelegramApi>,
    query_id: String,
    chat_id: Option<i64>,
}

#[async_trait]
impl Responder for CallbackResponder {
    async fn respond(&self, text: &str) -> Result<()> {
        match self.api.answer_callback_query(&self.query_id, text).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let Some(chat_id) = self.chat_id else {
                    return Err(err.into());
                };
                debug!(%err, "callback answer failed; sending as a message");
                self.api.send_message(chat_id, text, None).await?;
                Ok(())
            }
        }
    }
}

/// Edits the status message in place, keeping the control keyboard attached.
pub struct TelegramSurface {
    api: Arc<TelegramApi>,
    keyboard: InlineKeyboardMarkup,
}

impl TelegramSurface {
    pub fn new(api: Arc<TelegramApi>) -> Self {
        Self {
            api,
            keyboard: control_keyboard(),
        }
    }
}

#[async_trait]
impl SurfaceEditor for TelegramSurface {
    async fn edit_status(&self, surface: SurfaceId, text: &str) -> Result<EditOutcome, SurfaceError> {
        let edit = self
            .api
            .edit_message_text(surface.chat_id, surface.message_id, text, Some(&self.keyboard))
            .await;
        classify_edit(edit)
    }
}

fn classify_edit(edit: Result<(), ApiError>) -> Result<EditOutcome, SurfaceError> {
    match edit {
        Ok(()) => Ok(EditOutcome::Applied),
        Err(err) if err.is_not_modified() => Ok(EditOutcome::Unchanged),
        Err(err @ ApiError::Api { .. }) => Err(SurfaceError::Rejected(err.to_string())),
        Err(err) => Err(SurfaceError::Transport(err.to_string())),
    }
}

fn normalize_telegram_command(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return trimmed.to_string();
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();

    let command = command
        .split_once('@')
        .map(|(base, _)| base)
        .unwrap_or(command);

    if rest.is_empty() {
        command.to_string()
    } else {
        format!("{command} {rest}")
    }
}
