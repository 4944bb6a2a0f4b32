//! Bot API transport over teloxide: long polling in, messages out.

use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, CallbackQuery, ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup,
    InputFile, InputMedia, InputMediaPhoto, MessageId, UpdateKind, User,
};
use teloxide::RequestError;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use romupunkt_core::domain::{Coordinates, MediaRef, UserId};

use crate::events::{Inbound, InboundKind};
use crate::keyboards::{ButtonAction, Keyboard};
use crate::messenger::{DeliveryError, Messenger, MEDIA_GROUP_LIMIT};
use crate::runner::{TransportError, UpdateSource};

/// Headroom between the long-poll timeout and the HTTP client timeout.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

pub struct TelegramTransport {
    bot: Bot,
    /// Next `update_id` to request; everything below it has been consumed.
    offset: Mutex<i32>,
    poll_timeout: Duration,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>, poll_timeout: Duration) -> Result<Self, TransportError> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_timeout + CLIENT_TIMEOUT_MARGIN)
            .build()
            .map_err(|error| TransportError::Setup(error.to_string()))?;

        Ok(Self { bot: Bot::with_client(token, client), offset: Mutex::new(0), poll_timeout })
    }

    async fn acknowledge_callback(&self, query: &CallbackQuery) {
        if let Err(error) = self.bot.answer_callback_query(query.id.clone()).await {
            warn!(
                event_name = "ingress.telegram.callback_ack_failed",
                error = %error,
                "could not answer callback query"
            );
        }
    }
}

#[async_trait]
impl UpdateSource for TelegramTransport {
    async fn next_batch(&self) -> Result<Vec<Inbound>, TransportError> {
        let mut offset = self.offset.lock().await;
        let updates = self
            .bot
            .get_updates()
            .offset(*offset)
            .timeout(u32::try_from(self.poll_timeout.as_secs()).unwrap_or(u32::MAX))
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .await
            .map_err(|error| TransportError::Receive(error.to_string()))?;

        let mut batch = Vec::with_capacity(updates.len());
        for update in updates {
            let next = i32::try_from(update.id.0).unwrap_or(i32::MAX).saturating_add(1);
            *offset = (*offset).max(next);

            if let UpdateKind::CallbackQuery(query) = &update.kind {
                self.acknowledge_callback(query).await;
            }
            match normalize(&update) {
                Some(inbound) => batch.push(inbound),
                None => debug!(update_id = update.id.0, "skipping unsupported update"),
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl Messenger for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(drop)
            .map_err(|error| delivery_error(chat_id, error))
    }

    async fn send_buttons(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), DeliveryError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(inline_markup(keyboard))
            .await
            .map(drop)
            .map_err(|error| delivery_error(chat_id, error))
    }

    async fn send_media_group(
        &self,
        chat_id: i64,
        media: &[MediaRef],
        caption: Option<&str>,
    ) -> Result<(), DeliveryError> {
        let media = &media[..media.len().min(MEDIA_GROUP_LIMIT)];
        let result = match media {
            [] => return Err(DeliveryError { chat_id, reason: "empty media group".to_owned() }),
            // The Bot API wants at least two items in an album.
            [single] => {
                let request = self.bot.send_photo(ChatId(chat_id), photo_file(single));
                match caption {
                    Some(caption) => request.caption(caption).await.map(drop),
                    None => request.await.map(drop),
                }
            }
            many => {
                let items: Vec<InputMedia> = many
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        let photo = InputMediaPhoto::new(photo_file(item));
                        let photo = match caption {
                            Some(caption) if index == 0 => photo.caption(caption),
                            _ => photo,
                        };
                        InputMedia::Photo(photo)
                    })
                    .collect();
                self.bot.send_media_group(ChatId(chat_id), items).await.map(drop)
            }
        };
        result.map_err(|error| delivery_error(chat_id, error))
    }

    async fn clear_controls(&self, chat_id: i64, message_id: i32) -> Result<(), DeliveryError> {
        self.bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id))
            .await
            .map(drop)
            .map_err(|error| delivery_error(chat_id, error))
    }
}

/// Reduces a raw update to the parts the dispatcher consumes. Updates without
/// a sender, and message kinds the intake does not use, yield `None`.
pub fn normalize(update: &Update) -> Option<Inbound> {
    let update_id = i64::from(update.id.0);
    match &update.kind {
        UpdateKind::Message(message) => normalize_message(update_id, message),
        UpdateKind::CallbackQuery(query) => normalize_callback(update_id, query),
        _ => None,
    }
}

fn normalize_message(update_id: i64, message: &Message) -> Option<Inbound> {
    let sender = message.from.as_ref()?;
    let kind = if let Some(text) = message.text() {
        InboundKind::from_text(text)
    } else if let Some(sizes) = message.photo() {
        // Sizes arrive smallest first.
        let largest = sizes.last()?;
        InboundKind::Photo(MediaRef(largest.file.id.to_string()))
    } else if let Some(location) = message.location() {
        InboundKind::Location(Coordinates {
            latitude: location.latitude,
            longitude: location.longitude,
        })
    } else {
        return None;
    };

    inbound_from(update_id, sender, message.chat.id.0, kind)
}

fn normalize_callback(update_id: i64, query: &CallbackQuery) -> Option<Inbound> {
    let data = query.data.clone()?;
    let message = query.message.as_ref();
    let chat_id = match message {
        Some(message) => message.chat().id.0,
        None => i64::try_from(query.from.id.0).ok()?,
    };
    let kind = InboundKind::Callback { data, message_id: message.map(|message| message.id().0) };

    inbound_from(update_id, &query.from, chat_id, kind)
}

fn inbound_from(update_id: i64, sender: &User, chat_id: i64, kind: InboundKind) -> Option<Inbound> {
    let user_id = UserId(i64::try_from(sender.id.0).ok()?);
    let mut inbound = Inbound::new(update_id, user_id, kind);
    inbound.chat_id = chat_id;
    inbound.username = sender.username.clone();
    Some(inbound)
}

fn inline_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|button| match &button.action {
                ButtonAction::Callback(callback) => {
                    InlineKeyboardButton::callback(button.label.clone(), callback.encode())
                }
                ButtonAction::Link(url) => InlineKeyboardButton::url(button.label.clone(), url.clone()),
            })
            .collect::<Vec<_>>()
    }))
}

fn photo_file(media: &MediaRef) -> InputFile {
    InputFile::file_id(FileId(media.0.clone()))
}

fn delivery_error(chat_id: i64, error: RequestError) -> DeliveryError {
    DeliveryError { chat_id, reason: error.to_string() }
}
