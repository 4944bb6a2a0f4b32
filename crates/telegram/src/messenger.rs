use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use romupunkt_core::domain::MediaRef;
use romupunkt_core::errors::ApplicationError;

use crate::keyboards::Keyboard;

/// Telegram accepts at most this many items in one media group.
pub const MEDIA_GROUP_LIMIT: usize = 10;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("delivery to chat {chat_id} failed: {reason}")]
pub struct DeliveryError {
    pub chat_id: i64,
    pub reason: String,
}

impl From<DeliveryError> for ApplicationError {
    fn from(error: DeliveryError) -> Self {
        ApplicationError::Delivery(error.to_string())
    }
}

/// The outbound half of the transport.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError>;

    async fn send_buttons(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), DeliveryError>;

    /// Sends photos as one album; `caption` goes on the first item.
    async fn send_media_group(
        &self,
        chat_id: i64,
        media: &[MediaRef],
        caption: Option<&str>,
    ) -> Result<(), DeliveryError>;

    /// Removes the inline keyboard from a message sent earlier.
    async fn clear_controls(&self, chat_id: i64, message_id: i32) -> Result<(), DeliveryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Text { chat_id: i64, text: String },
    Buttons { chat_id: i64, text: String, keyboard: Keyboard },
    MediaGroup { chat_id: i64, media: Vec<MediaRef>, caption: Option<String> },
    ClearControls { chat_id: i64, message_id: i32 },
}

impl Sent {
    pub fn chat_id(&self) -> i64 {
        match self {
            Self::Text { chat_id, .. }
            | Self::Buttons { chat_id, .. }
            | Self::MediaGroup { chat_id, .. }
            | Self::ClearControls { chat_id, .. } => *chat_id,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } | Self::Buttons { text, .. } => Some(text),
            Self::MediaGroup { caption, .. } => caption.as_deref(),
            Self::ClearControls { .. } => None,
        }
    }
}

/// In-process [`Messenger`] that records every delivery. Chats marked
/// unreachable fail every call, and media groups can be failed on their own.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    unreachable: Mutex<HashSet<i64>>,
    reject_media_groups: Mutex<bool>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, chat_id: i64) {
        lock(&self.unreachable).insert(chat_id);
    }

    pub fn reject_media_groups(&self) {
        *lock(&self.reject_media_groups) = true;
    }

    pub fn sent(&self) -> Vec<Sent> {
        lock(&self.sent).clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<Sent> {
        self.sent().into_iter().filter(|item| item.chat_id() == chat_id).collect()
    }

    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent_to(chat_id).iter().filter_map(Sent::text).map(str::to_owned).collect()
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }

    fn record(&self, item: Sent) -> Result<(), DeliveryError> {
        let chat_id = item.chat_id();
        if lock(&self.unreachable).contains(&chat_id) {
            return Err(DeliveryError { chat_id, reason: "chat unreachable".to_owned() });
        }
        lock(&self.sent).push(item);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.record(Sent::Text { chat_id, text: text.to_owned() })
    }

    async fn send_buttons(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), DeliveryError> {
        self.record(Sent::Buttons { chat_id, text: text.to_owned(), keyboard: keyboard.clone() })
    }

    async fn send_media_group(
        &self,
        chat_id: i64,
        media: &[MediaRef],
        caption: Option<&str>,
    ) -> Result<(), DeliveryError> {
        if *lock(&self.reject_media_groups) {
            return Err(DeliveryError { chat_id, reason: "media group rejected".to_owned() });
        }
        self.record(Sent::MediaGroup {
            chat_id,
            media: media.to_vec(),
            caption: caption.map(str::to_owned),
        })
    }

    async fn clear_controls(&self, chat_id: i64, message_id: i32) -> Result<(), DeliveryError> {
        self.record(Sent::ClearControls { chat_id, message_id })
    }
}
