use tracing::{debug, warn};

use romupunkt_core::domain::MediaRef;

use crate::keyboards::Keyboard;
use crate::messenger::{Messenger, MEDIA_GROUP_LIMIT};

#[derive(Clone, Debug, PartialEq)]
pub enum Outgoing {
    Text(String),
    Buttons { text: String, keyboard: Keyboard },
    /// Photos with the caption on the first one. Falls back to the caption as
    /// plain text when there are no photos or the album is refused.
    Album { media: Vec<MediaRef>, caption: String },
    ClearControls { message_id: i32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub chat_id: i64,
    pub outgoing: Outgoing,
    /// Told to another chat when this delivery fails.
    pub failure_notice: Option<(i64, String)>,
}

/// Deliveries collected while a session lock is held and sent after it is
/// released, in order.
#[derive(Debug, Default)]
pub struct Outbox {
    deliveries: Vec<Delivery>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
    pub failed_chats: Vec<i64>,
}

impl Outbox {
    pub fn push(&mut self, chat_id: i64, outgoing: Outgoing) -> &mut Delivery {
        self.deliveries.push(Delivery { chat_id, outgoing, failure_notice: None });
        let last = self.deliveries.len() - 1;
        &mut self.deliveries[last]
    }

    pub fn text(&mut self, chat_id: i64, text: impl Into<String>) -> &mut Delivery {
        self.push(chat_id, Outgoing::Text(text.into()))
    }

    pub fn buttons(&mut self, chat_id: i64, text: impl Into<String>, keyboard: Keyboard) -> &mut Delivery {
        self.push(chat_id, Outgoing::Buttons { text: text.into(), keyboard })
    }

    pub fn clear_controls(&mut self, chat_id: i64, message_id: Option<i32>) {
        if let Some(message_id) = message_id {
            self.push(chat_id, Outgoing::ClearControls { message_id });
        }
    }

    /// Appends `other`'s deliveries after the ones already queued.
    pub fn extend(&mut self, other: Outbox) {
        self.deliveries.extend(other.deliveries);
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub async fn flush(self, messenger: &dyn Messenger) -> FlushReport {
        let mut report = FlushReport::default();
        for delivery in self.deliveries {
            match send(messenger, delivery.chat_id, &delivery.outgoing).await {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    report.failed += 1;
                    report.failed_chats.push(delivery.chat_id);
                    warn!(
                        event_name = "delivery.message.failed",
                        chat_id = delivery.chat_id,
                        error = %error,
                        "outbound delivery failed"
                    );
                    if let Some((chat_id, notice)) = delivery.failure_notice {
                        if let Err(error) = messenger.send_text(chat_id, &notice).await {
                            warn!(
                                event_name = "delivery.failure_notice.failed",
                                chat_id,
                                error = %error,
                                "could not report a failed delivery"
                            );
                        }
                    }
                }
            }
        }
        report
    }
}

impl Delivery {
    pub fn on_failure_tell(&mut self, chat_id: i64, notice: impl Into<String>) {
        self.failure_notice = Some((chat_id, notice.into()));
    }
}

async fn send(
    messenger: &dyn Messenger,
    chat_id: i64,
    outgoing: &Outgoing,
) -> Result<(), crate::messenger::DeliveryError> {
    match outgoing {
        Outgoing::Text(text) => messenger.send_text(chat_id, text).await,
        Outgoing::Buttons { text, keyboard } => messenger.send_buttons(chat_id, text, keyboard).await,
        Outgoing::ClearControls { message_id } => messenger.clear_controls(chat_id, *message_id).await,
        Outgoing::Album { media, caption } if media.is_empty() => {
            messenger.send_text(chat_id, caption).await
        }
        Outgoing::Album { media, caption } => {
            let album = &media[..media.len().min(MEDIA_GROUP_LIMIT)];
            match messenger.send_media_group(chat_id, album, Some(caption)).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    debug!(
                        event_name = "delivery.album.fallback",
                        chat_id,
                        error = %error,
                        "media group refused; sending text card"
                    );
                    messenger.send_text(chat_id, caption).await
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use romupunkt_core::domain::MediaRef;

    use super::{Outbox, Outgoing};
    use crate::messenger::{RecordingMessenger, Sent};

    fn media(count: usize) -> Vec<MediaRef> {
        (0..count).map(|index| MediaRef(format!("p{index}"))).collect()
    }

    #[tokio::test]
    async fn album_is_capped_at_ten_photos() {
        let messenger = RecordingMessenger::new();
        let mut outbox = Outbox::default();
        outbox.push(1, Outgoing::Album { media: media(12), caption: "card".to_owned() });

        outbox.flush(&messenger).await;

        let Sent::MediaGroup { media, caption, .. } = &messenger.sent()[0] else {
            panic!("expected media group");
        };
        assert_eq!(media.len(), 10);
        assert_eq!(caption.as_deref(), Some("card"));
    }

    #[tokio::test]
    async fn refused_album_falls_back_to_text() {
        let messenger = RecordingMessenger::new();
        messenger.reject_media_groups();
        let mut outbox = Outbox::default();
        outbox.push(1, Outgoing::Album { media: media(2), caption: "card".to_owned() });

        let report = outbox.flush(&messenger).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(messenger.sent(), vec![Sent::Text { chat_id: 1, text: "card".to_owned() }]);
    }

    #[tokio::test]
    async fn failure_notice_reaches_the_initiator() {
        let messenger = RecordingMessenger::new();
        messenger.set_unreachable(2);
        let mut outbox = Outbox::default();
        outbox.text(2, "offer").on_failure_tell(1, "could not notify");
        outbox.text(1, "after");

        let report = outbox.flush(&messenger).await;

        assert_eq!(report.failed, 1);
        assert_eq!(messenger.texts_to(1), vec!["could not notify".to_owned(), "after".to_owned()]);
    }
}
