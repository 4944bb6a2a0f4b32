use romupunkt_core::domain::{Coordinates, MediaRef, UserId};

use crate::callbacks::Callback;
use crate::commands::BotCommand;

/// One normalized inbound update. Transport details that the dispatcher does
/// not need (message entities, file sizes, chat kinds) are dropped here.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    /// Transport update id, carried as the correlation id in logs.
    pub update_id: i64,
    pub user_id: UserId,
    pub chat_id: i64,
    pub username: Option<String>,
    pub kind: InboundKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundKind {
    Text(String),
    Command(BotCommand),
    Photo(MediaRef),
    Location(Coordinates),
    Callback {
        data: String,
        /// The message that carried the pressed control.
        message_id: Option<i32>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InboundKindTag {
    Text,
    Command,
    Photo,
    Location,
    Callback,
}

impl InboundKindTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Command => "command",
            Self::Photo => "photo",
            Self::Location => "location",
            Self::Callback => "callback",
        }
    }
}

impl InboundKind {
    /// Classifies a text message: slash commands become [`InboundKind::Command`].
    pub fn from_text(text: &str) -> Self {
        match BotCommand::parse(text) {
            Some(command) => Self::Command(command),
            None => Self::Text(text.to_owned()),
        }
    }

    pub fn tag(&self) -> InboundKindTag {
        match self {
            Self::Text(_) => InboundKindTag::Text,
            Self::Command(_) => InboundKindTag::Command,
            Self::Photo(_) => InboundKindTag::Photo,
            Self::Location(_) => InboundKindTag::Location,
            Self::Callback { .. } => InboundKindTag::Callback,
        }
    }

    pub fn callback(&self) -> Option<Result<Callback, crate::callbacks::UnknownCallback>> {
        match self {
            Self::Callback { data, .. } => Some(data.parse()),
            _ => None,
        }
    }
}

impl Inbound {
    pub fn new(update_id: i64, user_id: UserId, kind: InboundKind) -> Self {
        Self { update_id, user_id, chat_id: user_id.0, username: None, kind }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use romupunkt_core::domain::UserId;

    use super::{Inbound, InboundKind, InboundKindTag};
    use crate::callbacks::Callback;
    use crate::commands::BotCommand;

    #[test]
    fn slash_text_is_classified_as_command() {
        assert_eq!(InboundKind::from_text("/leads 3"), InboundKind::Command(BotCommand::Leads { limit: 3 }));
        assert_eq!(InboundKind::from_text("done").tag(), InboundKindTag::Text);
    }

    #[test]
    fn private_chat_defaults_to_sender_id() {
        let inbound = Inbound::new(1, UserId(1001), InboundKind::Text("hi".to_owned()))
            .with_username("jaan");
        assert_eq!(inbound.chat_id, 1001);
        assert_eq!(inbound.username.as_deref(), Some("jaan"));
    }

    #[test]
    fn callback_payload_is_decoded_lazily() {
        let kind = InboundKind::Callback { data: "photos:done".to_owned(), message_id: Some(9) };
        assert_eq!(kind.callback(), Some(Ok(Callback::PhotosDone)));
        assert_eq!(InboundKind::Text("x".to_owned()).callback(), None);
    }
}
