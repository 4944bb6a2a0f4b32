use romupunkt_core::conversation::{OwnerAnswer, Prompt};
use romupunkt_core::domain::{LeadId, Locale, OfferId, TransportMethod};
use url::Url;

use crate::callbacks::Callback;
use crate::templates::{TemplateError, Templates};

pub const COUNTRY_CODES: [(&str, &str); 6] = [
    ("🇪🇪", "+372"),
    ("🇫🇮", "+358"),
    ("🇱🇻", "+371"),
    ("🇷🇺", "+7"),
    ("🇱🇹", "+370"),
    ("🇸🇪", "+46"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Callback(Callback),
    /// Opened by the client; pressing it sends no update back.
    Link(Url),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

/// Inline keyboard, row by row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }

    pub fn callbacks(&self) -> impl Iterator<Item = &Callback> {
        self.rows.iter().flatten().filter_map(|button| match &button.action {
            ButtonAction::Callback(callback) => Some(callback),
            ButtonAction::Link(_) => None,
        })
    }
}

fn button(label: impl Into<String>, callback: Callback) -> Button {
    Button { label: label.into(), action: ButtonAction::Callback(callback) }
}

/// Builds keyboards with labels in one locale.
pub struct KeyboardBuilder<'a> {
    templates: &'a Templates,
    locale: Locale,
}

impl<'a> KeyboardBuilder<'a> {
    pub fn new(templates: &'a Templates, locale: Locale) -> Self {
        Self { templates, locale }
    }

    fn labelled(&self, key: &str, callback: Callback) -> Result<Button, TemplateError> {
        Ok(button(self.templates.text(self.locale, key)?, callback))
    }

    /// Language names are shown in their own language regardless of locale.
    pub fn language() -> Keyboard {
        Keyboard::default().row(vec![
            button("🇪🇪 Eesti", Callback::Language(Locale::Ee)),
            button("🇬🇧 English", Callback::Language(Locale::En)),
            button("🇷🇺 Русский", Callback::Language(Locale::Ru)),
        ])
    }

    pub fn country_codes() -> Keyboard {
        let buttons: Vec<Button> = COUNTRY_CODES
            .iter()
            .map(|(flag, code)| button(format!("{flag} {code}"), Callback::CountryCode((*code).to_owned())))
            .collect();
        let mut keyboard = Keyboard::default();
        for chunk in buttons.chunks(3) {
            keyboard = keyboard.row(chunk.to_vec());
        }
        keyboard
    }

    /// The controls that accompany an intake prompt, if any.
    pub fn for_prompt(&self, prompt: &Prompt) -> Result<Option<Keyboard>, TemplateError> {
        let keyboard = match prompt {
            Prompt::ChooseLanguage => Self::language(),
            Prompt::Welcome => {
                Keyboard::default().row(vec![self.labelled("btn_continue", Callback::Welcome)?])
            }
            Prompt::AskOwnership => Keyboard::default().row(vec![
                self.labelled("btn_yes", Callback::Owner(OwnerAnswer::Yes))?,
                self.labelled("btn_no", Callback::Owner(OwnerAnswer::No))?,
                self.labelled("btn_skip", Callback::Owner(OwnerAnswer::Skip))?,
            ]),
            Prompt::AskCompleteness => {
                Keyboard::default().row(vec![self.labelled("btn_complete", Callback::Complete)?])
            }
            Prompt::AskLogistics => Keyboard::default().row(vec![
                self.labelled("btn_self", Callback::Logistics(TransportMethod::SelfDelivery))?,
                self.labelled("btn_tow", Callback::Logistics(TransportMethod::Tow))?,
            ]),
            Prompt::AskPhotos { .. }
            | Prompt::PhotoLimitReached { .. }
            | Prompt::PhotosRequired { .. } => self.photos_done()?,
            Prompt::PhotoReceived { count, max } if count < max => self.photos_done()?,
            Prompt::AskCountryCode | Prompt::InvalidCountryCode => Self::country_codes(),
            Prompt::Submitted { .. } | Prompt::SessionReset => self.new_inquiry()?,
            _ => return Ok(None),
        };
        Ok(Some(keyboard))
    }

    fn photos_done(&self) -> Result<Keyboard, TemplateError> {
        Ok(Keyboard::default().row(vec![self.labelled("btn_photos_done", Callback::PhotosDone)?]))
    }

    pub fn new_inquiry(&self) -> Result<Keyboard, TemplateError> {
        Ok(Keyboard::default()
            .row(vec![self.labelled("btn_new_inquiry", Callback::NewInquiry)?])
            .row(vec![self.labelled("btn_share", Callback::Share(self.locale))?]))
    }

    pub fn share_link(&self, link: Url) -> Result<Keyboard, TemplateError> {
        let label = self.templates.text(self.locale, "btn_share_telegram")?;
        Ok(Keyboard::default().row(vec![Button { label, action: ButtonAction::Link(link) }]))
    }

    pub fn lead_actions(&self, lead_id: LeadId) -> Result<Keyboard, TemplateError> {
        Ok(Keyboard::default()
            .row(vec![self.labelled("btn_make_offer", Callback::AdminReply(lead_id))?])
            .row(vec![
                self.labelled("btn_archive", Callback::AdminArchive(lead_id))?,
                self.labelled("btn_delete", Callback::AdminDelete(lead_id))?,
            ]))
    }

    pub fn offer_actions(&self, offer_id: OfferId) -> Result<Keyboard, TemplateError> {
        Ok(Keyboard::default()
            .row(vec![
                self.labelled("btn_accept", Callback::OfferAccept(offer_id))?,
                self.labelled("btn_reject", Callback::OfferReject(offer_id))?,
            ])
            .row(vec![self.labelled("btn_counter", Callback::OfferCounter(offer_id))?]))
    }

    pub fn make_offer(&self, lead_id: LeadId) -> Result<Keyboard, TemplateError> {
        Ok(Keyboard::default().row(vec![self.labelled("btn_make_offer", Callback::AdminReply(lead_id))?]))
    }
}
