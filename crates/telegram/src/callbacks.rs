//! Inline-button payloads. Telegram caps callback data at 64 bytes, so every
//! control travels as a short `kind:arg` string.

use std::fmt;
use std::str::FromStr;

use romupunkt_core::conversation::{OwnerAnswer, Selection};
use romupunkt_core::domain::{LeadId, Locale, OfferId, TransportMethod};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callback {
    Language(Locale),
    Welcome,
    Owner(OwnerAnswer),
    Complete,
    Logistics(TransportMethod),
    PhotosDone,
    CountryCode(String),
    AdminReply(LeadId),
    AdminArchive(LeadId),
    AdminDelete(LeadId),
    OfferAccept(OfferId),
    OfferReject(OfferId),
    OfferCounter(OfferId),
    NewInquiry,
    /// Carries the locale because the finished session no longer knows it.
    Share(Locale),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised callback data `{0}`")]
pub struct UnknownCallback(pub String);

impl Callback {
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// The intake selection this control stands for, if it belongs to the
    /// user-facing conversation rather than the operator surface.
    pub fn selection(&self) -> Option<Selection> {
        let selection = match self {
            Self::Language(locale) => Selection::Language(*locale),
            Self::Welcome => Selection::Continue,
            Self::Owner(answer) => Selection::Owner(*answer),
            Self::Complete => Selection::Complete,
            Self::Logistics(method) => Selection::Logistics(*method),
            Self::PhotosDone => Selection::PhotosDone,
            Self::CountryCode(code) => Selection::CountryCode(code.clone()),
            _ => return None,
        };
        Some(selection)
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Language(locale) => write!(f, "lang:{}", locale.as_str()),
            Self::Welcome => f.write_str("welcome"),
            Self::Owner(answer) => write!(
                f,
                "owner:{}",
                match answer {
                    OwnerAnswer::Yes => "yes",
                    OwnerAnswer::No => "no",
                    OwnerAnswer::Skip => "skip",
                }
            ),
            Self::Complete => f.write_str("complete"),
            Self::Logistics(method) => write!(
                f,
                "logistics:{}",
                match method {
                    TransportMethod::SelfDelivery => "self",
                    TransportMethod::Tow => "tow",
                }
            ),
            Self::PhotosDone => f.write_str("photos:done"),
            Self::CountryCode(code) => write!(f, "cc:{code}"),
            Self::AdminReply(lead) => write!(f, "admin_reply:{lead}"),
            Self::AdminArchive(lead) => write!(f, "admin_archive:{lead}"),
            Self::AdminDelete(lead) => write!(f, "admin_delete:{lead}"),
            Self::OfferAccept(offer) => write!(f, "offer_accept:{offer}"),
            Self::OfferReject(offer) => write!(f, "offer_reject:{offer}"),
            Self::OfferCounter(offer) => write!(f, "offer_counter:{offer}"),
            Self::NewInquiry => f.write_str("new"),
            Self::Share(locale) => write!(f, "share:{}", locale.as_str()),
        }
    }
}

impl FromStr for Callback {
    type Err = UnknownCallback;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownCallback(data.to_owned());
        let (kind, arg) = match data.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (data, None),
        };

        let lead = |arg: Option<&str>| -> Result<LeadId, UnknownCallback> {
            arg.and_then(|raw| raw.parse().ok()).map(LeadId).ok_or_else(unknown)
        };
        let offer = |arg: Option<&str>| -> Result<OfferId, UnknownCallback> {
            arg.and_then(|raw| raw.parse().ok()).map(OfferId).ok_or_else(unknown)
        };

        match (kind, arg) {
            ("lang", Some(code)) => code.parse().map(Self::Language).map_err(|_| unknown()),
            ("welcome", None) => Ok(Self::Welcome),
            ("owner", Some("yes")) => Ok(Self::Owner(OwnerAnswer::Yes)),
            ("owner", Some("no")) => Ok(Self::Owner(OwnerAnswer::No)),
            ("owner", Some("skip")) => Ok(Self::Owner(OwnerAnswer::Skip)),
            ("complete", None) => Ok(Self::Complete),
            ("logistics", Some("self")) => Ok(Self::Logistics(TransportMethod::SelfDelivery)),
            ("logistics", Some("tow")) => Ok(Self::Logistics(TransportMethod::Tow)),
            ("photos", Some("done")) => Ok(Self::PhotosDone),
            ("cc", Some(code)) if code.starts_with('+') => Ok(Self::CountryCode(code.to_owned())),
            ("admin_reply", arg) => lead(arg).map(Self::AdminReply),
            ("admin_archive", arg) => lead(arg).map(Self::AdminArchive),
            ("admin_delete", arg) => lead(arg).map(Self::AdminDelete),
            ("offer_accept", arg) => offer(arg).map(Self::OfferAccept),
            ("offer_reject", arg) => offer(arg).map(Self::OfferReject),
            ("offer_counter", arg) => offer(arg).map(Self::OfferCounter),
            ("new", None) => Ok(Self::NewInquiry),
            ("share", Some(code)) => code.parse().map(Self::Share).map_err(|_| unknown()),
            _ => Err(unknown()),
        }
    }
}
