use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::photo::PhotoSessionToken;
use crate::errors::DomainError;

pub const MIN_CURB_WEIGHT: u32 = 500;
pub const MAX_CURB_WEIGHT: u32 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadId(pub i64);

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    Ee,
    #[default]
    En,
    Ru,
}

impl Locale {
    pub const ALL: [Locale; 3] = [Locale::Ee, Locale::En, Locale::Ru];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ee => "ee",
            Self::En => "en",
            Self::Ru => "ru",
        }
    }

    /// Resolves a language button label or a typed language name.
    pub fn from_choice(input: &str) -> Option<Self> {
        input
            .split_whitespace()
            .map(|word| word.trim_matches(|ch: char| !ch.is_alphanumeric()).to_lowercase())
            .find_map(|word| match word.as_str() {
                "ee" | "est" | "eesti" | "estonian" => Some(Self::Ee),
                "en" | "eng" | "english" | "inglise" => Some(Self::En),
                "ru" | "rus" | "russian" | "русский" | "vene" => Some(Self::Ru),
                _ => None,
            })
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ee" | "et" => Ok(Self::Ee),
            "en" => Ok(Self::En),
            "ru" => Ok(Self::Ru),
            other => Err(format!("unsupported locale `{other}` (expected ee|en|ru)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Pending,
    Replied,
    Accepted,
    Rejected,
    Archived,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Replied => "replied",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }

    pub fn badge(self) -> &'static str {
        match self {
            Self::Pending => "🔵",
            Self::Replied => "💬",
            Self::Accepted => "✅",
            Self::Rejected => "❌",
            Self::Archived => "🗑",
        }
    }

    /// `Rejected -> Replied` is the re-open edge taken when the operator prices
    /// a lead again after a counter-offer.
    pub fn can_transition_to(self, next: LeadStatus) -> bool {
        matches!(
            (self, next),
            (LeadStatus::Pending, LeadStatus::Replied)
                | (LeadStatus::Pending, LeadStatus::Archived)
                | (LeadStatus::Replied, LeadStatus::Replied)
                | (LeadStatus::Replied, LeadStatus::Accepted)
                | (LeadStatus::Replied, LeadStatus::Rejected)
                | (LeadStatus::Replied, LeadStatus::Archived)
                | (LeadStatus::Rejected, LeadStatus::Replied)
                | (LeadStatus::Rejected, LeadStatus::Archived)
        )
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "replied" => Ok(Self::Replied),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown lead status `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Missing,
}

impl Completeness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Missing => "missing",
        }
    }
}

impl FromStr for Completeness {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "complete" => Ok(Self::Complete),
            "missing" => Ok(Self::Missing),
            other => Err(format!("unknown completeness `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMethod {
    SelfDelivery,
    Tow,
}

impl TransportMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfDelivery => "self_delivery",
            Self::Tow => "tow",
        }
    }
}

impl FromStr for TransportMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "self_delivery" => Ok(Self::SelfDelivery),
            "tow" => Ok(Self::Tow),
            other => Err(format!("unknown transport method `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// Everything the intake collected, ready to become a [`Lead`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeadDraft {
    pub user_id: UserId,
    pub username: Option<String>,
    pub locale: Locale,
    pub plate: String,
    pub owner_name: String,
    pub is_owner: Option<bool>,
    pub curb_weight: u32,
    pub completeness: Option<Completeness>,
    pub missing_parts: Option<String>,
    pub transport_method: TransportMethod,
    pub tow_address: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub phone: String,
    pub photo_session: Option<PhotoSessionToken>,
}

impl LeadDraft {
    pub fn needs_tow(&self) -> bool {
        self.transport_method == TransportMethod::Tow
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let mut missing = Vec::new();
        if self.plate.trim().is_empty() {
            missing.push("plate");
        }
        if self.owner_name.trim().is_empty() {
            missing.push("owner_name");
        }
        if self.phone.trim().is_empty() {
            missing.push("phone");
        }
        if !missing.is_empty() {
            return Err(DomainError::IntegrityViolation(format!(
                "lead draft is missing required fields: {}",
                missing.join(", ")
            )));
        }

        if !(MIN_CURB_WEIGHT..=MAX_CURB_WEIGHT).contains(&self.curb_weight) {
            return Err(DomainError::IntegrityViolation(format!(
                "curb weight {} is outside {MIN_CURB_WEIGHT}..={MAX_CURB_WEIGHT}",
                self.curb_weight
            )));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub locale: Locale,
    pub plate: String,
    pub owner_name: String,
    pub is_owner: Option<bool>,
    pub curb_weight: u32,
    pub completeness: Option<Completeness>,
    pub missing_parts: Option<String>,
    pub transport_method: Option<TransportMethod>,
    pub needs_tow: Option<bool>,
    pub tow_address: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub phone: String,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        self.status.can_transition_to(next)
    }

    pub fn transition_to(&mut self, next: LeadStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidLeadTransition { from: self.status, to: next })
    }

    pub fn location(&self) -> Option<String> {
        self.tow_address.clone().or_else(|| self.coordinates.map(|point| point.to_string()))
    }
}

/// A lead as shown in the operator's recent-leads list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeadOverview {
    pub lead: Lead,
    pub photo_count: u32,
}
