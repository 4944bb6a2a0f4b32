use serde::{Deserialize, Serialize};

use crate::domain::lead::{
    Completeness, Coordinates, LeadDraft, LeadId, Locale, TransportMethod, UserId,
};
use crate::domain::photo::{MediaRef, PhotoSessionToken};

/// Fields gathered once the owner's name is known.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OwnerDetails {
    pub locale: Locale,
    pub plate: String,
    pub owner_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleDetails {
    pub owner: OwnerDetails,
    pub is_owner: Option<bool>,
    pub curb_weight: u32,
    pub completeness: Option<Completeness>,
    pub missing_parts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportDetails {
    pub method: TransportMethod,
    pub tow_address: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhotoIntake {
    pub vehicle: VehicleDetails,
    pub transport: TransportDetails,
    pub photo_session: PhotoSessionToken,
}

impl PhotoIntake {
    pub fn into_draft(self, ctx: &StageContext, phone: String) -> LeadDraft {
        let Self { vehicle, transport, photo_session } = self;
        LeadDraft {
            user_id: ctx.user_id,
            username: ctx.username.clone(),
            locale: vehicle.owner.locale,
            plate: vehicle.owner.plate,
            owner_name: vehicle.owner.owner_name,
            is_owner: vehicle.is_owner,
            curb_weight: vehicle.curb_weight,
            completeness: vehicle.completeness,
            missing_parts: vehicle.missing_parts,
            transport_method: transport.method,
            tow_address: transport.tow_address,
            coordinates: transport.coordinates,
            phone,
            photo_session: Some(photo_session),
        }
    }
}

/// Position of one user in the intake conversation. Each variant carries exactly
/// the fields collected so far.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Idle,
    Language,
    Welcome {
        locale: Locale,
    },
    Plate {
        locale: Locale,
    },
    OwnerName {
        locale: Locale,
        plate: String,
    },
    OwnerConfirm(OwnerDetails),
    CurbWeight {
        owner: OwnerDetails,
        is_owner: Option<bool>,
    },
    Completeness(VehicleDetails),
    Logistics(VehicleDetails),
    Location(VehicleDetails),
    Photos(PhotoIntake),
    Phone {
        intake: PhotoIntake,
        country_code: Option<String>,
    },
    Finalized {
        locale: Locale,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageTag {
    Idle,
    Language,
    Welcome,
    Plate,
    OwnerName,
    OwnerConfirm,
    CurbWeight,
    Completeness,
    Logistics,
    Location,
    Photos,
    Phone,
    Finalized,
}

impl StageTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Language => "language",
            Self::Welcome => "welcome",
            Self::Plate => "plate",
            Self::OwnerName => "owner_name",
            Self::OwnerConfirm => "owner_confirm",
            Self::CurbWeight => "curb_weight",
            Self::Completeness => "completeness",
            Self::Logistics => "logistics",
            Self::Location => "location",
            Self::Photos => "photos",
            Self::Phone => "phone",
            Self::Finalized => "finalized",
        }
    }
}

impl Stage {
    pub fn tag(&self) -> StageTag {
        match self {
            Self::Idle => StageTag::Idle,
            Self::Language => StageTag::Language,
            Self::Welcome { .. } => StageTag::Welcome,
            Self::Plate { .. } => StageTag::Plate,
            Self::OwnerName { .. } => StageTag::OwnerName,
            Self::OwnerConfirm(_) => StageTag::OwnerConfirm,
            Self::CurbWeight { .. } => StageTag::CurbWeight,
            Self::Completeness(_) => StageTag::Completeness,
            Self::Logistics(_) => StageTag::Logistics,
            Self::Location(_) => StageTag::Location,
            Self::Photos(_) => StageTag::Photos,
            Self::Phone { .. } => StageTag::Phone,
            Self::Finalized { .. } => StageTag::Finalized,
        }
    }

    /// `None` until a language has been picked.
    pub fn locale(&self) -> Option<Locale> {
        match self {
            Self::Idle | Self::Language => None,
            Self::Welcome { locale }
            | Self::Plate { locale }
            | Self::OwnerName { locale, .. }
            | Self::Finalized { locale } => Some(*locale),
            Self::OwnerConfirm(owner) | Self::CurbWeight { owner, .. } => Some(owner.locale),
            Self::Completeness(vehicle) | Self::Logistics(vehicle) | Self::Location(vehicle) => {
                Some(vehicle.owner.locale)
            }
            Self::Photos(intake) | Self::Phone { intake, .. } => Some(intake.vehicle.owner.locale),
        }
    }

    /// True while the stage expects typed field input that a pending negotiation
    /// slot must not swallow.
    pub fn is_collecting(&self) -> bool {
        !matches!(self, Self::Idle | Self::Language | Self::Welcome { .. } | Self::Finalized { .. })
    }

    pub fn photo_session(&self) -> Option<&PhotoSessionToken> {
        match self {
            Self::Photos(intake) | Self::Phone { intake, .. } => Some(&intake.photo_session),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerAnswer {
    Yes,
    No,
    Skip,
}

/// A structured control choice, decoded from button data by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    Language(Locale),
    Continue,
    Owner(OwnerAnswer),
    Complete,
    Logistics(TransportMethod),
    PhotosDone,
    CountryCode(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InboundEvent {
    Text(String),
    Media(MediaRef),
    Selection(Selection),
    Location(Coordinates),
    Restart,
}

/// Runtime facts the engine reads but does not own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageContext {
    pub user_id: UserId,
    pub username: Option<String>,
    /// References already accumulated in the current photo session, oldest first.
    pub photos: Vec<MediaRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prompt {
    ChooseLanguage,
    Welcome,
    AskPlate,
    InvalidPlate,
    AskOwnerName,
    InvalidOwnerName,
    AskOwnership,
    AskCurbWeight,
    InvalidCurbWeight,
    AskCompleteness,
    AskLogistics,
    AskTowLocation,
    AskPhotos { max: usize },
    PhotoReceived { count: usize, max: usize },
    PhotoLimitReached { max: usize },
    PhotosRequired { min: usize },
    AskCountryCode,
    InvalidCountryCode,
    AskLocalNumber { country_code: String },
    InvalidPhone,
    Submitted { lead_id: LeadId },
    RetryLater,
    SessionReset,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    Prompt(Prompt),
    AppendPhoto { token: PhotoSessionToken, media: MediaRef },
    Finalize(LeadDraft),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: StageTag,
    pub to: Stage,
    pub effects: Vec<Effect>,
}

impl Transition {
    pub fn stayed(&self) -> bool {
        self.from == self.to.tag()
    }

    pub fn prompts(&self) -> impl Iterator<Item = &Prompt> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Prompt(prompt) => Some(prompt),
            _ => None,
        })
    }
}
