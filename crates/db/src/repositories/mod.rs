use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use romupunkt_core::domain::{
    Lead, LeadDraft, LeadId, LeadOverview, LeadStatus, MediaRef, Offer, OfferId, OfferStatus,
    Photo, PhotoSessionToken, UserId,
};
use romupunkt_core::errors::ApplicationError;

pub mod lead;
pub mod memory;
pub mod offer;
pub mod photo;
pub mod photo_session;

pub use lead::SqlLeadRepository;
pub use memory::InMemoryStore;
pub use offer::SqlOfferRepository;
pub use photo::SqlPhotoRepository;
pub use photo_session::SqlPhotoSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{0} not found")]
    NotFound(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

/// A status write that only lands while the row still holds `from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusChange<S> {
    pub from: S,
    pub to: S,
}

impl<S> StatusChange<S> {
    pub fn new(from: S, to: S) -> Self {
        Self { from, to }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CreateOutcome {
    Created(Lead),
    /// A matching lead already existed inside the window; nothing was inserted.
    Duplicate(Lead),
}

impl CreateOutcome {
    pub fn lead(&self) -> &Lead {
        match self {
            Self::Created(lead) | Self::Duplicate(lead) => lead,
        }
    }
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn create(&self, draft: &LeadDraft, now: DateTime<Utc>) -> Result<Lead, RepositoryError>;

    /// Inserts the draft unless the same user already submitted the same plate
    /// and phone at or after `since`. Check and insert happen atomically.
    async fn create_unless_recent(
        &self,
        draft: &LeadDraft,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CreateOutcome, RepositoryError>;

    async fn find(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError>;

    /// Newest lead by `user_id` with the same plate and phone created at or after `since`.
    async fn find_recent_duplicate(
        &self,
        user_id: UserId,
        plate: &str,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Lead>, RepositoryError>;

    /// Newest first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<LeadOverview>, RepositoryError>;

    /// Returns false when the lead exists but no longer holds `change.from`.
    async fn update_status(
        &self,
        id: LeadId,
        change: StatusChange<LeadStatus>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Marks the operator card for this lead as sent. Only the first caller
    /// gets `true`.
    async fn claim_operator_card(&self, id: LeadId, now: DateTime<Utc>)
        -> Result<bool, RepositoryError>;

    /// Removes the lead with its photos and offers. Returns false when it did not exist.
    async fn delete_cascade(&self, id: LeadId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait OfferRepository: Send + Sync {
    /// Withdraws the lead's open offers, stores a new `sent` one and moves the
    /// lead from `lead_from` to `replied`, in one transaction. Returns `None`
    /// when the lead no longer holds `lead_from`.
    async fn create(
        &self,
        lead_id: LeadId,
        amount: Decimal,
        lead_from: LeadStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Offer>, RepositoryError>;

    async fn find(&self, id: OfferId) -> Result<Option<Offer>, RepositoryError>;

    /// Resolves an offer and sets its lead's status in one transaction. Returns
    /// false, writing nothing, when either row has moved on from its `from`.
    async fn update_status(
        &self,
        id: OfferId,
        offer: StatusChange<OfferStatus>,
        lead: StatusChange<LeadStatus>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Oldest first.
    async fn list_for_lead(&self, lead_id: LeadId) -> Result<Vec<Offer>, RepositoryError>;
}

#[async_trait]
pub trait PhotoRepository: Send + Sync {
    async fn list_for_lead(&self, lead_id: LeadId) -> Result<Vec<Photo>, RepositoryError>;
}

#[async_trait]
pub trait PhotoSessionRepository: Send + Sync {
    /// Returns false when the reference was already stored for this session.
    async fn append(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
        media: &MediaRef,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn list(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
    ) -> Result<Vec<MediaRef>, RepositoryError>;

    async fn count(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
    ) -> Result<usize, RepositoryError>;

    /// Copies the session's references onto the lead as photos and deletes the
    /// session rows, atomically. Returns how many photos the lead gained.
    async fn migrate_to_lead(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
        lead_id: LeadId,
        now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{value}`: {error}")))
}

pub(crate) fn decode_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use romupunkt_core::domain::{LeadDraft, Locale, TransportMethod, UserId};

    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    pub fn draft(user: i64, plate: &str, phone: &str) -> LeadDraft {
        LeadDraft {
            user_id: UserId(user),
            username: Some("jaan".to_owned()),
            locale: Locale::Ee,
            plate: plate.to_owned(),
            owner_name: "Jaan".to_owned(),
            is_owner: Some(true),
            curb_weight: 1500,
            completeness: None,
            missing_parts: None,
            transport_method: TransportMethod::SelfDelivery,
            tow_address: None,
            coordinates: None,
            phone: phone.to_owned(),
            photo_session: None,
        }
    }
}
