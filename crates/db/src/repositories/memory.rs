use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use romupunkt_core::domain::{
    Lead, LeadDraft, LeadId, LeadOverview, LeadStatus, MediaRef, Offer, OfferId, OfferStatus,
    Photo, PhotoSessionToken, UserId,
};

use super::{
    CreateOutcome, LeadRepository, OfferRepository, PhotoRepository, PhotoSessionRepository,
    RepositoryError, StatusChange,
};

#[derive(Default)]
struct MemoryState {
    next_lead_id: i64,
    next_offer_id: i64,
    leads: HashMap<i64, Lead>,
    notified: HashSet<LeadId>,
    offers: Vec<Offer>,
    photos: Vec<Photo>,
    sessions: Vec<SessionPhoto>,
}

struct SessionPhoto {
    user_id: UserId,
    token: PhotoSessionToken,
    media: MediaRef,
    created_at: DateTime<Utc>,
}

/// Process-local store behind all four repository traits.
///
/// One lock guards every table, so multi-row operations are atomic the same way
/// a SQLite transaction is.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

impl MemoryState {
    fn insert_lead(&mut self, draft: &LeadDraft, now: DateTime<Utc>) -> Lead {
        self.next_lead_id += 1;
        let lead = Lead {
            id: LeadId(self.next_lead_id),
            user_id: draft.user_id,
            username: draft.username.clone(),
            locale: draft.locale,
            plate: draft.plate.clone(),
            owner_name: draft.owner_name.clone(),
            is_owner: draft.is_owner,
            curb_weight: draft.curb_weight,
            completeness: draft.completeness,
            missing_parts: draft.missing_parts.clone(),
            transport_method: Some(draft.transport_method),
            needs_tow: Some(draft.needs_tow()),
            tow_address: draft.tow_address.clone(),
            coordinates: draft.coordinates,
            phone: draft.phone.clone(),
            status: LeadStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.leads.insert(lead.id.0, lead.clone());
        lead
    }

    fn recent_duplicate(
        &self,
        user_id: UserId,
        plate: &str,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Option<Lead> {
        self.leads
            .values()
            .filter(|lead| lead.user_id == user_id && lead.plate == plate && lead.phone == phone)
            .max_by_key(|lead| lead.id.0)
            .filter(|lead| lead.created_at >= since)
            .cloned()
    }
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryStore {
    async fn create(&self, draft: &LeadDraft, now: DateTime<Utc>) -> Result<Lead, RepositoryError> {
        self.check_available()?;
        Ok(self.state.write().await.insert_lead(draft, now))
    }

    async fn create_unless_recent(
        &self,
        draft: &LeadDraft,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CreateOutcome, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if let Some(lead) = state.recent_duplicate(draft.user_id, &draft.plate, &draft.phone, since) {
            return Ok(CreateOutcome::Duplicate(lead));
        }
        Ok(CreateOutcome::Created(state.insert_lead(draft, now)))
    }

    async fn find(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.read().await.leads.get(&id.0).cloned())
    }

    async fn find_recent_duplicate(
        &self,
        user_id: UserId,
        plate: &str,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Lead>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.read().await.recent_duplicate(user_id, plate, phone, since))
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<LeadOverview>, RepositoryError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut leads: Vec<&Lead> = state.leads.values().collect();
        leads.sort_by_key(|lead| std::cmp::Reverse(lead.id.0));

        Ok(leads
            .into_iter()
            .take(limit as usize)
            .map(|lead| {
                let photo_count =
                    state.photos.iter().filter(|photo| photo.lead_id == lead.id).count();
                LeadOverview {
                    lead: lead.clone(),
                    photo_count: u32::try_from(photo_count).unwrap_or(u32::MAX),
                }
            })
            .collect())
    }

    async fn update_status(
        &self,
        id: LeadId,
        change: StatusChange<LeadStatus>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let lead = state
            .leads
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("lead {id}")))?;
        if lead.status != change.from {
            return Ok(false);
        }
        lead.status = change.to;
        lead.updated_at = now;
        Ok(true)
    }

    async fn claim_operator_card(
        &self,
        id: LeadId,
        _now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !state.leads.contains_key(&id.0) {
            return Ok(false);
        }
        Ok(state.notified.insert(id))
    }

    async fn delete_cascade(&self, id: LeadId) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state.photos.retain(|photo| photo.lead_id != id);
        state.offers.retain(|offer| offer.lead_id != id);
        state.notified.remove(&id);
        Ok(state.leads.remove(&id.0).is_some())
    }
}

#[async_trait::async_trait]
impl OfferRepository for InMemoryStore {
    async fn create(
        &self,
        lead_id: LeadId,
        amount: Decimal,
        lead_from: LeadStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Offer>, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let lead = state
            .leads
            .get_mut(&lead_id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("lead {lead_id}")))?;
        if lead.status != lead_from {
            return Ok(None);
        }
        lead.status = LeadStatus::Replied;
        lead.updated_at = now;

        for open in state
            .offers
            .iter_mut()
            .filter(|offer| offer.lead_id == lead_id && offer.status == OfferStatus::Sent)
        {
            open.status = OfferStatus::Withdrawn;
        }

        state.next_offer_id += 1;
        let offer = Offer {
            id: OfferId(state.next_offer_id),
            lead_id,
            amount,
            status: OfferStatus::Sent,
            created_at: now,
        };
        state.offers.push(offer.clone());
        Ok(Some(offer))
    }

    async fn find(&self, id: OfferId) -> Result<Option<Offer>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.read().await.offers.iter().find(|offer| offer.id == id).cloned())
    }

    async fn update_status(
        &self,
        id: OfferId,
        offer: StatusChange<OfferStatus>,
        lead: StatusChange<LeadStatus>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let MemoryState { leads, offers, .. } = &mut *state;
        let stored = offers
            .iter_mut()
            .find(|stored| stored.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("offer {id}")))?;
        let Some(owner) = leads.get_mut(&stored.lead_id.0) else {
            return Ok(false);
        };
        if stored.status != offer.from || owner.status != lead.from {
            return Ok(false);
        }

        stored.status = offer.to;
        owner.status = lead.to;
        owner.updated_at = now;
        Ok(true)
    }

    async fn list_for_lead(&self, lead_id: LeadId) -> Result<Vec<Offer>, RepositoryError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.offers.iter().filter(|offer| offer.lead_id == lead_id).cloned().collect())
    }
}

#[async_trait::async_trait]
impl PhotoRepository for InMemoryStore {
    async fn list_for_lead(&self, lead_id: LeadId) -> Result<Vec<Photo>, RepositoryError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.photos.iter().filter(|photo| photo.lead_id == lead_id).cloned().collect())
    }
}

#[async_trait::async_trait]
impl PhotoSessionRepository for InMemoryStore {
    async fn append(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
        media: &MediaRef,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let exists = state.sessions.iter().any(|row| {
            row.user_id == user_id && &row.token == token && &row.media == media
        });
        if exists {
            return Ok(false);
        }
        state.sessions.push(SessionPhoto {
            user_id,
            token: token.clone(),
            media: media.clone(),
            created_at: now,
        });
        Ok(true)
    }

    async fn list(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
    ) -> Result<Vec<MediaRef>, RepositoryError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .sessions
            .iter()
            .filter(|row| row.user_id == user_id && &row.token == token)
            .map(|row| row.media.clone())
            .collect())
    }

    async fn count(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
    ) -> Result<usize, RepositoryError> {
        Ok(self.list(user_id, token).await?.len())
    }

    async fn migrate_to_lead(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
        lead_id: LeadId,
        _now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let (moving, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.sessions)
            .into_iter()
            .partition(|row| row.user_id == user_id && &row.token == token);
        state.sessions = kept;

        let mut moved = 0;
        for row in moving {
            let duplicate = state
                .photos
                .iter()
                .any(|photo| photo.lead_id == lead_id && photo.media_ref == row.media);
            if !duplicate {
                state.photos.push(Photo { lead_id, media_ref: row.media, local_path: None });
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|row| row.created_at >= cutoff);
        Ok((before - state.sessions.len()) as u64)
    }
}
