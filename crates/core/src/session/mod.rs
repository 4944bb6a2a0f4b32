//! Per-user conversation state held in memory. Nothing here survives a
//! restart; a user whose session is gone simply starts over.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::conversation::Stage;
use crate::domain::lead::UserId;
use crate::negotiation::PendingAction;

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub stage: Stage,
    pub pending: PendingAction,
    pub touched_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self { stage: Stage::Idle, pending: PendingAction::None, touched_at: Utc::now() }
    }
}

impl Session {
    /// Drops the stage, every scratch field and the pending slot.
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.pending = PendingAction::None;
        self.touched_at = Utc::now();
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.touched_at = now;
    }

    pub fn is_at_rest(&self) -> bool {
        matches!(self.stage, Stage::Idle) && !self.pending.is_open()
    }
}

/// Sessions keyed by user, each behind its own async mutex so that one user's
/// events serialize without blocking anyone else.
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    cells: Arc<DashMap<UserId, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `user_id`'s session, creating it on first use.
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<Session> {
        let cell = self.cells.entry(user_id).or_default().value().clone();
        cell.lock_owned().await
    }

    pub async fn snapshot(&self, user_id: UserId) -> Option<Session> {
        let cell = self.cells.get(&user_id).map(|entry| entry.value().clone())?;
        let session = cell.lock().await;
        Some(session.clone())
    }

    pub async fn clear(&self, user_id: UserId) {
        let Some(cell) = self.cells.get(&user_id).map(|entry| entry.value().clone()) else {
            return;
        };
        cell.lock().await.reset();
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Forgets sessions that are at rest or untouched for longer than `max_age`.
    /// A session that is locked or about to be locked is never dropped.
    pub fn evict_stale(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now.checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.cells.len();

        self.cells.retain(|_, cell| {
            if Arc::strong_count(cell) > 1 {
                return true;
            }
            match cell.try_lock() {
                Ok(session) => !(session.is_at_rest() || session.touched_at < cutoff),
                Err(_) => true,
            }
        });

        let evicted = before.saturating_sub(self.cells.len());
        if evicted > 0 {
            debug!(event_name = "session.store.evicted", evicted, "evicted stale sessions");
        }
        evicted
    }
}
