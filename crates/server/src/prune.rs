//! Periodic cleanup of abandoned intake state: photo sessions nobody finalized
//! and in-memory sessions that went quiet.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use romupunkt_core::config::{AppConfig, MAX_PHOTO_SESSION_TTL_HOURS};
use romupunkt_core::session::SessionStore;
use romupunkt_db::{PhotoSessionRepository, RepositoryError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PruneSettings {
    /// Photo sessions and idle conversations older than this are dropped.
    pub ttl: Duration,
    pub interval: StdDuration,
}

impl PruneSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let hours = config.intake.photo_session_ttl_hours.min(MAX_PHOTO_SESSION_TTL_HOURS);
        Self {
            ttl: i64::try_from(hours)
                .ok()
                .and_then(Duration::try_hours)
                .unwrap_or_else(|| Duration::days(365)),
            interval: StdDuration::from_secs(config.runtime.prune_interval_secs),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub photo_session_rows: u64,
    pub sessions: usize,
}

/// One cleanup pass. Sessions are evicted even when the database is down.
pub async fn prune_once(
    photo_sessions: &dyn PhotoSessionRepository,
    sessions: &SessionStore,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<PruneReport, RepositoryError> {
    let evicted = sessions.evict_stale(ttl, now);
    let cutoff = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let rows = photo_sessions.prune_older_than(cutoff).await?;

    Ok(PruneReport { photo_session_rows: rows, sessions: evicted })
}

/// Runs a pass at startup and then every `settings.interval` until `cancel` fires.
pub async fn run(
    photo_sessions: Arc<dyn PhotoSessionRepository>,
    sessions: SessionStore,
    settings: PruneSettings,
    cancel: CancellationToken,
) {
    info!(
        event_name = "system.prune.started",
        ttl_hours = settings.ttl.num_hours(),
        interval_secs = settings.interval.as_secs(),
        "prune task started"
    );

    let mut interval = tokio::time::interval(settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(event_name = "system.prune.stopped", "prune task stopping");
                break;
            }
            _ = interval.tick() => {
                match prune_once(photo_sessions.as_ref(), &sessions, settings.ttl, Utc::now()).await {
                    Ok(report) if report == PruneReport::default() => {
                        debug!(event_name = "system.prune.idle", "nothing to prune");
                    }
                    Ok(report) => info!(
                        event_name = "system.prune.completed",
                        photo_session_rows = report.photo_session_rows,
                        sessions = report.sessions,
                        "pruned abandoned intake state"
                    ),
                    Err(error) => error!(
                        event_name = "system.prune.failed",
                        error = %error,
                        "photo session cleanup failed"
                    ),
                }
            }
        }
    }
}
