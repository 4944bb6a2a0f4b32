use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use romupunkt_core::domain::{LeadId, MediaRef, PhotoSessionToken, UserId};

use super::{decode_err, encode_timestamp, PhotoSessionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPhotoSessionRepository {
    pool: DbPool,
}

impl SqlPhotoSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PhotoSessionRepository for SqlPhotoSessionRepository {
    async fn append(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
        media: &MediaRef,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO photo_session (user_id, session_token, media_ref, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id, session_token, media_ref) DO NOTHING",
        )
        .bind(user_id.0)
        .bind(&token.0)
        .bind(&media.0)
        .bind(encode_timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
    ) -> Result<Vec<MediaRef>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT media_ref FROM photo_session
             WHERE user_id = ? AND session_token = ?
             ORDER BY id ASC",
        )
        .bind(user_id.0)
        .bind(&token.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("media_ref").map(MediaRef).map_err(decode_err))
            .collect()
    }

    async fn count(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
    ) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM photo_session WHERE user_id = ? AND session_token = ?",
        )
        .bind(user_id.0)
        .bind(&token.0)
        .fetch_one(&self.pool)
        .await?
        .try_get("count")
        .map_err(decode_err)?;

        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn migrate_to_lead(
        &self,
        user_id: UserId,
        token: &PhotoSessionToken,
        lead_id: LeadId,
        now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let next_position: i64 =
            sqlx::query("SELECT COALESCE(MAX(position), 0) AS position FROM photo WHERE lead_id = ?")
                .bind(lead_id.0)
                .fetch_one(&mut *tx)
                .await?
                .try_get("position")
                .map_err(decode_err)?;

        let moved = sqlx::query(
            "INSERT OR IGNORE INTO photo (lead_id, media_ref, position, local_path, created_at)
             SELECT ?, media_ref, ? + ROW_NUMBER() OVER (ORDER BY id), NULL, ?
             FROM photo_session
             WHERE user_id = ? AND session_token = ?",
        )
        .bind(lead_id.0)
        .bind(next_position)
        .bind(encode_timestamp(now))
        .bind(user_id.0)
        .bind(&token.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM photo_session WHERE user_id = ? AND session_token = ?")
            .bind(user_id.0)
            .bind(&token.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let moved = usize::try_from(moved.rows_affected()).unwrap_or_default();
        debug!(
            event_name = "persistence.photo_session.migrated",
            user_id = user_id.0,
            lead_id = lead_id.0,
            moved,
            "photo session migrated to lead"
        );
        Ok(moved)
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM photo_session WHERE created_at < ?")
            .bind(encode_timestamp(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use romupunkt_core::domain::{MediaRef, PhotoSessionToken, UserId};

    use super::SqlPhotoSessionRepository;
    use crate::repositories::test_support::{draft, migrated_pool};
    use crate::repositories::{
        LeadRepository, PhotoRepository, PhotoSessionRepository, SqlLeadRepository,
        SqlPhotoRepository,
    };

    fn media(id: &str) -> MediaRef {
        MediaRef(id.to_owned())
    }

    #[tokio::test]
    async fn redelivered_reference_does_not_increase_count() {
        let sessions = SqlPhotoSessionRepository::new(migrated_pool().await);
        let token = PhotoSessionToken::generate();
        let user = UserId(1001);

        assert!(sessions.append(user, &token, &media("p1"), Utc::now()).await.expect("append"));
        assert!(!sessions.append(user, &token, &media("p1"), Utc::now()).await.expect("again"));

        assert_eq!(sessions.count(user, &token).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn sessions_are_scoped_by_user_and_token() {
        let sessions = SqlPhotoSessionRepository::new(migrated_pool().await);
        let token = PhotoSessionToken::generate();
        let other = PhotoSessionToken::generate();

        sessions.append(UserId(1), &token, &media("p1"), Utc::now()).await.expect("append");
        sessions.append(UserId(2), &token, &media("p1"), Utc::now()).await.expect("append");
        sessions.append(UserId(1), &other, &media("p2"), Utc::now()).await.expect("append");

        assert_eq!(sessions.list(UserId(1), &token).await.expect("list"), vec![media("p1")]);
        assert_eq!(sessions.count(UserId(2), &token).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn migration_moves_every_reference_and_drops_session() {
        let pool = migrated_pool().await;
        let leads = SqlLeadRepository::new(pool.clone());
        let photos = SqlPhotoRepository::new(pool.clone());
        let sessions = SqlPhotoSessionRepository::new(pool);
        let token = PhotoSessionToken::generate();
        let user = UserId(1001);

        for id in ["p1", "p2", "p3"] {
            sessions.append(user, &token, &media(id), Utc::now()).await.expect("append");
        }
        let lead =
            leads.create(&draft(1001, "123 ABC", "+37251234567"), Utc::now()).await.expect("lead");

        let moved = sessions.migrate_to_lead(user, &token, lead.id, Utc::now()).await.expect("migrate");

        assert_eq!(moved, 3);
        let stored = photos.list_for_lead(lead.id).await.expect("photos");
        let refs: Vec<_> = stored.iter().map(|photo| photo.media_ref.0.as_str()).collect();
        assert_eq!(refs, vec!["p1", "p2", "p3"]);
        assert_eq!(sessions.count(user, &token).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn second_migration_is_a_no_op() {
        let pool = migrated_pool().await;
        let leads = SqlLeadRepository::new(pool.clone());
        let photos = SqlPhotoRepository::new(pool.clone());
        let sessions = SqlPhotoSessionRepository::new(pool);
        let token = PhotoSessionToken::generate();
        let user = UserId(1001);

        sessions.append(user, &token, &media("p1"), Utc::now()).await.expect("append");
        let lead =
            leads.create(&draft(1001, "123 ABC", "+37251234567"), Utc::now()).await.expect("lead");

        sessions.migrate_to_lead(user, &token, lead.id, Utc::now()).await.expect("migrate");
        let again = sessions.migrate_to_lead(user, &token, lead.id, Utc::now()).await.expect("again");

        assert_eq!(again, 0);
        assert_eq!(photos.list_for_lead(lead.id).await.expect("photos").len(), 1);
    }

    #[tokio::test]
    async fn prune_removes_only_stale_rows() {
        let sessions = SqlPhotoSessionRepository::new(migrated_pool().await);
        let token = PhotoSessionToken::generate();
        let now = Utc::now();

        sessions
            .append(UserId(1), &token, &media("old"), now - Duration::hours(80))
            .await
            .expect("append old");
        sessions.append(UserId(1), &token, &media("new"), now).await.expect("append new");

        let pruned = sessions.prune_older_than(now - Duration::hours(72)).await.expect("prune");

        assert_eq!(pruned, 1);
        assert_eq!(sessions.list(UserId(1), &token).await.expect("list"), vec![media("new")]);
    }
}
