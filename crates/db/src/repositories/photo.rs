use sqlx::Row;

use romupunkt_core::domain::{LeadId, MediaRef, Photo};

use super::{decode_err, PhotoRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPhotoRepository {
    pool: DbPool,
}

impl SqlPhotoRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PhotoRepository for SqlPhotoRepository {
    async fn list_for_lead(&self, lead_id: LeadId) -> Result<Vec<Photo>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT lead_id, media_ref, local_path FROM photo
             WHERE lead_id = ? ORDER BY position ASC, id ASC",
        )
        .bind(lead_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Photo {
                    lead_id: LeadId(row.try_get("lead_id").map_err(decode_err)?),
                    media_ref: MediaRef(row.try_get("media_ref").map_err(decode_err)?),
                    local_path: row.try_get("local_path").map_err(decode_err)?,
                })
            })
            .collect()
    }
}
