use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use romupunkt_core::domain::{LeadId, LeadStatus, Offer, OfferId, OfferStatus};

use super::{
    decode_err, decode_timestamp, encode_timestamp, OfferRepository, RepositoryError, StatusChange,
};
use crate::DbPool;

pub struct SqlOfferRepository {
    pool: DbPool,
}

impl SqlOfferRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_offer(row: &SqliteRow) -> Result<Offer, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_err)?;
    let lead_id: i64 = row.try_get("lead_id").map_err(decode_err)?;
    let amount: String = row.try_get("amount").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(Offer {
        id: OfferId(id),
        lead_id: LeadId(lead_id),
        amount: Decimal::from_str(&amount)
            .map_err(|error| RepositoryError::Decode(format!("amount `{amount}`: {error}")))?,
        status: status.parse::<OfferStatus>().map_err(RepositoryError::Decode)?,
        created_at: decode_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl OfferRepository for SqlOfferRepository {
    async fn create(
        &self,
        lead_id: LeadId,
        amount: Decimal,
        lead_from: LeadStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Offer>, RepositoryError> {
        let timestamp = encode_timestamp(now);
        let mut tx = self.pool.begin().await?;

        let updated =
            sqlx::query("UPDATE lead SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(LeadStatus::Replied.as_str())
                .bind(&timestamp)
                .bind(lead_id.0)
                .bind(lead_from.as_str())
                .execute(&mut *tx)
                .await?;
        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM lead WHERE id = ?")
                .bind(lead_id.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if !exists {
                return Err(RepositoryError::NotFound(format!("lead {lead_id}")));
            }
            return Ok(None);
        }

        sqlx::query(
            "UPDATE offer SET status = ?, updated_at = ? WHERE lead_id = ? AND status = ?",
        )
        .bind(OfferStatus::Withdrawn.as_str())
        .bind(&timestamp)
        .bind(lead_id.0)
        .bind(OfferStatus::Sent.as_str())
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            "INSERT INTO offer (lead_id, amount, status, created_at, updated_at)
             VALUES (?, ?, 'sent', ?, ?)",
        )
        .bind(lead_id.0)
        .bind(amount.to_string())
        .bind(&timestamp)
        .bind(&timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(Offer {
            id: OfferId(inserted.last_insert_rowid()),
            lead_id,
            amount,
            status: OfferStatus::Sent,
            created_at: decode_timestamp(&timestamp)?,
        }))
    }

    async fn find(&self, id: OfferId) -> Result<Option<Offer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, lead_id, amount, status, created_at FROM offer WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_offer).transpose()
    }

    async fn update_status(
        &self,
        id: OfferId,
        offer: StatusChange<OfferStatus>,
        lead: StatusChange<LeadStatus>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let timestamp = encode_timestamp(now);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE offer SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(offer.to.as_str())
        .bind(&timestamp)
        .bind(id.0)
        .bind(offer.from.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM offer WHERE id = ?")
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if !exists {
                return Err(RepositoryError::NotFound(format!("offer {id}")));
            }
            return Ok(false);
        }

        let updated = sqlx::query(
            "UPDATE lead SET status = ?, updated_at = ?
             WHERE id = (SELECT lead_id FROM offer WHERE id = ?) AND status = ?",
        )
        .bind(lead.to.as_str())
        .bind(&timestamp)
        .bind(id.0)
        .bind(lead.from.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_for_lead(&self, lead_id: LeadId) -> Result<Vec<Offer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, lead_id, amount, status, created_at FROM offer
             WHERE lead_id = ? ORDER BY id ASC",
        )
        .bind(lead_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_offer).collect()
    }
}
