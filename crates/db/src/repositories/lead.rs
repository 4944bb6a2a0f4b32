use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

use romupunkt_core::domain::{
    Completeness, Coordinates, Lead, LeadDraft, LeadId, LeadOverview, LeadStatus, Locale,
    TransportMethod, UserId,
};

use super::{
    decode_err, decode_timestamp, encode_timestamp, CreateOutcome, LeadRepository, RepositoryError,
    StatusChange,
};
use crate::DbPool;

pub(crate) const LEAD_COLUMNS: &str = "id, user_id, username, locale, plate, owner_name, \
     is_owner, curb_weight, completeness, missing_parts, transport_method, needs_tow, \
     tow_address, latitude, longitude, phone, status, created_at, updated_at";

const INSERT_COLUMNS: &str = "user_id, username, locale, plate, owner_name, is_owner, \
     curb_weight, completeness, missing_parts, transport_method, needs_tow, tow_address, \
     latitude, longitude, phone, status, created_at, updated_at";

const INSERT_VALUES: &str = "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: LeadId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM lead WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn created(&self, id: LeadId) -> Result<Lead, RepositoryError> {
        self.find(id).await?.ok_or_else(|| RepositoryError::NotFound(format!("lead {id}")))
    }
}

/// Binds the draft in `INSERT_COLUMNS` order.
fn bind_draft<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    draft: &'q LeadDraft,
    timestamp: &'q str,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(draft.user_id.0)
        .bind(&draft.username)
        .bind(draft.locale.as_str())
        .bind(&draft.plate)
        .bind(&draft.owner_name)
        .bind(draft.is_owner)
        .bind(i64::from(draft.curb_weight))
        .bind(draft.completeness.map(Completeness::as_str))
        .bind(&draft.missing_parts)
        .bind(draft.transport_method.as_str())
        .bind(draft.needs_tow())
        .bind(&draft.tow_address)
        .bind(draft.coordinates.map(|point| point.latitude))
        .bind(draft.coordinates.map(|point| point.longitude))
        .bind(&draft.phone)
        .bind(timestamp)
        .bind(timestamp)
}

fn parse_column<T: FromStr<Err = String>>(column: &str, value: &str) -> Result<T, RepositoryError> {
    value.parse::<T>().map_err(|reason| RepositoryError::Decode(format!("{column}: {reason}")))
}

pub(crate) fn row_to_lead(row: &SqliteRow) -> Result<Lead, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_err)?;
    let user_id: i64 = row.try_get("user_id").map_err(decode_err)?;
    let username: Option<String> = row.try_get("username").map_err(decode_err)?;
    let locale: String = row.try_get("locale").map_err(decode_err)?;
    let plate: String = row.try_get("plate").map_err(decode_err)?;
    let owner_name: String = row.try_get("owner_name").map_err(decode_err)?;
    let is_owner: Option<bool> = row.try_get("is_owner").map_err(decode_err)?;
    let curb_weight: i64 = row.try_get("curb_weight").map_err(decode_err)?;
    let completeness: Option<String> = row.try_get("completeness").map_err(decode_err)?;
    let missing_parts: Option<String> = row.try_get("missing_parts").map_err(decode_err)?;
    let transport_method: Option<String> = row.try_get("transport_method").map_err(decode_err)?;
    let needs_tow: Option<bool> = row.try_get("needs_tow").map_err(decode_err)?;
    let tow_address: Option<String> = row.try_get("tow_address").map_err(decode_err)?;
    let latitude: Option<f64> = row.try_get("latitude").map_err(decode_err)?;
    let longitude: Option<f64> = row.try_get("longitude").map_err(decode_err)?;
    let phone: String = row.try_get("phone").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    let coordinates = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
        _ => None,
    };

    Ok(Lead {
        id: LeadId(id),
        user_id: UserId(user_id),
        username,
        locale: parse_column::<Locale>("locale", &locale)?,
        plate,
        owner_name,
        is_owner,
        curb_weight: u32::try_from(curb_weight)
            .map_err(|_| RepositoryError::Decode(format!("curb_weight {curb_weight}")))?,
        completeness: completeness
            .as_deref()
            .map(|value| parse_column::<Completeness>("completeness", value))
            .transpose()?,
        missing_parts,
        transport_method: transport_method
            .as_deref()
            .map(|value| parse_column::<TransportMethod>("transport_method", value))
            .transpose()?,
        needs_tow,
        tow_address,
        coordinates,
        phone,
        status: parse_column::<LeadStatus>("status", &status)?,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn create(&self, draft: &LeadDraft, now: DateTime<Utc>) -> Result<Lead, RepositoryError> {
        let timestamp = encode_timestamp(now);
        let sql = format!("INSERT INTO lead ({INSERT_COLUMNS}) VALUES ({INSERT_VALUES})");
        let result = bind_draft(sqlx::query(&sql), draft, &timestamp).execute(&self.pool).await?;

        self.created(LeadId(result.last_insert_rowid())).await
    }

    async fn create_unless_recent(
        &self,
        draft: &LeadDraft,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CreateOutcome, RepositoryError> {
        let timestamp = encode_timestamp(now);
        let cutoff = encode_timestamp(since);
        let sql = format!(
            "INSERT INTO lead ({INSERT_COLUMNS})
             SELECT {INSERT_VALUES}
             WHERE NOT EXISTS (
                 SELECT 1 FROM lead
                 WHERE user_id = ? AND plate = ? AND phone = ? AND created_at >= ?
             )"
        );
        let result = bind_draft(sqlx::query(&sql), draft, &timestamp)
            .bind(draft.user_id.0)
            .bind(&draft.plate)
            .bind(&draft.phone)
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(CreateOutcome::Created(self.created(LeadId(result.last_insert_rowid())).await?));
        }
        self.find_recent_duplicate(draft.user_id, &draft.plate, &draft.phone, since)
            .await?
            .map(CreateOutcome::Duplicate)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("recent lead for user {}", draft.user_id.0))
            })
    }

    async fn find(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_lead).transpose()
    }

    async fn find_recent_duplicate(
        &self,
        user_id: UserId,
        plate: &str,
        phone: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead
             WHERE user_id = ? AND plate = ? AND phone = ?
             ORDER BY id DESC
             LIMIT 1"
        ))
        .bind(user_id.0)
        .bind(plate)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        let latest = row.as_ref().map(row_to_lead).transpose()?;
        Ok(latest.filter(|lead| lead.created_at >= since))
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<LeadOverview>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS},
                    (SELECT COUNT(*) FROM photo WHERE photo.lead_id = lead.id) AS photo_count
             FROM lead
             ORDER BY id DESC
             LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let photo_count: i64 = row.try_get("photo_count").map_err(decode_err)?;
                Ok(LeadOverview {
                    lead: row_to_lead(row)?,
                    photo_count: u32::try_from(photo_count).unwrap_or(u32::MAX),
                })
            })
            .collect()
    }

    async fn update_status(
        &self,
        id: LeadId,
        change: StatusChange<LeadStatus>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE lead SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(change.to.as_str())
                .bind(encode_timestamp(now))
                .bind(id.0)
                .bind(change.from.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if !self.exists(id).await? {
            return Err(RepositoryError::NotFound(format!("lead {id}")));
        }
        Ok(false)
    }

    async fn claim_operator_card(
        &self,
        id: LeadId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE lead SET operator_notified_at = ?
             WHERE id = ? AND operator_notified_at IS NULL",
        )
        .bind(encode_timestamp(now))
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_cascade(&self, id: LeadId) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM photo WHERE lead_id = ?").bind(id.0).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM offer WHERE lead_id = ?").bind(id.0).execute(&mut *tx).await?;
        let deleted =
            sqlx::query("DELETE FROM lead WHERE id = ?").bind(id.0).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(deleted.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use romupunkt_core::domain::{Coordinates, LeadId, LeadStatus, TransportMethod, UserId};

    use super::SqlLeadRepository;
    use crate::repositories::test_support::{draft, migrated_pool};
    use crate::repositories::{CreateOutcome, LeadRepository, RepositoryError, StatusChange};

    #[tokio::test]
    async fn create_then_find_preserves_every_field() {
        let repo = SqlLeadRepository::new(migrated_pool().await);
        let mut input = draft(1001, "123 ABC", "+37251234567");
        input.transport_method = TransportMethod::Tow;
        input.coordinates = Some(Coordinates { latitude: 59.437, longitude: 24.7536 });
        input.tow_address = Some("59.437, 24.7536".to_owned());

        let created = repo.create(&input, Utc::now()).await.expect("create lead");
        let found = repo.find(created.id).await.expect("find lead").expect("lead exists");

        assert_eq!(found, created);
        assert_eq!(found.status, LeadStatus::Pending);
        assert_eq!(found.needs_tow, Some(true));
        assert_eq!(found.transport_method, Some(TransportMethod::Tow));
        assert_eq!(found.coordinates, input.coordinates);
        assert_eq!(found.is_owner, Some(true));
    }

    #[tokio::test]
    async fn schema_rejects_out_of_range_weight() {
        let repo = SqlLeadRepository::new(migrated_pool().await);
        let mut input = draft(1001, "123 ABC", "+37251234567");
        input.curb_weight = 100;

        let error = repo.create(&input, Utc::now()).await.expect_err("check constraint");
        assert!(matches!(error, RepositoryError::Database(_)));
    }

    #[tokio::test]
    async fn duplicate_lookup_respects_window_and_identity() {
        let repo = SqlLeadRepository::new(migrated_pool().await);
        let now = Utc::now();
        let created = repo
            .create(&draft(1001, "123 ABC", "+37251234567"), now)
            .await
            .expect("create lead");

        let hit = repo
            .find_recent_duplicate(UserId(1001), "123 ABC", "+37251234567", now - Duration::seconds(120))
            .await
            .expect("lookup");
        assert_eq!(hit.map(|lead| lead.id), Some(created.id));

        let other_phone = repo
            .find_recent_duplicate(UserId(1001), "123 ABC", "+37259999999", now - Duration::seconds(120))
            .await
            .expect("lookup");
        assert!(other_phone.is_none());

        let other_user = repo
            .find_recent_duplicate(UserId(2002), "123 ABC", "+37251234567", now - Duration::seconds(120))
            .await
            .expect("lookup");
        assert!(other_user.is_none());

        let expired = repo
            .find_recent_duplicate(UserId(1001), "123 ABC", "+37251234567", now + Duration::seconds(1))
            .await
            .expect("lookup");
        assert!(expired.is_none());
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_with_limit() {
        let repo = SqlLeadRepository::new(migrated_pool().await);
        for plate in ["AAA 111", "BBB 222", "CCC 333"] {
            repo.create(&draft(1001, plate, "+37251234567"), Utc::now()).await.expect("create");
        }

        let recent = repo.list_recent(2).await.expect("list");

        let plates: Vec<_> = recent.iter().map(|item| item.lead.plate.as_str()).collect();
        assert_eq!(plates, vec!["CCC 333", "BBB 222"]);
        assert!(recent.iter().all(|item| item.photo_count == 0));
    }

    #[tokio::test]
    async fn update_status_of_missing_lead_is_not_found() {
        let repo = SqlLeadRepository::new(migrated_pool().await);
        let error = repo
            .update_status(
                LeadId(404),
                StatusChange::new(LeadStatus::Pending, LeadStatus::Archived),
                Utc::now(),
            )
            .await
            .expect_err("missing lead");
        assert!(matches!(error, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_write_from_a_stale_status_is_refused() {
        let repo = SqlLeadRepository::new(migrated_pool().await);
        let lead =
            repo.create(&draft(1001, "123 ABC", "+37251234567"), Utc::now()).await.expect("create");
        let archive = StatusChange::new(LeadStatus::Pending, LeadStatus::Archived);

        assert!(repo.update_status(lead.id, archive, Utc::now()).await.expect("first write"));
        let replied = StatusChange::new(LeadStatus::Pending, LeadStatus::Replied);
        assert!(!repo.update_status(lead.id, replied, Utc::now()).await.expect("stale write"));

        let stored = repo.find(lead.id).await.expect("find").expect("lead");
        assert_eq!(stored.status, LeadStatus::Archived);
    }

    #[tokio::test]
    async fn create_unless_recent_inserts_once_per_window() {
        let repo = SqlLeadRepository::new(migrated_pool().await);
        let now = Utc::now();
        let input = draft(1001, "123 ABC", "+37251234567");

        let first = repo
            .create_unless_recent(&input, now - Duration::seconds(120), now)
            .await
            .expect("first");
        let second = repo
            .create_unless_recent(&input, now - Duration::seconds(120), now + Duration::seconds(5))
            .await
            .expect("second");
        let later = now + Duration::seconds(300);
        let third = repo
            .create_unless_recent(&input, later - Duration::seconds(120), later)
            .await
            .expect("third");

        let CreateOutcome::Created(created) = first else { panic!("first insert should create") };
        assert_eq!(second, CreateOutcome::Duplicate(created.clone()));
        assert!(matches!(third, CreateOutcome::Created(ref lead) if lead.id != created.id));
        assert_eq!(repo.list_recent(10).await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn operator_card_is_claimed_once() {
        let repo = SqlLeadRepository::new(migrated_pool().await);
        let lead =
            repo.create(&draft(1001, "123 ABC", "+37251234567"), Utc::now()).await.expect("create");

        assert!(repo.claim_operator_card(lead.id, Utc::now()).await.expect("claim"));
        assert!(!repo.claim_operator_card(lead.id, Utc::now()).await.expect("second claim"));
        assert!(!repo.claim_operator_card(LeadId(404), Utc::now()).await.expect("missing lead"));
    }

    #[tokio::test]
    async fn delete_cascade_reports_absence() {
        let repo = SqlLeadRepository::new(migrated_pool().await);
        let created =
            repo.create(&draft(1001, "123 ABC", "+37251234567"), Utc::now()).await.expect("create");

        assert!(repo.delete_cascade(created.id).await.expect("delete"));
        assert!(!repo.delete_cascade(created.id).await.expect("second delete"));
        assert!(repo.find(created.id).await.expect("find").is_none());
    }
}
