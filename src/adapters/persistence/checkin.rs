use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::checkin::{CheckinProfile, CheckinRepo, CheckinTx, GymQrCode},
    domain::entities::checkin_status::CheckinStatus,
};

fn row_to_profile(row: &PgRow) -> CheckinProfile {
    CheckinProfile {
        id: row.get("id"),
        user_id: row.get("user_id"),
        gym_id: row.get("gym_id"),
        qr_nonce: row.get("qr_nonce"),
        qr_issued_at: row.get("qr_issued_at"),
        status: row.get("status"),
        checkin_date: row.get("checkin_date"),
        confirmed_at: row.get("confirmed_at"),
        rejected_reason: row.get("rejected_reason"),
        face_score: row.get("face_score"),
        client_lat: row.get("client_lat"),
        client_lng: row.get("client_lng"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, user_id, gym_id, qr_nonce, qr_issued_at, status, checkin_date, confirmed_at,
    rejected_reason, face_score, client_lat, client_lng, created_at, updated_at
"#;

#[async_trait]
impl CheckinRepo for PostgresPersistence {
    async fn gym_exists(&self, gym_id: Uuid) -> AppResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM gyms WHERE id = $1) AS found")
            .bind(gym_id)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(row.get("found"))
    }

    async fn find_active_qr(&self, gym_id: Uuid, nonce: &str) -> AppResult<Option<GymQrCode>> {
        let row = sqlx::query(
            "SELECT gym_id, qr_nonce, is_active, created_at FROM gym_qr_codes \
             WHERE qr_nonce = $1 AND gym_id = $2 AND is_active",
        )
        .bind(nonce)
        .bind(gym_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.map(|row| GymQrCode {
            gym_id: row.get("gym_id"),
            qr_nonce: row.get("qr_nonce"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
        }))
    }

    async fn face_reference_url(&self, user_id: Uuid) -> AppResult<Option<String>> {
        let row = sqlx::query("SELECT face_reference_url FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(row.and_then(|row| row.get::<Option<String>, _>("face_reference_url")))
    }

    async fn has_confirmed_on(&self, user_id: Uuid, gym_id: Uuid, day: NaiveDate) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM checkins WHERE user_id = $1 AND gym_id = $2 \
             AND checkin_date = $3 AND status = $4) AS found",
        )
        .bind(user_id)
        .bind(gym_id)
        .bind(day)
        .bind(CheckinStatus::Confirmed)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.get("found"))
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> AppResult<Vec<CheckinProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM checkins WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
            SELECT_COLS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_profile).collect())
    }

    async fn begin(&self) -> AppResult<Box<dyn CheckinTx>> {
        let tx = self.pool.begin().await.map_err(AppError::from)?;
        Ok(Box::new(PgCheckinTx { tx }))
    }
}

pub struct PgCheckinTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CheckinTx for PgCheckinTx {
    async fn insert(&mut self, c: &CheckinProfile) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checkins (
                id, user_id, gym_id, qr_nonce, qr_issued_at, status, checkin_date, confirmed_at,
                rejected_reason, face_score, client_lat, client_lng, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(c.id)
        .bind(c.user_id)
        .bind(c.gym_id)
        .bind(&c.qr_nonce)
        .bind(c.qr_issued_at)
        .bind(c.status)
        .bind(c.checkin_date)
        .bind(c.confirmed_at)
        .bind(&c.rejected_reason)
        .bind(c.face_score)
        .bind(c.client_lat)
        .bind(c.client_lng)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn update(&mut self, c: &CheckinProfile) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE checkins SET
                status = $2, confirmed_at = $3, rejected_reason = $4, face_score = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(c.id)
        .bind(c.status)
        .bind(c.confirmed_at)
        .bind(&c.rejected_reason)
        .bind(c.face_score)
        .bind(c.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await.map_err(AppError::from)
    }
}
