use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{jwt::Caller, ports::face_matcher::FaceMatcher},
    domain::entities::checkin_status::CheckinStatus,
};

pub const FACE_MISMATCH_REASON: &str = "Face mismatch";
pub const ALREADY_CHECKED_IN_REASON: &str = "User already checked in today";
const MAX_HISTORY: i64 = 100;

// ============================================================================
// Profiles
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CheckinProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub gym_id: Option<Uuid>,
    pub qr_nonce: String,
    pub qr_issued_at: DateTime<Utc>,
    pub status: CheckinStatus,
    /// UTC calendar day the attempt was made; scopes the one-per-day rule.
    pub checkin_date: NaiveDate,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub rejected_reason: Option<String>,
    pub face_score: Option<f64>,
    pub client_lat: Option<f64>,
    pub client_lng: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckinProfile {
    fn provisional(
        user_id: Uuid,
        qr: &GymQrCode,
        client_lat: Option<f64>,
        client_lng: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            gym_id: Some(qr.gym_id),
            qr_nonce: qr.qr_nonce.clone(),
            qr_issued_at: qr.created_at,
            status: CheckinStatus::Provisional,
            checkin_date: now.date_naive(),
            confirmed_at: None,
            rejected_reason: None,
            face_score: None,
            client_lat,
            client_lng,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: CheckinStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "illegal checkin transition {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Applies a similarity score: at or above `threshold` confirms, anything lower rejects.
    fn apply_score(&mut self, score: f64, threshold: f64, now: DateTime<Utc>) -> AppResult<()> {
        self.face_score = Some(score);
        if score >= threshold {
            self.transition(CheckinStatus::Confirmed, now)?;
            self.confirmed_at = Some(now);
        } else {
            self.transition(CheckinStatus::Rejected, now)?;
            self.rejected_reason = Some(FACE_MISMATCH_REASON.to_string());
        }
        Ok(())
    }

    fn reject(&mut self, reason: String, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(CheckinStatus::Rejected, now)?;
        self.rejected_reason = Some(reason);
        Ok(())
    }
}

/// Active QR nonce of a gym, owned by the QR issuance service.
#[derive(Debug, Clone)]
pub struct GymQrCode {
    pub gym_id: Uuid,
    pub qr_nonce: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CheckinRequest {
    pub gym_id: Uuid,
    pub qr_nonce: String,
    pub face_image_base64: String,
    pub client_lat: Option<f64>,
    pub client_lng: Option<f64>,
}

// ============================================================================
// Repository
// ============================================================================

#[async_trait]
pub trait CheckinRepo: Send + Sync {
    async fn gym_exists(&self, gym_id: Uuid) -> AppResult<bool>;

    /// The QR row for `nonce` only if it is active and belongs to `gym_id`.
    async fn find_active_qr(&self, gym_id: Uuid, nonce: &str) -> AppResult<Option<GymQrCode>>;

    async fn face_reference_url(&self, user_id: Uuid) -> AppResult<Option<String>>;

    async fn has_confirmed_on(&self, user_id: Uuid, gym_id: Uuid, day: NaiveDate) -> AppResult<bool>;

    /// Newest first.
    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> AppResult<Vec<CheckinProfile>>;

    async fn begin(&self) -> AppResult<Box<dyn CheckinTx>>;
}

/// A second confirmed row for the same (user, gym, day) fails with `AppError::Conflict` on commit.
#[async_trait]
pub trait CheckinTx: Send {
    async fn insert(&mut self, checkin: &CheckinProfile) -> AppResult<()>;

    async fn update(&mut self, checkin: &CheckinProfile) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

// ============================================================================
// Use cases
// ============================================================================

pub struct CheckinUseCases {
    repo: Arc<dyn CheckinRepo>,
    face_matcher: Arc<dyn FaceMatcher>,
    match_threshold: f64,
}

impl CheckinUseCases {
    pub fn new(
        repo: Arc<dyn CheckinRepo>,
        face_matcher: Arc<dyn FaceMatcher>,
        match_threshold: f64,
    ) -> Self {
        Self {
            repo,
            face_matcher,
            match_threshold,
        }
    }

    pub async fn perform_checkin(
        &self,
        caller: &Caller,
        request: CheckinRequest,
    ) -> AppResult<CheckinProfile> {
        let gym_id = request.gym_id;
        if !self.repo.gym_exists(gym_id).await? {
            return Err(AppError::NotFound("Gym not found".into()));
        }

        let qr = self
            .repo
            .find_active_qr(gym_id, &request.qr_nonce)
            .await?
            .ok_or_else(|| AppError::InvalidInput("Invalid QR code".into()))?;

        let reference_url = self
            .repo
            .face_reference_url(caller.user_id)
            .await?
            .ok_or_else(|| AppError::InvalidInput("User face not registered".into()))?;

        let now = Utc::now();
        let today = now.date_naive();
        if self
            .repo
            .has_confirmed_on(caller.user_id, gym_id, today)
            .await?
        {
            return Err(AppError::InvalidInput(ALREADY_CHECKED_IN_REASON.into()));
        }

        // Provisional row goes into the transaction before the external call.
        let mut checkin =
            CheckinProfile::provisional(caller.user_id, &qr, request.client_lat, request.client_lng, now);
        let provisional = checkin.clone();
        let mut tx = self.repo.begin().await?;
        tx.insert(&checkin).await?;

        let comparison = self
            .face_matcher
            .compare(&reference_url, &request.face_image_base64)
            .await;

        let decided_at = Utc::now();
        let face_error = match comparison {
            Ok(score) => {
                checkin.apply_score(score, self.match_threshold, decided_at)?;
                None
            }
            Err(e) => {
                warn!(checkin_id = %checkin.id, error = %e, "Face comparison failed; rejecting check-in");
                checkin.reject(e.to_string(), decided_at)?;
                Some(e)
            }
        };

        let persisted = match tx.update(&checkin).await {
            Ok(()) => tx.commit().await,
            Err(e) => Err(e),
        };
        match persisted {
            Ok(()) => {}
            // A concurrent attempt confirmed first; the rolled-back attempt is kept as rejected.
            Err(AppError::Conflict(_)) => {
                self.record_lost_race(provisional, checkin.face_score).await?;
                return Err(AppError::InvalidInput(ALREADY_CHECKED_IN_REASON.into()));
            }
            Err(e) => return Err(e),
        }

        info!(
            checkin_id = %checkin.id,
            user_id = %checkin.user_id,
            gym_id = %gym_id,
            status = %checkin.status,
            face_score = ?checkin.face_score,
            "Check-in recorded"
        );

        match face_error {
            Some(AppError::Upstream(msg)) => Err(AppError::Upstream(msg)),
            Some(other) => Err(AppError::Upstream(other.to_string())),
            None => Ok(checkin),
        }
    }

    async fn record_lost_race(
        &self,
        mut checkin: CheckinProfile,
        face_score: Option<f64>,
    ) -> AppResult<()> {
        checkin.face_score = face_score;
        checkin.reject(ALREADY_CHECKED_IN_REASON.to_string(), Utc::now())?;

        let mut tx = self.repo.begin().await?;
        tx.insert(&checkin).await?;
        tx.commit().await?;

        warn!(
            checkin_id = %checkin.id,
            user_id = %checkin.user_id,
            gym_id = ?checkin.gym_id,
            "Concurrent check-in confirmed first; attempt recorded as rejected"
        );
        Ok(())
    }

    pub async fn list_my_checkins(
        &self,
        caller: &Caller,
        limit: Option<i64>,
    ) -> AppResult<Vec<CheckinProfile>> {
        let limit = limit.unwrap_or(20).clamp(1, MAX_HISTORY);
        self.repo.list_for_user(caller.user_id, limit).await
    }
}
