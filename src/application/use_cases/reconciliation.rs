use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::jwt::Caller,
    domain::entities::{reconciliation_status::ReconciliationStatus, user_role::UserRole},
};

pub const UNKNOWN_REFERENCE_NOTE: &str = "Webhook received for unknown payment reference";
pub const CLOSED_PAYMENT_NOTE: &str = "Successful charge received for a payment already closed locally";

// ============================================================================
// Profiles
// ============================================================================

/// Delivery bookkeeping kept on each reconciliation row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPayload {
    #[serde(default)]
    pub seen_count: i64,
    #[serde(default)]
    pub first_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_event: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationEventProfile {
    pub id: Uuid,
    pub provider: String,
    pub provider_event: String,
    pub provider_event_id: Option<String>,
    pub reference: String,
    pub status: ReconciliationStatus,
    pub payload: ReconciliationPayload,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A provider event that could not be applied to a local payment.
#[derive(Debug, Clone)]
pub struct UnmatchedEvent {
    pub provider: String,
    pub provider_event: String,
    pub provider_event_id: Option<String>,
    pub reference: String,
    pub event: Value,
    pub notes: String,
    pub seen_at: DateTime<Utc>,
}

impl UnmatchedEvent {
    /// Payload for the first delivery of this event.
    pub fn initial_payload(&self) -> ReconciliationPayload {
        ReconciliationPayload {
            seen_count: 1,
            first_seen_at: Some(self.seen_at),
            last_seen_at: Some(self.seen_at),
            last_event: self.event.clone(),
        }
    }
}

// ============================================================================
// Repository
// ============================================================================

#[async_trait]
pub trait ReconciliationRepo: Send + Sync {
    /// Inserts a new open event, or bumps `seen_count` on the row sharing
    /// (provider, provider_event, reference). Must be a single atomic upsert.
    async fn record_unmatched(&self, event: &UnmatchedEvent)
    -> AppResult<ReconciliationEventProfile>;

    /// Newest first.
    async fn list(
        &self,
        status: Option<ReconciliationStatus>,
        limit: i64,
    ) -> AppResult<Vec<ReconciliationEventProfile>>;
}

// ============================================================================
// Use cases
// ============================================================================

pub const MAX_LIST_LIMIT: i64 = 200;

pub struct ReconciliationUseCases {
    repo: Arc<dyn ReconciliationRepo>,
}

impl ReconciliationUseCases {
    pub fn new(repo: Arc<dyn ReconciliationRepo>) -> Self {
        Self { repo }
    }

    /// Operator view of the queue. Admins only.
    pub async fn list_events(
        &self,
        caller: &Caller,
        status: Option<ReconciliationStatus>,
        limit: Option<i64>,
    ) -> AppResult<Vec<ReconciliationEventProfile>> {
        if caller.role != UserRole::Admin {
            return Err(AppError::Forbidden("Admin access required".into()));
        }
        let limit = limit.unwrap_or(50).clamp(1, MAX_LIST_LIMIT);
        self.repo.list(status, limit).await
    }
}
