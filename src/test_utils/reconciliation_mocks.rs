use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    application::use_cases::reconciliation::{
        ReconciliationEventProfile, ReconciliationRepo, UnmatchedEvent,
    },
    domain::entities::reconciliation_status::ReconciliationStatus,
};

/// Rows kept in insertion order; the upsert key is (provider, provider_event, reference).
#[derive(Default)]
pub struct InMemoryReconciliationRepo {
    events: Mutex<Vec<ReconciliationEventProfile>>,
}

impl InMemoryReconciliationRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ReconciliationEventProfile> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReconciliationRepo for InMemoryReconciliationRepo {
    async fn record_unmatched(
        &self,
        event: &UnmatchedEvent,
    ) -> AppResult<ReconciliationEventProfile> {
        let mut events = self.events.lock().unwrap();

        if let Some(existing) = events.iter_mut().find(|e| {
            e.provider == event.provider
                && e.provider_event == event.provider_event
                && e.reference == event.reference
        }) {
            existing.payload.seen_count += 1;
            existing.payload.last_seen_at = Some(event.seen_at);
            existing.payload.last_event = event.event.clone();
            existing.updated_at = event.seen_at;
            return Ok(existing.clone());
        }

        let profile = ReconciliationEventProfile {
            id: Uuid::new_v4(),
            provider: event.provider.clone(),
            provider_event: event.provider_event.clone(),
            provider_event_id: event.provider_event_id.clone(),
            reference: event.reference.clone(),
            status: ReconciliationStatus::Open,
            payload: event.initial_payload(),
            notes: Some(event.notes.clone()),
            created_at: event.seen_at,
            updated_at: event.seen_at,
        };
        events.push(profile.clone());
        Ok(profile)
    }

    async fn list(
        &self,
        status: Option<ReconciliationStatus>,
        limit: i64,
    ) -> AppResult<Vec<ReconciliationEventProfile>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}
