use async_trait::async_trait;
use sqlx::{Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    adapters::persistence::{PostgresPersistence, parse_json_with_fallback},
    app_error::{AppError, AppResult},
    application::use_cases::reconciliation::{
        ReconciliationEventProfile, ReconciliationPayload, ReconciliationRepo, UnmatchedEvent,
    },
    domain::entities::reconciliation_status::ReconciliationStatus,
};

fn row_to_profile(row: &PgRow) -> ReconciliationEventProfile {
    let id: Uuid = row.get("id");
    let payload: serde_json::Value = row.get("payload");
    ReconciliationEventProfile {
        id,
        provider: row.get("provider"),
        provider_event: row.get("provider_event"),
        provider_event_id: row.get("provider_event_id"),
        reference: row.get("reference"),
        status: row.get("status"),
        payload: parse_json_with_fallback::<ReconciliationPayload>(
            &payload,
            "payload",
            "payment_reconciliation_event",
            &id.to_string(),
        ),
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, provider, provider_event, provider_event_id, reference, status, payload, notes,
    created_at, updated_at
"#;

#[async_trait]
impl ReconciliationRepo for PostgresPersistence {
    async fn record_unmatched(
        &self,
        event: &UnmatchedEvent,
    ) -> AppResult<ReconciliationEventProfile> {
        let payload = serde_json::to_value(event.initial_payload())
            .map_err(|e| AppError::Internal(e.to_string()))?;

        // Single statement so concurrent redeliveries each bump the counter once.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payment_reconciliation_events (
                id, provider, provider_event, provider_event_id, reference, status, payload,
                notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ON CONFLICT (provider, provider_event, reference) DO UPDATE SET
                payload = payment_reconciliation_events.payload || jsonb_build_object(
                    'seen_count',
                    COALESCE((payment_reconciliation_events.payload->>'seen_count')::bigint, 0) + 1,
                    'last_seen_at', EXCLUDED.payload->'last_seen_at',
                    'last_event', EXCLUDED.payload->'last_event'
                ),
                provider_event_id = COALESCE(
                    payment_reconciliation_events.provider_event_id,
                    EXCLUDED.provider_event_id
                ),
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(Uuid::new_v4())
        .bind(&event.provider)
        .bind(&event.provider_event)
        .bind(&event.provider_event_id)
        .bind(&event.reference)
        .bind(ReconciliationStatus::Open)
        .bind(payload)
        .bind(&event.notes)
        .bind(event.seen_at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;

        Ok(row_to_profile(&row))
    }

    async fn list(
        &self,
        status: Option<ReconciliationStatus>,
        limit: i64,
    ) -> AppResult<Vec<ReconciliationEventProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payment_reconciliation_events \
             WHERE ($1::reconciliation_status IS NULL OR status = $1) \
             ORDER BY created_at DESC LIMIT $2",
            SELECT_COLS
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_profile).collect())
    }
}
