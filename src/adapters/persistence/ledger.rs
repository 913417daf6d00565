use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Row, Transaction, postgres::PgRow};
use tracing::error;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::subscription_payments::{
        LedgerRepo, LedgerTx, PaymentProfile, SubscriberProfile, SubscriptionProfile, TierProfile,
    },
    domain::entities::{
        payment_audit::PaymentAudit, payment_status::PaymentStatus,
        subscription_status::SubscriptionStatus,
    },
};

fn row_to_tier(row: &PgRow) -> TierProfile {
    TierProfile {
        id: row.get("id"),
        name: row.get("name"),
        tier_type: row.get("tier_type"),
        price_monthly: row.get("price_monthly"),
        duration_days: row.get("duration_days"),
        is_active: row.get("is_active"),
    }
}

fn row_to_subscription(row: &PgRow) -> SubscriptionProfile {
    SubscriptionProfile {
        id: row.get("id"),
        user_id: row.get("user_id"),
        tier_id: row.get("tier_id"),
        plan_name: row.get("plan_name"),
        status: row.get("status"),
        provider: row.get("provider"),
        current_period_start: row.get("current_period_start"),
        current_period_end: row.get("current_period_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Stored audit trails are rewritten on every save, so an unreadable one must not be replaced.
fn audit_from_column(metadata: Option<Value>, payment_id: &str) -> AppResult<PaymentAudit> {
    match metadata {
        None | Some(Value::Null) => Ok(PaymentAudit::default()),
        Some(value) => serde_json::from_value(value).map_err(|e| {
            error!(payment_id = %payment_id, error = %e, "Unreadable payment_metadata");
            AppError::Internal(format!("Corrupt payment_metadata for payment {payment_id}"))
        }),
    }
}

fn row_to_payment(row: &PgRow) -> AppResult<PaymentProfile> {
    let id: String = row.get("id");
    let audit = audit_from_column(row.get("payment_metadata"), &id)?;
    Ok(PaymentProfile {
        id,
        user_id: row.get("user_id"),
        subscription_id: row.get("subscription_id"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        fee: row.get("fee"),
        net_amount: row.get("net_amount"),
        status: row.get("status"),
        provider: row.get("provider"),
        provider_payment_id: row.get("provider_payment_id"),
        audit,
        succeeded_at: row.get("succeeded_at"),
        failed_at: row.get("failed_at"),
        failure_code: row.get("failure_code"),
        raw_provider_payload: row.get("raw_provider_payload"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const TIER_COLS: &str = "id, name, tier_type, price_monthly, duration_days, is_active";

const SUBSCRIPTION_COLS: &str = r#"
    id, user_id, tier_id, plan_name, status, provider, current_period_start,
    current_period_end, cancel_at_period_end, created_at, updated_at
"#;

const PAYMENT_COLS: &str = r#"
    id, user_id, subscription_id, amount, currency, fee, net_amount, status, provider,
    provider_payment_id, payment_metadata, succeeded_at, failed_at, failure_code,
    raw_provider_payload, created_at, updated_at
"#;

#[async_trait]
impl LedgerRepo for PostgresPersistence {
    async fn get_active_tier(&self, tier_id: Uuid) -> AppResult<Option<TierProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscription_tiers WHERE id = $1 AND is_active",
            TIER_COLS
        ))
        .bind(tier_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_tier))
    }

    async fn get_subscriber(&self, user_id: Uuid) -> AppResult<Option<SubscriberProfile>> {
        let row = sqlx::query(
            "SELECT id, email, role, current_subscription_tier_id FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.map(|row| SubscriberProfile {
            id: row.get("id"),
            email: row.get("email"),
            role: row.get("role"),
            current_subscription_tier_id: row.get("current_subscription_tier_id"),
        }))
    }

    async fn find_current_subscription(
        &self,
        user_id: Uuid,
    ) -> AppResult<Option<SubscriptionProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 AND status IN ($2, $3) \
             ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLS
        ))
        .bind(user_id)
        .bind(SubscriptionStatus::Active)
        .bind(SubscriptionStatus::Pending)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn find_pending_payment(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Option<PaymentProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE subscription_id = $1 AND status = $2 \
             ORDER BY created_at DESC LIMIT 1",
            PAYMENT_COLS
        ))
        .bind(subscription_id)
        .bind(PaymentStatus::Pending)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn list_stale_pending_subscriptions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM subscriptions WHERE status = $1 AND created_at < $2 ORDER BY created_at",
        )
        .bind(SubscriptionStatus::Pending)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await.map_err(AppError::from)?;
        Ok(Box::new(PgLedgerTx { tx }))
    }
}

/// Ledger unit of work over a single PostgreSQL transaction.
/// Dropping it without `commit` rolls back.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn insert_subscription(&mut self, s: &SubscriptionProfile) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, tier_id, plan_name, status, provider, current_period_start,
                current_period_end, cancel_at_period_end, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(s.id)
        .bind(s.user_id)
        .bind(s.tier_id)
        .bind(&s.plan_name)
        .bind(s.status)
        .bind(&s.provider)
        .bind(s.current_period_start)
        .bind(s.current_period_end)
        .bind(s.cancel_at_period_end)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn insert_payment(&mut self, p: &PaymentProfile) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, subscription_id, amount, currency, fee, net_amount, status,
                provider, provider_payment_id, payment_metadata, succeeded_at, failed_at,
                failure_code, raw_provider_payload, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(&p.id)
        .bind(p.user_id)
        .bind(p.subscription_id)
        .bind(p.amount)
        .bind(&p.currency)
        .bind(p.fee)
        .bind(p.net_amount)
        .bind(p.status)
        .bind(&p.provider)
        .bind(&p.provider_payment_id)
        .bind(p.audit.to_json())
        .bind(p.succeeded_at)
        .bind(p.failed_at)
        .bind(&p.failure_code)
        .bind(&p.raw_provider_payload)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn lock_payment(&mut self, reference: &str) -> AppResult<Option<PaymentProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
            PAYMENT_COLS
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn lock_pending_payments(
        &mut self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<PaymentProfile>> {
        // Consistent lock order across concurrent sweeps.
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE subscription_id = $1 AND status = $2 \
             ORDER BY id FOR UPDATE",
            PAYMENT_COLS
        ))
        .bind(subscription_id)
        .bind(PaymentStatus::Pending)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        rows.iter().map(row_to_payment).collect()
    }

    async fn lock_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> AppResult<Option<SubscriptionProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1 FOR UPDATE",
            SUBSCRIPTION_COLS
        ))
        .bind(subscription_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn get_tier(&mut self, tier_id: Uuid) -> AppResult<Option<TierProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscription_tiers WHERE id = $1",
            TIER_COLS
        ))
        .bind(tier_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_tier))
    }

    async fn save_payment(&mut self, p: &PaymentProfile) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE payments SET
                subscription_id = $2, fee = $3, net_amount = $4, status = $5,
                provider_payment_id = $6, payment_metadata = $7, succeeded_at = $8,
                failed_at = $9, failure_code = $10, raw_provider_payload = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(&p.id)
        .bind(p.subscription_id)
        .bind(p.fee)
        .bind(p.net_amount)
        .bind(p.status)
        .bind(&p.provider_payment_id)
        .bind(p.audit.to_json())
        .bind(p.succeeded_at)
        .bind(p.failed_at)
        .bind(&p.failure_code)
        .bind(&p.raw_provider_payload)
        .bind(p.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn save_subscription(&mut self, s: &SubscriptionProfile) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2, provider = $3, current_period_start = $4, current_period_end = $5,
                cancel_at_period_end = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(s.id)
        .bind(s.status)
        .bind(&s.provider)
        .bind(s.current_period_start)
        .bind(s.current_period_end)
        .bind(s.cancel_at_period_end)
        .bind(s.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn set_user_tier(&mut self, user_id: Uuid, tier_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE users SET current_subscription_tier_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(tier_id)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await.map_err(AppError::from)
    }
}
