//! Subscription payment lifecycle: initialize, verify (polling), webhook ingest and
//! the pending-expiry sweep.
//!
//! Every mutation of a payment happens inside a [`LedgerTx`] that holds the payment's
//! row lock, so verify and webhook processing of the same reference never interleave.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        jwt::Caller,
        ports::payment_gateway::{
            ChargeMetadata, InitializeRequest, PaymentGateway, ProviderCharge,
        },
        use_cases::reconciliation::{
            CLOSED_PAYMENT_NOTE, ReconciliationRepo, UNKNOWN_REFERENCE_NOTE, UnmatchedEvent,
        },
        validators::CallbackAllowList,
    },
    domain::entities::{
        money::{amount_and_currency_match, from_minor_units, to_minor_units},
        payment_audit::{AuditEvent, AuditReason, Discrepancy, FailureCode, PaymentAudit},
        payment_status::PaymentStatus,
        subscription_status::SubscriptionStatus,
        user_role::{TierType, UserRole},
    },
};

pub const CHARGE_SUCCESS_EVENT: &str = "charge.success";
pub const REINIT_FAILED_NOTE: &str = "provider init failed; please call verify endpoint";
pub const RACE_PENDING_NOTE: &str = "race: returning existing pending";

// ============================================================================
// Profiles
// ============================================================================

#[derive(Debug, Clone)]
pub struct TierProfile {
    pub id: Uuid,
    pub name: String,
    pub tier_type: TierType,
    pub price_monthly: Decimal,
    pub duration_days: Option<i32>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct SubscriberProfile {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub current_subscription_tier_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub provider: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionProfile {
    pub fn new_pending(user_id: Uuid, tier: &TierProfile, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tier_id: tier.id,
            plan_name: tier.name.clone(),
            status: SubscriptionStatus::Pending,
            provider: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: SubscriptionStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            error!(
                subscription_id = %self.id,
                from = %self.status,
                to = %next,
                "Illegal subscription transition"
            );
            return Err(AppError::Internal(format!(
                "illegal subscription transition {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Opens the first billing period `[now, now + duration_days]`.
    pub fn activate(&mut self, now: DateTime<Utc>, duration_days: i64, provider: &str) -> AppResult<()> {
        self.transition(SubscriptionStatus::Active, now)?;
        self.current_period_start = Some(now);
        self.current_period_end = Some(now + Duration::days(duration_days));
        self.provider = Some(provider.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PaymentProfile {
    /// Provider reference; doubles as the idempotency key.
    pub id: String,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub status: PaymentStatus,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub audit: PaymentAudit,
    pub succeeded_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_code: Option<String>,
    pub raw_provider_payload: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentProfile {
    pub fn new_pending(
        subscription: &SubscriptionProfile,
        amount: Decimal,
        currency: &str,
        provider: &str,
        expected_amount: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: subscription.user_id,
            subscription_id: Some(subscription.id),
            amount,
            currency: currency.to_string(),
            fee: Decimal::ZERO,
            net_amount: Decimal::ZERO,
            status: PaymentStatus::Pending,
            provider: provider.to_string(),
            provider_payment_id: None,
            audit: PaymentAudit::created(expected_amount, currency, now),
            succeeded_at: None,
            failed_at: None,
            failure_code: None,
            raw_provider_payload: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            error!(
                reference = %self.id,
                from = %self.status,
                to = %next,
                "Illegal payment transition"
            );
            return Err(AppError::Internal(format!(
                "illegal payment transition {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, code: FailureCode, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(PaymentStatus::Failed, now)?;
        self.failed_at = Some(now);
        self.failure_code = Some(code.to_string());
        Ok(())
    }

    pub fn mark_succeeded(&mut self, charge: &ProviderCharge, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(PaymentStatus::Succeeded, now)?;
        self.provider_payment_id = charge.provider_payment_id.clone();
        self.fee = from_minor_units(charge.fees);
        self.net_amount = self.amount - self.fee;
        self.succeeded_at = Some(now);
        self.raw_provider_payload = Some(charge.raw.clone());
        Ok(())
    }

    fn charge_metadata(&self, expected_amount: i64) -> ChargeMetadata {
        ChargeMetadata {
            user_id: Some(self.user_id.to_string()),
            subscription_id: self.subscription_id.map(|id| id.to_string()),
            expected_amount: Some(Value::from(expected_amount)),
            currency: Some(self.currency.clone()),
        }
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Reads outside a transaction plus the entry point for locked read-modify-write.
#[async_trait]
pub trait LedgerRepo: Send + Sync {
    async fn get_active_tier(&self, tier_id: Uuid) -> AppResult<Option<TierProfile>>;

    async fn get_subscriber(&self, user_id: Uuid) -> AppResult<Option<SubscriberProfile>>;

    /// The user's subscription in `active` or `pending`, newest first.
    async fn find_current_subscription(&self, user_id: Uuid)
    -> AppResult<Option<SubscriptionProfile>>;

    async fn find_pending_payment(&self, subscription_id: Uuid) -> AppResult<Option<PaymentProfile>>;

    /// Ids of subscriptions still `pending` that were created before `cutoff`.
    async fn list_stale_pending_subscriptions(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Uuid>>;

    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>>;
}

/// A unit of work over the ledger. Dropping without `commit` rolls back and
/// releases every lock taken.
///
/// Unique-constraint violations surface as `AppError::Conflict`.
#[async_trait]
pub trait LedgerTx: Send {
    async fn insert_subscription(&mut self, subscription: &SubscriptionProfile) -> AppResult<()>;

    async fn insert_payment(&mut self, payment: &PaymentProfile) -> AppResult<()>;

    /// Exclusive row lock; blocks while another transaction holds the same reference.
    async fn lock_payment(&mut self, reference: &str) -> AppResult<Option<PaymentProfile>>;

    async fn lock_pending_payments(&mut self, subscription_id: Uuid) -> AppResult<Vec<PaymentProfile>>;

    async fn lock_subscription(&mut self, subscription_id: Uuid)
    -> AppResult<Option<SubscriptionProfile>>;

    async fn get_tier(&mut self, tier_id: Uuid) -> AppResult<Option<TierProfile>>;

    async fn save_payment(&mut self, payment: &PaymentProfile) -> AppResult<()>;

    async fn save_subscription(&mut self, subscription: &SubscriptionProfile) -> AppResult<()>;

    async fn set_user_tier(&mut self, user_id: Uuid, tier_id: Uuid) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum InitializeOutcome {
    /// Fresh pending rows and a provider checkout URL.
    Created {
        authorization_url: String,
        reference: String,
    },
    AlreadyActive {
        subscription_id: Uuid,
        tier_id: Uuid,
    },
    Pending {
        reference: String,
        authorization_url: Option<String>,
        note: Option<&'static str>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookAck {
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reconciliation_event_id: Option<Uuid>,
    },
    Ignored {
        reason: &'static str,
    },
}

impl WebhookAck {
    fn note(note: &'static str) -> Self {
        WebhookAck::Ok {
            note: Some(note),
            reconciliation_event_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySummary {
    pub subscriptions_cancelled: usize,
    pub payments_failed: usize,
    pub errors: usize,
}

enum Activation {
    Activated,
    MissingSubscription,
}

#[derive(Clone, Copy)]
enum ChargeSource {
    Verify,
    Webhook,
}

impl ChargeSource {
    fn issue(self, discrepancy: Discrepancy) -> AuditEvent {
        match self {
            ChargeSource::Verify => AuditEvent::VerificationIssue(discrepancy),
            ChargeSource::Webhook => AuditEvent::WebhookIssue(discrepancy),
        }
    }

    fn success_entry(self, charge: &ProviderCharge) -> AuditEvent {
        match self {
            ChargeSource::Verify => AuditEvent::ProviderVerification {
                provider_payment_id: charge.provider_payment_id.clone(),
                raw: charge.raw.clone(),
            },
            ChargeSource::Webhook => AuditEvent::RawWebhook {
                raw: charge.raw.clone(),
            },
        }
    }
}

// ============================================================================
// Charge validation
// ============================================================================

enum ChargeVerdict {
    Match,
    Mismatch {
        code: FailureCode,
        discrepancy: Discrepancy,
    },
}

/// Local amount and currency are authoritative; metadata must point back at this payment.
fn check_charge(payment: &PaymentProfile, charge: &ProviderCharge) -> ChargeVerdict {
    if !amount_and_currency_match(payment.amount, &payment.currency, charge.amount, &charge.currency)
    {
        return ChargeVerdict::Mismatch {
            code: FailureCode::AmountCurrencyMismatch,
            discrepancy: Discrepancy {
                provider_amount: Some(charge.amount),
                provider_currency: Some(charge.currency.clone()),
                expected_amount: to_minor_units(payment.amount),
                metadata: charge.raw.get("metadata").cloned(),
                ..Discrepancy::of(AuditReason::AmountCurrencyMismatch)
            },
        };
    }

    let user_matches = charge.metadata.user_id == Some(payment.user_id.to_string());
    let subscription_matches =
        charge.metadata.subscription_id == payment.subscription_id.map(|id| id.to_string());
    if !user_matches || !subscription_matches {
        return ChargeVerdict::Mismatch {
            code: FailureCode::MetadataMismatch,
            discrepancy: Discrepancy {
                metadata: charge.raw.get("metadata").cloned(),
                ..Discrepancy::of(AuditReason::MetadataMismatch)
            },
        };
    }

    ChargeVerdict::Match
}

/// Advisory comparison of the claimed expected amount against the local amount. Never fails a payment.
fn expected_amount_warning(payment: &PaymentProfile, charge: &ProviderCharge) -> Option<Discrepancy> {
    let local = to_minor_units(payment.amount)?;
    let claimed = match payment.audit.expected_amount() {
        Some(stored) => Value::from(stored),
        None => charge.metadata.expected_amount.clone()?,
    };
    let parsed = match &claimed {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(amount) if amount == local => None,
        Some(_) => Some(Discrepancy {
            claimed_expected_amount: Some(claimed),
            expected_amount: Some(local),
            ..Discrepancy::of(AuditReason::ExpectedAmountLocalMismatch)
        }),
        None => Some(Discrepancy {
            claimed_expected_amount: Some(claimed),
            ..Discrepancy::of(AuditReason::InvalidExpectedAmount)
        }),
    }
}

fn mismatch_message(code: FailureCode) -> &'static str {
    match code {
        FailureCode::AmountCurrencyMismatch => {
            "Payment amount or currency does not match expected value"
        }
        FailureCode::MetadataMismatch => "Payment metadata mismatch",
        _ => "Provider transaction is not successful",
    }
}

/// Unique violations while activating mean another request won the race.
fn activation_conflict(err: AppError) -> AppError {
    match err {
        AppError::Conflict(_) => AppError::ActivationConflict,
        other => other,
    }
}

// ============================================================================
// Use cases
// ============================================================================

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub currency: String,
    pub channels: Vec<String>,
    pub callback_allow_list: CallbackAllowList,
    pub pending_threshold_hours: i64,
    pub default_duration_days: i64,
}

pub struct SubscriptionPaymentUseCases {
    ledger: Arc<dyn LedgerRepo>,
    reconciliation: Arc<dyn ReconciliationRepo>,
    gateway: Arc<dyn PaymentGateway>,
    settings: PaymentSettings,
}

impl SubscriptionPaymentUseCases {
    pub fn new(
        ledger: Arc<dyn LedgerRepo>,
        reconciliation: Arc<dyn ReconciliationRepo>,
        gateway: Arc<dyn PaymentGateway>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            ledger,
            reconciliation,
            gateway,
            settings,
        }
    }

    pub fn pending_threshold_hours(&self) -> i64 {
        self.settings.pending_threshold_hours
    }

    // ------------------------------------------------------------------------
    // Initialize
    // ------------------------------------------------------------------------

    pub async fn initialize(
        &self,
        caller: &Caller,
        tier_id: Uuid,
        callback_url: Option<&str>,
    ) -> AppResult<InitializeOutcome> {
        if caller.role != UserRole::GymUser {
            return Err(AppError::Forbidden(
                "Only gym users can have subscriptions".into(),
            ));
        }

        let tier = self
            .ledger
            .get_active_tier(tier_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Subscription tier not found".into()))?;

        if tier.tier_type != TierType::User {
            return Err(AppError::Forbidden(
                "Tier not available for user subscriptions".into(),
            ));
        }

        self.settings.callback_allow_list.validate(callback_url)?;

        let subscriber = self
            .ledger
            .get_subscriber(caller.user_id)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        if let Some(existing) = self.ledger.find_current_subscription(subscriber.id).await? {
            return self
                .resume_existing(&subscriber, &tier, existing, callback_url)
                .await;
        }

        let now = Utc::now();
        let expected_amount = to_minor_units(tier.price_monthly)
            .ok_or_else(|| AppError::Internal("Tier price out of range".into()))?;
        let subscription = SubscriptionProfile::new_pending(subscriber.id, &tier, now);
        let payment = PaymentProfile::new_pending(
            &subscription,
            tier.price_monthly,
            &self.settings.currency,
            self.gateway.provider_name(),
            expected_amount,
            now,
        );

        // Local rows are committed before the provider round-trip so an early webhook still matches.
        match self.create_pending_rows(&subscription, &payment).await {
            Ok(()) => {}
            Err(AppError::Conflict(_)) => {
                debug!(user_id = %subscriber.id, "Concurrent initialize detected, re-reading");
                return self.recover_initialize_race(subscriber.id, &tier).await;
            }
            Err(e) => return Err(e),
        }

        info!(
            reference = %payment.id,
            user_id = %subscriber.id,
            tier_id = %tier.id,
            expected_amount,
            "Created pending subscription payment"
        );

        let request = self.init_request(&subscriber, &payment, expected_amount, callback_url);
        match self.gateway.initialize_transaction(&request).await {
            Ok(init) => {
                self.append_audit_best_effort(
                    &payment.id,
                    AuditEvent::Init {
                        authorization_url: Some(init.authorization_url.clone()),
                        access_code: init.access_code.clone(),
                        raw: init.raw,
                    },
                )
                .await;
                Ok(InitializeOutcome::Created {
                    authorization_url: init.authorization_url,
                    reference: payment.id,
                })
            }
            Err(e) => {
                warn!(reference = %payment.id, error = %e, "Provider initialize failed; pending rows kept");
                self.append_audit_best_effort(
                    &payment.id,
                    AuditEvent::InitError {
                        error: e.to_string(),
                    },
                )
                .await;
                Err(AppError::ProviderInitFailed {
                    reference: payment.id,
                })
            }
        }
    }

    async fn create_pending_rows(
        &self,
        subscription: &SubscriptionProfile,
        payment: &PaymentProfile,
    ) -> AppResult<()> {
        let mut tx = self.ledger.begin().await?;
        tx.insert_subscription(subscription).await?;
        tx.insert_payment(payment).await?;
        tx.commit().await
    }

    fn init_request(
        &self,
        subscriber: &SubscriberProfile,
        payment: &PaymentProfile,
        expected_amount: i64,
        callback_url: Option<&str>,
    ) -> InitializeRequest {
        InitializeRequest {
            email: subscriber.email.clone(),
            amount_minor: expected_amount,
            currency: payment.currency.clone(),
            reference: payment.id.clone(),
            callback_url: callback_url.map(str::to_owned),
            metadata: payment.charge_metadata(expected_amount),
            channels: self.settings.channels.clone(),
        }
    }

    fn already_active_or_reject(
        existing: &SubscriptionProfile,
        tier: &TierProfile,
    ) -> AppResult<InitializeOutcome> {
        if existing.tier_id == tier.id {
            Ok(InitializeOutcome::AlreadyActive {
                subscription_id: existing.id,
                tier_id: existing.tier_id,
            })
        } else {
            Err(AppError::InvalidInput(
                "Active subscription exists. Use upgrade endpoint to change tiers.".into(),
            ))
        }
    }

    async fn resume_existing(
        &self,
        subscriber: &SubscriberProfile,
        tier: &TierProfile,
        existing: SubscriptionProfile,
        callback_url: Option<&str>,
    ) -> AppResult<InitializeOutcome> {
        match existing.status {
            SubscriptionStatus::Active => Self::already_active_or_reject(&existing, tier),
            SubscriptionStatus::Pending => {
                let payment = self
                    .ledger
                    .find_pending_payment(existing.id)
                    .await?
                    .ok_or_else(|| {
                        error!(subscription_id = %existing.id, "Pending subscription has no pending payment");
                        AppError::Internal("Pending subscription found but no pending payment".into())
                    })?;

                let expected_amount = payment
                    .audit
                    .expected_amount()
                    .or_else(|| to_minor_units(payment.amount))
                    .ok_or_else(|| AppError::Internal("Payment amount out of range".into()))?;

                // Same reference every time, so the provider never sees a second transaction.
                let request = self.init_request(subscriber, &payment, expected_amount, callback_url);
                match self.gateway.initialize_transaction(&request).await {
                    Ok(init) => {
                        self.append_audit_best_effort(
                            &payment.id,
                            AuditEvent::Init {
                                authorization_url: Some(init.authorization_url.clone()),
                                access_code: init.access_code.clone(),
                                raw: init.raw,
                            },
                        )
                        .await;
                        Ok(InitializeOutcome::Pending {
                            reference: payment.id,
                            authorization_url: Some(init.authorization_url),
                            note: None,
                        })
                    }
                    Err(e) => {
                        info!(reference = %payment.id, error = %e, "Re-init failed; client should call verify");
                        self.append_audit_best_effort(
                            &payment.id,
                            AuditEvent::InitError {
                                error: e.to_string(),
                            },
                        )
                        .await;
                        Ok(InitializeOutcome::Pending {
                            authorization_url: payment
                                .audit
                                .latest_authorization_url()
                                .map(str::to_owned),
                            reference: payment.id,
                            note: Some(REINIT_FAILED_NOTE),
                        })
                    }
                }
            }
            other => Err(AppError::Internal(format!(
                "unexpected current subscription status {other}"
            ))),
        }
    }

    async fn recover_initialize_race(
        &self,
        user_id: Uuid,
        tier: &TierProfile,
    ) -> AppResult<InitializeOutcome> {
        let existing = self
            .ledger
            .find_current_subscription(user_id)
            .await?
            .ok_or_else(|| AppError::Internal("Integrity error during initialization".into()))?;

        match existing.status {
            SubscriptionStatus::Active => Self::already_active_or_reject(&existing, tier),
            _ => {
                let payment = self
                    .ledger
                    .find_pending_payment(existing.id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(
                            "Race: pending subscription exists but no pending payment".into(),
                        )
                    })?;
                Ok(InitializeOutcome::Pending {
                    authorization_url: payment.audit.latest_authorization_url().map(str::to_owned),
                    reference: payment.id,
                    note: Some(RACE_PENDING_NOTE),
                })
            }
        }
    }

    async fn append_audit(&self, reference: &str, event: AuditEvent) -> AppResult<()> {
        let mut tx = self.ledger.begin().await?;
        let mut payment = tx
            .lock_payment(reference)
            .await?
            .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;
        payment.audit.record(Utc::now(), event);
        tx.save_payment(&payment).await?;
        tx.commit().await
    }

    async fn append_audit_best_effort(&self, reference: &str, event: AuditEvent) {
        if let Err(e) = self.append_audit(reference, event).await {
            error!(reference, error = %e, "Failed to persist payment audit entry");
        }
    }

    // ------------------------------------------------------------------------
    // Verify
    // ------------------------------------------------------------------------

    /// Client-initiated reconciliation against the provider's authoritative status.
    pub async fn verify(&self, reference: &str, caller: &Caller) -> AppResult<PaymentStatus> {
        let mut tx = self.ledger.begin().await?;
        let mut payment = tx
            .lock_payment(reference)
            .await?
            .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;

        if payment.user_id != caller.user_id {
            return Err(AppError::Forbidden("Not allowed".into()));
        }

        if payment.status.is_terminal() {
            return Ok(payment.status);
        }

        let charge = self.gateway.verify_transaction(reference).await?;
        let now = Utc::now();

        if let Some(warning) = expected_amount_warning(&payment, &charge) {
            warn!(reference, reason = ?warning.reason, "Expected amount disagreement");
            payment
                .audit
                .record(now, AuditEvent::VerificationWarning(warning));
        }

        if !charge.is_success() {
            payment.raw_provider_payload = Some(charge.raw.clone());

            if charge.is_terminal_negative() {
                warn!(reference, provider_status = %charge.status, "Provider reports unsuccessful transaction");
                payment.audit.record(
                    now,
                    AuditEvent::VerificationIssue(Discrepancy {
                        provider_status: Some(charge.status.clone()),
                        ..Discrepancy::of(AuditReason::ProviderNotSuccess)
                    }),
                );
                payment.mark_failed(FailureCode::ProviderNotSuccess, now)?;
                tx.save_payment(&payment).await.map_err(activation_conflict)?;
                tx.commit().await.map_err(activation_conflict)?;
                return Err(AppError::PaymentRejected(
                    "Provider transaction is not successful".into(),
                ));
            }

            payment.audit.record(
                now,
                AuditEvent::VerificationWarning(Discrepancy {
                    provider_status: Some(charge.status.clone()).filter(|s| !s.is_empty()),
                    ..Discrepancy::of(AuditReason::ProviderNotSuccessYet)
                }),
            );
            tx.save_payment(&payment).await.map_err(activation_conflict)?;
            tx.commit().await.map_err(activation_conflict)?;
            return Ok(payment.status);
        }

        if let ChargeVerdict::Mismatch { code, discrepancy } = check_charge(&payment, &charge) {
            warn!(reference, failure_code = %code, "Provider charge disagrees with local payment");
            payment
                .audit
                .record(now, ChargeSource::Verify.issue(discrepancy));
            payment.mark_failed(code, now)?;
            tx.save_payment(&payment).await.map_err(activation_conflict)?;
            tx.commit().await.map_err(activation_conflict)?;
            return Err(AppError::PaymentRejected(mismatch_message(code).into()));
        }

        match self
            .apply_success(tx, payment, &charge, ChargeSource::Verify, now)
            .await
            .map_err(activation_conflict)?
        {
            Activation::Activated => Ok(PaymentStatus::Succeeded),
            Activation::MissingSubscription => Err(AppError::Internal(
                "Subscription missing for payment".into(),
            )),
        }
    }

    /// Marks the payment succeeded and activates its subscription, then commits.
    async fn apply_success(
        &self,
        mut tx: Box<dyn LedgerTx>,
        mut payment: PaymentProfile,
        charge: &ProviderCharge,
        source: ChargeSource,
        now: DateTime<Utc>,
    ) -> AppResult<Activation> {
        let subscription = match payment.subscription_id {
            Some(id) => tx.lock_subscription(id).await?,
            None => None,
        };

        let Some(mut subscription) = subscription else {
            error!(reference = %payment.id, "Subscription missing for payment");
            payment.audit.record(
                now,
                source.issue(Discrepancy::of(AuditReason::MissingSubscription)),
            );
            payment.mark_failed(FailureCode::MissingSubscription, now)?;
            tx.save_payment(&payment).await?;
            tx.commit().await?;
            return Ok(Activation::MissingSubscription);
        };

        let duration_days = tx
            .get_tier(subscription.tier_id)
            .await?
            .and_then(|t| t.duration_days)
            .filter(|days| *days > 0)
            .map(i64::from)
            .unwrap_or(self.settings.default_duration_days);

        payment.mark_succeeded(charge, now)?;
        payment.audit.record(now, source.success_entry(charge));
        subscription.activate(now, duration_days, self.gateway.provider_name())?;

        tx.save_payment(&payment).await?;
        tx.save_subscription(&subscription).await?;
        tx.set_user_tier(subscription.user_id, subscription.tier_id)
            .await?;
        tx.commit().await?;

        info!(
            reference = %payment.id,
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            period_end = ?subscription.current_period_end,
            "Subscription activated"
        );
        Ok(Activation::Activated)
    }

    // ------------------------------------------------------------------------
    // Webhook
    // ------------------------------------------------------------------------

    /// Provider-initiated notification. Any `Err` other than a bad signature or
    /// payload should be answered with a 5xx so the provider redelivers.
    pub async fn ingest_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> AppResult<WebhookAck> {
        let signature = signature.ok_or(AppError::InvalidSignature)?;
        if !self.gateway.verify_webhook_signature(raw_body, signature) {
            warn!("Webhook signature verification failed");
            return Err(AppError::InvalidSignature);
        }

        let event: Value = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid webhook payload: {e}")))?;
        let event_type = event
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        if event_type != CHARGE_SUCCESS_EVENT {
            debug!(event = %event_type, "Ignoring webhook event");
            return Ok(WebhookAck::Ignored {
                reason: "unsupported event",
            });
        }

        let data = event.get("data").cloned().unwrap_or(Value::Null);
        let has_reference = data
            .get("reference")
            .and_then(Value::as_str)
            .is_some_and(|r| !r.is_empty());
        if !has_reference {
            return Ok(WebhookAck::Ignored {
                reason: "no reference",
            });
        }

        // Signed events are always acknowledged; malformed fields fail the amount check below.
        let charge = ProviderCharge::from_webhook_data(data);
        let reference = charge.reference.clone();

        let mut tx = self.ledger.begin().await?;
        let Some(mut payment) = tx.lock_payment(&reference).await? else {
            drop(tx);
            return self
                .queue_unmatched(&event_type, &charge, &event, UNKNOWN_REFERENCE_NOTE)
                .await;
        };

        match payment.status {
            PaymentStatus::Succeeded => return Ok(WebhookAck::note("already processed")),
            PaymentStatus::Failed | PaymentStatus::Refunded => {
                drop(tx);
                return self
                    .queue_unmatched(&event_type, &charge, &event, CLOSED_PAYMENT_NOTE)
                    .await;
            }
            PaymentStatus::Pending => {}
        }

        let now = Utc::now();
        if let ChargeVerdict::Mismatch { code, discrepancy } = check_charge(&payment, &charge) {
            error!(
                reference = %reference,
                failure_code = %code,
                provider_amount = charge.amount,
                provider_currency = %charge.currency,
                "Webhook charge disagrees with local payment"
            );
            payment
                .audit
                .record(now, ChargeSource::Webhook.issue(discrepancy));
            payment.mark_failed(code, now)?;
            tx.save_payment(&payment).await?;
            tx.commit().await?;
            return Ok(WebhookAck::note(match code {
                FailureCode::AmountCurrencyMismatch => "mismatch",
                _ => "metadata_mismatch",
            }));
        }

        match self
            .apply_success(tx, payment, &charge, ChargeSource::Webhook, now)
            .await?
        {
            Activation::Activated => Ok(WebhookAck::Ok {
                note: None,
                reconciliation_event_id: None,
            }),
            Activation::MissingSubscription => Ok(WebhookAck::note("missing subscription")),
        }
    }

    async fn queue_unmatched(
        &self,
        event_type: &str,
        charge: &ProviderCharge,
        event: &Value,
        notes: &str,
    ) -> AppResult<WebhookAck> {
        let recorded = self
            .reconciliation
            .record_unmatched(&UnmatchedEvent {
                provider: self.gateway.provider_name().to_string(),
                provider_event: event_type.to_string(),
                provider_event_id: charge.provider_payment_id.clone(),
                reference: charge.reference.clone(),
                event: event.clone(),
                notes: notes.to_string(),
                seen_at: Utc::now(),
            })
            .await?;

        error!(
            reference = %charge.reference,
            reconciliation_event_id = %recorded.id,
            seen_count = recorded.payload.seen_count,
            notes,
            "Unmatched webhook queued for reconciliation"
        );

        Ok(WebhookAck::Ok {
            note: Some("reconciliation_recorded"),
            reconciliation_event_id: Some(recorded.id),
        })
    }

    // ------------------------------------------------------------------------
    // Expiry sweep
    // ------------------------------------------------------------------------

    pub async fn expire_stale_pending(&self) -> AppResult<ExpirySummary> {
        self.expire_stale_pending_at(Utc::now()).await
    }

    /// Cancels subscriptions left `pending` past the threshold and fails their pending payments,
    /// freeing the user's active/pending slot.
    pub async fn expire_stale_pending_at(&self, now: DateTime<Utc>) -> AppResult<ExpirySummary> {
        let cutoff = now - Duration::hours(self.settings.pending_threshold_hours);
        let candidates = self.ledger.list_stale_pending_subscriptions(cutoff).await?;

        let mut summary = ExpirySummary::default();
        for subscription_id in candidates {
            match self.expire_one(subscription_id, cutoff, now).await {
                Ok(Some(payments_failed)) => {
                    summary.subscriptions_cancelled += 1;
                    summary.payments_failed += payments_failed;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(subscription_id = %subscription_id, error = %e, "Failed to expire pending subscription");
                    summary.errors += 1;
                }
            }
        }

        if summary.subscriptions_cancelled > 0 || summary.errors > 0 {
            info!(
                cancelled = summary.subscriptions_cancelled,
                payments_failed = summary.payments_failed,
                errors = summary.errors,
                "Expired stale pending subscriptions"
            );
        }
        Ok(summary)
    }

    /// Payments are locked before the subscription, the same order verify uses.
    async fn expire_one(
        &self,
        subscription_id: Uuid,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<usize>> {
        let mut tx = self.ledger.begin().await?;
        let mut payments = tx.lock_pending_payments(subscription_id).await?;
        let Some(mut subscription) = tx.lock_subscription(subscription_id).await? else {
            return Ok(None);
        };

        if subscription.status != SubscriptionStatus::Pending || subscription.created_at >= cutoff {
            return Ok(None);
        }

        for payment in payments.iter_mut() {
            payment.audit.record(
                now,
                AuditEvent::AutoExpired {
                    threshold_hours: self.settings.pending_threshold_hours,
                },
            );
            payment.mark_failed(FailureCode::AutoExpired, now)?;
            tx.save_payment(payment).await?;
        }

        subscription.transition(SubscriptionStatus::Cancelled, now)?;
        tx.save_subscription(&subscription).await?;
        tx.commit().await?;

        debug!(subscription_id = %subscription_id, payments = payments.len(), "Auto-expired pending subscription");
        Ok(Some(payments.len()))
    }
}
