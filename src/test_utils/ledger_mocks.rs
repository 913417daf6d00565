//! In-memory ledger with the same row-lock and partial-unique semantics as PostgreSQL.
//!
//! Row locks are per-key `tokio::sync::Mutex`es held until commit or drop.
//! Writes are staged and only become visible on commit, where uniqueness is checked.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::subscription_payments::{
        LedgerRepo, LedgerTx, PaymentProfile, SubscriberProfile, SubscriptionProfile, TierProfile,
    },
    domain::entities::{
        payment_audit::AuditEvent, payment_status::PaymentStatus,
        subscription_status::SubscriptionStatus,
    },
};

#[derive(Default)]
struct LedgerState {
    tiers: HashMap<Uuid, TierProfile>,
    subscribers: HashMap<Uuid, SubscriberProfile>,
    subscriptions: HashMap<Uuid, SubscriptionProfile>,
    payments: HashMap<String, PaymentProfile>,
}

type RowLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

#[derive(Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    row_locks: RowLocks,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tier(&self, tier: TierProfile) {
        self.state.lock().unwrap().tiers.insert(tier.id, tier);
    }

    pub fn add_subscriber(&self, subscriber: SubscriberProfile) {
        self.state
            .lock()
            .unwrap()
            .subscribers
            .insert(subscriber.id, subscriber);
    }

    pub fn add_subscription(&self, subscription: SubscriptionProfile) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.id, subscription);
    }

    /// Drops a subscription row out from under its payments.
    pub fn remove_subscription(&self, id: Uuid) {
        self.state.lock().unwrap().subscriptions.remove(&id);
    }

    pub fn payment(&self, reference: &str) -> Option<PaymentProfile> {
        self.state.lock().unwrap().payments.get(reference).cloned()
    }

    pub fn subscription(&self, id: Uuid) -> Option<SubscriptionProfile> {
        self.state.lock().unwrap().subscriptions.get(&id).cloned()
    }

    pub fn payment_count(&self) -> usize {
        self.state.lock().unwrap().payments.len()
    }

    pub fn user_tier(&self, user_id: Uuid) -> Option<Uuid> {
        self.state
            .lock()
            .unwrap()
            .subscribers
            .get(&user_id)
            .and_then(|s| s.current_subscription_tier_id)
    }

    pub fn active_subscription_count(&self, user_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .count()
    }

    pub fn backdate_subscription(&self, id: Uuid, age: Duration) {
        if let Some(s) = self.state.lock().unwrap().subscriptions.get_mut(&id) {
            s.created_at = Utc::now() - age;
        }
    }

    /// Simulates a tampered `expected_amount` in the stored audit trail.
    pub fn rewrite_expected_amount(&self, reference: &str, amount: i64) {
        let mut state = self.state.lock().unwrap();
        let Some(payment) = state.payments.get_mut(reference) else {
            return;
        };
        for entry in payment.audit.entries.iter_mut() {
            if let AuditEvent::Created {
                expected_amount, ..
            } = &mut entry.event
            {
                *expected_amount = amount;
            }
        }
    }
}

#[async_trait]
impl LedgerRepo for InMemoryLedger {
    async fn get_active_tier(&self, tier_id: Uuid) -> AppResult<Option<TierProfile>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tiers
            .get(&tier_id)
            .filter(|t| t.is_active)
            .cloned())
    }

    async fn get_subscriber(&self, user_id: Uuid) -> AppResult<Option<SubscriberProfile>> {
        Ok(self.state.lock().unwrap().subscribers.get(&user_id).cloned())
    }

    async fn find_current_subscription(
        &self,
        user_id: Uuid,
    ) -> AppResult<Option<SubscriptionProfile>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.status.occupies_slot())
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn find_pending_payment(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Option<PaymentProfile>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .payments
            .values()
            .filter(|p| {
                p.subscription_id == Some(subscription_id) && p.status == PaymentStatus::Pending
            })
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn list_stale_pending_subscriptions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|s| s.status == SubscriptionStatus::Pending && s.created_at < cutoff)
            .map(|s| s.id)
            .collect())
    }

    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        Ok(Box::new(InMemoryLedgerTx {
            state: self.state.clone(),
            row_locks: self.row_locks.clone(),
            held: Vec::new(),
            held_keys: HashSet::new(),
            new_subscriptions: Vec::new(),
            new_payments: Vec::new(),
            saved_subscriptions: HashMap::new(),
            saved_payments: HashMap::new(),
            user_tiers: Vec::new(),
        }))
    }
}

pub struct InMemoryLedgerTx {
    state: Arc<Mutex<LedgerState>>,
    row_locks: RowLocks,
    held: Vec<OwnedMutexGuard<()>>,
    held_keys: HashSet<String>,
    new_subscriptions: Vec<SubscriptionProfile>,
    new_payments: Vec<PaymentProfile>,
    saved_subscriptions: HashMap<Uuid, SubscriptionProfile>,
    saved_payments: HashMap<String, PaymentProfile>,
    user_tiers: Vec<(Uuid, Uuid)>,
}

impl InMemoryLedgerTx {
    async fn lock_row(&mut self, key: String) {
        if self.held_keys.contains(&key) {
            return;
        }
        let mutex = self
            .row_locks
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .clone();
        self.held.push(mutex.lock_owned().await);
        self.held_keys.insert(key);
    }

    fn read_payment(&self, reference: &str) -> Option<PaymentProfile> {
        self.saved_payments
            .get(reference)
            .or_else(|| self.new_payments.iter().find(|p| p.id == reference))
            .cloned()
            .or_else(|| self.state.lock().unwrap().payments.get(reference).cloned())
    }

    fn read_subscription(&self, id: Uuid) -> Option<SubscriptionProfile> {
        self.saved_subscriptions
            .get(&id)
            .or_else(|| self.new_subscriptions.iter().find(|s| s.id == id))
            .cloned()
            .or_else(|| self.state.lock().unwrap().subscriptions.get(&id).cloned())
    }
}

fn unique_violation(constraint: &str) -> AppError {
    AppError::Conflict(format!(
        "duplicate key value violates unique constraint \"{constraint}\""
    ))
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn insert_subscription(&mut self, subscription: &SubscriptionProfile) -> AppResult<()> {
        self.new_subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &PaymentProfile) -> AppResult<()> {
        self.new_payments.push(payment.clone());
        Ok(())
    }

    async fn lock_payment(&mut self, reference: &str) -> AppResult<Option<PaymentProfile>> {
        self.lock_row(format!("payment:{reference}")).await;
        Ok(self.read_payment(reference))
    }

    async fn lock_pending_payments(
        &mut self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<PaymentProfile>> {
        let mut references: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .payments
            .values()
            .filter(|p| {
                p.subscription_id == Some(subscription_id) && p.status == PaymentStatus::Pending
            })
            .map(|p| p.id.clone())
            .collect();
        references.sort();

        let mut locked = Vec::new();
        for reference in references {
            self.lock_row(format!("payment:{reference}")).await;
            if let Some(p) = self
                .read_payment(&reference)
                .filter(|p| p.status == PaymentStatus::Pending)
            {
                locked.push(p);
            }
        }
        Ok(locked)
    }

    async fn lock_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> AppResult<Option<SubscriptionProfile>> {
        self.lock_row(format!("subscription:{subscription_id}"))
            .await;
        Ok(self.read_subscription(subscription_id))
    }

    async fn get_tier(&mut self, tier_id: Uuid) -> AppResult<Option<TierProfile>> {
        Ok(self.state.lock().unwrap().tiers.get(&tier_id).cloned())
    }

    async fn save_payment(&mut self, payment: &PaymentProfile) -> AppResult<()> {
        if let Some(staged) = self.new_payments.iter_mut().find(|p| p.id == payment.id) {
            *staged = payment.clone();
        } else {
            self.saved_payments
                .insert(payment.id.clone(), payment.clone());
        }
        Ok(())
    }

    async fn save_subscription(&mut self, subscription: &SubscriptionProfile) -> AppResult<()> {
        if let Some(staged) = self
            .new_subscriptions
            .iter_mut()
            .find(|s| s.id == subscription.id)
        {
            *staged = subscription.clone();
        } else {
            self.saved_subscriptions
                .insert(subscription.id, subscription.clone());
        }
        Ok(())
    }

    async fn set_user_tier(&mut self, user_id: Uuid, tier_id: Uuid) -> AppResult<()> {
        self.user_tiers.push((user_id, tier_id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();

        for p in &self.new_payments {
            if state.payments.contains_key(&p.id) {
                return Err(unique_violation("payments_pkey"));
            }
        }
        for s in &self.new_subscriptions {
            if state.subscriptions.contains_key(&s.id) {
                return Err(unique_violation("subscriptions_pkey"));
            }
        }

        let mut merged = state.subscriptions.clone();
        for s in self
            .new_subscriptions
            .iter()
            .chain(self.saved_subscriptions.values())
        {
            merged.insert(s.id, s.clone());
        }
        let mut slots: HashSet<Uuid> = HashSet::new();
        for s in merged.values().filter(|s| s.status.occupies_slot()) {
            if !slots.insert(s.user_id) {
                return Err(unique_violation("uq_subscriptions_user_active_pending"));
            }
        }

        state.subscriptions = merged;
        for p in self.new_payments.iter().chain(self.saved_payments.values()) {
            state.payments.insert(p.id.clone(), p.clone());
        }
        for (user_id, tier_id) in &self.user_tiers {
            if let Some(subscriber) = state.subscribers.get_mut(user_id) {
                subscriber.current_subscription_tier_id = Some(*tier_id);
            }
        }
        Ok(())
    }
}
