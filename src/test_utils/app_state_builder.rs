//! `TestAppStateBuilder` wires every use case to in-memory mocks for route tests.

use std::sync::Arc;

use axum::http::HeaderValue;
use secrecy::SecretString;
use time::Duration;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    application::{
        jwt::{self, Caller},
        use_cases::{
            checkin::CheckinUseCases,
            reconciliation::ReconciliationUseCases,
            subscription_payments::{SubscriberProfile, SubscriptionPaymentUseCases, TierProfile},
        },
        validators::CallbackAllowList,
    },
    domain::entities::user_role::UserRole,
    infra::config::{AppConfig, LogFormat},
    test_utils::{
        FakeFaceMatcher, FakeGateway, InMemoryCheckinRepo, InMemoryLedger,
        InMemoryReconciliationRepo, TEST_CALLBACK_ORIGIN, test_payment_settings,
    },
};

pub const TEST_JWT_SECRET: &str = "test_jwt_secret";

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://localhost/gymhub_test".to_string(),
        database_max_connections: 1,
        run_migrations: false,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        cors_origin: HeaderValue::from_static("http://localhost:3000"),
        log_format: LogFormat::Pretty,
        jwt_secret: SecretString::new(TEST_JWT_SECRET.into()),
        paystack_secret_key: SecretString::new("sk_test".into()),
        paystack_base_url: "https://api.paystack.test".parse().unwrap(),
        payment_currency: "GHS".to_string(),
        payment_channels: vec!["card".to_string(), "mobile_money".to_string()],
        callback_allow_list: CallbackAllowList::parse(TEST_CALLBACK_ORIGIN),
        face_api_key: SecretString::new("face_key".into()),
        face_api_secret: SecretString::new("face_secret".into()),
        face_api_url: "https://face.test/compare".parse().unwrap(),
        face_match_threshold: 75.0,
        pending_threshold_hours: 24,
        expiry_sweep_interval_secs: 900,
        default_tier_duration_days: 30,
    }
}

/// `Authorization` header value for a caller, signed with [`TEST_JWT_SECRET`].
pub fn bearer_for(user_id: Uuid, role: UserRole) -> String {
    let token = jwt::issue(
        user_id,
        role,
        &SecretString::new(TEST_JWT_SECRET.into()),
        Duration::minutes(15),
    )
    .unwrap();
    format!("Bearer {token}")
}

/// Handles to the mocks behind a built `AppState`, for arranging and asserting.
#[derive(Clone)]
pub struct TestMocks {
    pub ledger: Arc<InMemoryLedger>,
    pub reconciliation: Arc<InMemoryReconciliationRepo>,
    pub gateway: Arc<FakeGateway>,
    pub checkins: Arc<InMemoryCheckinRepo>,
    pub faces: Arc<FakeFaceMatcher>,
}

pub struct TestAppStateBuilder {
    mocks: TestMocks,
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            mocks: TestMocks {
                ledger: Arc::new(InMemoryLedger::new()),
                reconciliation: Arc::new(InMemoryReconciliationRepo::new()),
                gateway: Arc::new(FakeGateway::new()),
                checkins: Arc::new(InMemoryCheckinRepo::new()),
                faces: Arc::new(FakeFaceMatcher::with_score(90.0)),
            },
        }
    }

    pub fn with_tier(self, tier: TierProfile) -> Self {
        self.mocks.ledger.add_tier(tier);
        self
    }

    pub fn with_subscriber(self, subscriber: SubscriberProfile) -> Self {
        self.mocks.ledger.add_subscriber(subscriber);
        self
    }

    pub fn build(self) -> AppState {
        self.build_with_mocks().0
    }

    pub fn build_with_mocks(self) -> (AppState, TestMocks) {
        let mocks = self.mocks;
        let config = test_config();

        let subscription_payment_use_cases = SubscriptionPaymentUseCases::new(
            mocks.ledger.clone(),
            mocks.reconciliation.clone(),
            mocks.gateway.clone(),
            test_payment_settings(),
        );
        let reconciliation_use_cases = ReconciliationUseCases::new(mocks.reconciliation.clone());
        let checkin_use_cases = CheckinUseCases::new(
            mocks.checkins.clone(),
            mocks.faces.clone(),
            config.face_match_threshold,
        );

        let app_state = AppState {
            config: Arc::new(config),
            subscription_payment_use_cases: Arc::new(subscription_payment_use_cases),
            reconciliation_use_cases: Arc::new(reconciliation_use_cases),
            checkin_use_cases: Arc::new(checkin_use_cases),
        };
        (app_state, mocks)
    }
}

/// Convenience for use-case level tests that need a caller and its bearer header.
pub fn caller_with_bearer(role: UserRole) -> (Caller, String) {
    let user_id = Uuid::new_v4();
    (Caller { user_id, role }, bearer_for(user_id, role))
}
