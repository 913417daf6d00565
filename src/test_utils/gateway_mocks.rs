//! Scriptable stand-ins for the payment provider and the face service.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    app_error::{AppError, AppResult},
    application::ports::{
        face_matcher::FaceMatcher,
        payment_gateway::{InitializeRequest, InitializedTransaction, PaymentGateway, ProviderCharge},
    },
    infra::webhook_signature::{sign_body, verify_body_signature},
};

pub const TEST_WEBHOOK_SECRET: &str = "sk_test_webhook_secret";

/// Provider fake. Verify answers come from `set_charge`; unknown references report `ongoing`.
#[derive(Default)]
pub struct FakeGateway {
    fail_init: AtomicBool,
    init_requests: Mutex<Vec<InitializeRequest>>,
    charges: Mutex<HashMap<String, Value>>,
    verify_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn set_charge(&self, reference: &str, data: Value) {
        self.charges
            .lock()
            .unwrap()
            .insert(reference.to_string(), data);
    }

    pub fn init_requests(&self) -> Vec<InitializeRequest> {
        self.init_requests.lock().unwrap().clone()
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn sign(&self, body: &[u8]) -> String {
        sign_body(TEST_WEBHOOK_SECRET.as_bytes(), body)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider_name(&self) -> &'static str {
        "paystack"
    }

    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> AppResult<InitializedTransaction> {
        let attempt = {
            let mut requests = self.init_requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("provider timed out".into()));
        }
        let url = format!("https://checkout.test/{}/{}", request.reference, attempt);
        Ok(InitializedTransaction {
            authorization_url: url.clone(),
            access_code: Some(format!("ac_{attempt}")),
            reference: request.reference.clone(),
            raw: json!({ "authorization_url": url, "reference": request.reference }),
        })
    }

    async fn verify_transaction(&self, reference: &str) -> AppResult<ProviderCharge> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let data = self
            .charges
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_else(|| {
                json!({ "status": "ongoing", "reference": reference, "amount": 0, "currency": "GHS" })
            });
        ProviderCharge::from_value(data)
    }

    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        verify_body_signature(TEST_WEBHOOK_SECRET.as_bytes(), raw_body, signature)
    }
}

enum FaceOutcome {
    Score(f64),
    Error(String),
}

pub struct FakeFaceMatcher {
    outcome: Mutex<FaceOutcome>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeFaceMatcher {
    pub fn with_score(score: f64) -> Self {
        Self {
            outcome: Mutex::new(FaceOutcome::Score(score)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_score(&self, score: f64) {
        *self.outcome.lock().unwrap() = FaceOutcome::Score(score);
    }

    pub fn set_error(&self, message: &str) {
        *self.outcome.lock().unwrap() = FaceOutcome::Error(message.to_string());
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FaceMatcher for FakeFaceMatcher {
    async fn compare(&self, reference_image_url: &str, candidate_image_base64: &str) -> AppResult<f64> {
        self.calls.lock().unwrap().push((
            reference_image_url.to_string(),
            candidate_image_base64.to_string(),
        ));
        match &*self.outcome.lock().unwrap() {
            FaceOutcome::Score(score) => Ok(*score),
            FaceOutcome::Error(message) => Err(AppError::Upstream(message.clone())),
        }
    }
}
