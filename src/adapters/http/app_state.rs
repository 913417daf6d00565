use std::sync::Arc;

use crate::{
    infra::config::AppConfig,
    use_cases::{
        checkin::CheckinUseCases, reconciliation::ReconciliationUseCases,
        subscription_payments::SubscriptionPaymentUseCases,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub subscription_payment_use_cases: Arc<SubscriptionPaymentUseCases>,
    pub reconciliation_use_cases: Arc<ReconciliationUseCases>,
    pub checkin_use_cases: Arc<CheckinUseCases>,
}
