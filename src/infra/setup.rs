use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::http::app_state::AppState,
    infra::{
        config::{AppConfig, LogFormat},
        face_client::FacePlusPlusClient,
        paystack_client::PaystackClient,
        postgres_persistence,
    },
    use_cases::{
        checkin::{CheckinRepo, CheckinUseCases},
        reconciliation::{ReconciliationRepo, ReconciliationUseCases},
        subscription_payments::{LedgerRepo, PaymentSettings, SubscriptionPaymentUseCases},
    },
};

pub async fn init_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    config.validate()?;

    let postgres_arc = Arc::new(
        postgres_persistence(
            &config.database_url,
            config.database_max_connections,
            config.run_migrations,
        )
        .await?,
    );

    let ledger_repo_arc = postgres_arc.clone() as Arc<dyn LedgerRepo>;
    let reconciliation_repo_arc = postgres_arc.clone() as Arc<dyn ReconciliationRepo>;
    let checkin_repo_arc = postgres_arc.clone() as Arc<dyn CheckinRepo>;

    let gateway = Arc::new(PaystackClient::new(
        config.paystack_secret_key.clone(),
        config.paystack_base_url.clone(),
    )?);
    let face_matcher = Arc::new(FacePlusPlusClient::new(
        config.face_api_url.clone(),
        config.face_api_key.clone(),
        config.face_api_secret.clone(),
    )?);

    let subscription_payment_use_cases = SubscriptionPaymentUseCases::new(
        ledger_repo_arc,
        reconciliation_repo_arc.clone(),
        gateway,
        PaymentSettings {
            currency: config.payment_currency.clone(),
            channels: config.payment_channels.clone(),
            callback_allow_list: config.callback_allow_list.clone(),
            pending_threshold_hours: config.pending_threshold_hours,
            default_duration_days: config.default_tier_duration_days,
        },
    );

    let reconciliation_use_cases = ReconciliationUseCases::new(reconciliation_repo_arc);

    let checkin_use_cases =
        CheckinUseCases::new(checkin_repo_arc, face_matcher, config.face_match_threshold);

    Ok(AppState {
        config: Arc::new(config),
        subscription_payment_use_cases: Arc::new(subscription_payment_use_cases),
        reconciliation_use_cases: Arc::new(reconciliation_use_cases),
        checkin_use_cases: Arc::new(checkin_use_cases),
    })
}

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gymhub=debug,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
            .ok(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_level(true).pretty())
            .try_init()
            .ok(),
    };
}
