use dotenvy::dotenv;
use tracing::info;

use gymhub::infra::{
    app::create_app,
    config::AppConfig,
    expiry_sweeper::run_expiry_sweep_loop,
    setup::{init_app_state, init_tracing},
};
use std::net::SocketAddr;

const EXPIRE_PENDING_FLAG: &str = "--expire-pending";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env();
    init_tracing(config.log_format);

    let app_state = init_app_state(config).await?;

    // One-shot sweep for cron-style deployments.
    if std::env::args().any(|arg| arg == EXPIRE_PENDING_FLAG) {
        let summary = app_state
            .subscription_payment_use_cases
            .expire_stale_pending()
            .await?;
        info!(
            subscriptions_cancelled = summary.subscriptions_cancelled,
            payments_failed = summary.payments_failed,
            errors = summary.errors,
            "Expired stale pending subscriptions"
        );
        return Ok(());
    }

    // Read bind address from config before moving app_state
    let bind_addr = app_state.config.bind_addr;

    tokio::spawn(run_expiry_sweep_loop(
        app_state.subscription_payment_use_cases.clone(),
        app_state.config.expiry_sweep_interval_secs,
    ));

    let app = create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Backend listening at {}", &listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
