use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::use_cases::subscription_payments::SubscriptionPaymentUseCases;

/// Periodically cancels subscriptions stuck in `pending` past the configured threshold.
pub async fn run_expiry_sweep_loop(use_cases: Arc<SubscriptionPaymentUseCases>, every_secs: u64) {
    let mut ticker = interval(Duration::from_secs(every_secs.max(1)));

    info!(
        "Pending subscription expiry sweep started (every {}s, threshold {}h)",
        every_secs,
        use_cases.pending_threshold_hours()
    );

    loop {
        ticker.tick().await;

        if let Err(e) = use_cases.expire_stale_pending().await {
            error!(error = ?e, "Pending subscription expiry sweep failed");
        }
    }
}
