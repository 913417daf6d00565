use std::net::SocketAddr;

use axum::http::HeaderValue;
use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;
use url::Url;

use crate::{application::validators::CallbackAllowList, infra::error::InfraError};

/// Output format for `tracing-subscriber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub bind_addr: SocketAddr,
    pub cors_origin: HeaderValue,
    pub log_format: LogFormat,
    /// Verifies access tokens minted by the account service.
    pub jwt_secret: SecretString,
    /// Provider API key; also keys the webhook HMAC.
    pub paystack_secret_key: SecretString,
    pub paystack_base_url: Url,
    pub payment_currency: String,
    pub payment_channels: Vec<String>,
    pub callback_allow_list: CallbackAllowList,
    pub face_api_key: SecretString,
    pub face_api_secret: SecretString,
    pub face_api_url: Url,
    pub face_match_threshold: f64,
    pub pending_threshold_hours: i64,
    pub expiry_sweep_interval_secs: u64,
    pub default_tier_duration_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url: String = get_env("DATABASE_URL");
        let database_max_connections: u32 = get_env_default("DATABASE_MAX_CONNECTIONS", 10);
        let run_migrations: bool = get_env_default("RUN_MIGRATIONS", true);
        let bind_addr: SocketAddr = get_env_default(
            "BIND_ADDR",
            SocketAddr::from(([127, 0, 0, 1], 8000)),
        );
        let cors_origin: HeaderValue =
            get_env_default("CORS_ORIGIN", String::from("http://localhost:3000"))
                .parse()
                .expect("CORS_ORIGIN must be a valid header value");
        let log_format = match get_env_default("LOG_FORMAT", String::from("pretty"))
            .to_ascii_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let jwt_secret = SecretString::new(get_env::<String>("JWT_SECRET").into());

        let paystack_secret_key = SecretString::new(get_env::<String>("PAYSTACK_SECRET_KEY").into());
        let paystack_base_url: Url = get_env_default(
            "PAYSTACK_BASE_URL",
            "https://api.paystack.co".parse().expect("valid default URL"),
        );
        let payment_currency: String = get_env_default("PAYMENT_CURRENCY", String::from("GHS"));
        let payment_channels: Vec<String> =
            get_env_default("PAYMENT_CHANNELS", String::from("card,mobile_money"))
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_owned)
                .collect();
        let callback_allow_list = CallbackAllowList::parse(&get_env_default(
            "ALLOWED_CALLBACK_ORIGINS",
            String::from("*"),
        ));

        let face_api_key = SecretString::new(get_env::<String>("FACE_API_KEY").into());
        let face_api_secret = SecretString::new(get_env::<String>("FACE_API_SECRET").into());
        let face_api_url: Url = get_env_default(
            "FACE_API_URL",
            "https://api-us.faceplusplus.com/facepp/v3/compare"
                .parse()
                .expect("valid default URL"),
        );
        let face_match_threshold: f64 = get_env_default("FACE_MATCH_THRESHOLD", 75.0);

        let pending_threshold_hours: i64 =
            get_env_default("SUBSCRIPTION_PENDING_THRESHOLD_HOURS", 24);
        let expiry_sweep_interval_secs: u64 = get_env_default("EXPIRY_SWEEP_INTERVAL_SECS", 900);
        let default_tier_duration_days: i64 = get_env_default("DEFAULT_TIER_DURATION_DAYS", 30);

        Self {
            database_url,
            database_max_connections,
            run_migrations,
            bind_addr,
            cors_origin,
            log_format,
            jwt_secret,
            paystack_secret_key,
            paystack_base_url,
            payment_currency: payment_currency.trim().to_ascii_uppercase(),
            payment_channels,
            callback_allow_list,
            face_api_key,
            face_api_secret,
            face_api_url,
            face_match_threshold,
            pending_threshold_hours,
            expiry_sweep_interval_secs,
            default_tier_duration_days,
        }
    }

    /// Rejects values that parse but cannot drive the payment or check-in flows.
    pub fn validate(&self) -> Result<(), InfraError> {
        if !(0.0..=100.0).contains(&self.face_match_threshold) {
            return Err(InfraError::ConfigInvalid {
                var: "FACE_MATCH_THRESHOLD",
            });
        }
        if self.pending_threshold_hours <= 0 {
            return Err(InfraError::ConfigInvalid {
                var: "SUBSCRIPTION_PENDING_THRESHOLD_HOURS",
            });
        }
        if self.default_tier_duration_days <= 0 {
            return Err(InfraError::ConfigInvalid {
                var: "DEFAULT_TIER_DURATION_DAYS",
            });
        }
        if self.payment_currency.len() != 3 {
            return Err(InfraError::ConfigInvalid {
                var: "PAYMENT_CURRENCY",
            });
        }
        Ok(())
    }
}
