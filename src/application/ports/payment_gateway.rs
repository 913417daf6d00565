use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::app_error::{AppError, AppResult};

/// Provider statuses after which a transaction can never become successful.
pub const TERMINAL_NEGATIVE_STATUSES: &[&str] = &["failed", "abandoned", "reversed", "cancelled"];

// ============================================================================
// Port Types
// ============================================================================

/// Metadata attached to every transaction so a provider callback can be tied back to local rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    #[serde(default, deserialize_with = "lenient_id")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitializeRequest {
    pub email: String,
    pub amount_minor: i64,
    pub currency: String,
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: ChargeMetadata,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InitializedTransaction {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub reference: String,
    pub raw: Value,
}

/// A transaction as reported by the provider, either from a verify call or a webhook.
///
/// Business logic only reads the typed fields. `raw` is kept for the audit trail.
#[derive(Debug, Clone)]
pub struct ProviderCharge {
    pub status: String,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub provider_payment_id: Option<String>,
    pub fees: i64,
    pub metadata: ChargeMetadata,
    pub raw: Value,
}

#[derive(Deserialize)]
struct ChargeWire {
    #[serde(default)]
    status: Option<String>,
    reference: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    fees: Option<i64>,
    #[serde(default, deserialize_with = "lenient_metadata")]
    metadata: ChargeMetadata,
}

impl ProviderCharge {
    /// Validates a provider `data` object. Missing reference, amount or currency is an error.
    pub fn from_value(data: Value) -> AppResult<Self> {
        let wire: ChargeWire = serde_json::from_value(data.clone())
            .map_err(|e| AppError::InvalidInput(format!("Invalid provider charge payload: {e}")))?;
        Ok(Self {
            status: wire.status.unwrap_or_default().to_ascii_lowercase(),
            reference: wire.reference,
            amount: wire.amount,
            currency: wire.currency.to_ascii_uppercase(),
            provider_payment_id: wire.id.and_then(id_to_string),
            fees: wire.fees.unwrap_or(0),
            metadata: wire.metadata,
            raw: data,
        })
    }

    /// Webhook `data` that must never bounce once signed. Missing or malformed
    /// amount and currency become `0` and `""`, which cannot match any local payment.
    pub fn from_webhook_data(data: Value) -> Self {
        let text = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let metadata = data
            .get("metadata")
            .filter(|m| m.is_object())
            .and_then(|m| serde_json::from_value(m.clone()).ok())
            .unwrap_or_default();
        Self {
            status: text("status").to_ascii_lowercase(),
            reference: text("reference"),
            amount: data.get("amount").and_then(Value::as_i64).unwrap_or(0),
            currency: text("currency").to_ascii_uppercase(),
            provider_payment_id: data.get("id").cloned().and_then(id_to_string),
            fees: data.get("fees").and_then(Value::as_i64).unwrap_or(0),
            metadata,
            raw: data,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn is_terminal_negative(&self) -> bool {
        TERMINAL_NEGATIVE_STATUSES.contains(&self.status.as_str())
    }
}

fn id_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Providers send numeric or string ids depending on who wrote the metadata.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(id_to_string))
}

/// Metadata arrives as an empty string when none was attached.
fn lenient_metadata<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ChargeMetadata, D::Error> {
    let value = Value::deserialize(deserializer)?;
    if value.is_object() {
        Ok(serde_json::from_value(value).unwrap_or_default())
    } else {
        Ok(ChargeMetadata::default())
    }
}

// ============================================================================
// Port
// ============================================================================

/// Client for the third-party payment processor.
///
/// Communication failures surface as `AppError::Upstream`. Provider-reported
/// outcomes (including non-success statuses) are returned as data.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> AppResult<InitializedTransaction>;

    async fn verify_transaction(&self, reference: &str) -> AppResult<ProviderCharge>;

    /// Checks the signature header against the raw, unparsed request body.
    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool;
}
