//! Append-only audit trail stored in `payments.payment_metadata`.
//!
//! Every provider interaction that touches a payment leaves one entry here.
//! Entries are never edited or removed once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

/// Reason stamped into `payments.failure_code` when a payment is forced to `failed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureCode {
    ProviderNotSuccess,
    AmountCurrencyMismatch,
    MetadataMismatch,
    MissingSubscription,
    AutoExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    ExpectedAmountLocalMismatch,
    InvalidExpectedAmount,
    ProviderNotSuccessYet,
    ProviderNotSuccess,
    AmountCurrencyMismatch,
    MetadataMismatch,
    MissingSubscription,
}

/// What the provider said versus what was stored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub reason: AuditReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<i64>,
    /// Expected amount as claimed by stored or provider metadata, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_expected_amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Discrepancy {
    pub fn of(reason: AuditReason) -> Self {
        Self {
            reason,
            provider_status: None,
            provider_amount: None,
            provider_currency: None,
            expected_amount: None,
            claimed_expected_amount: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    Created {
        expected_amount: i64,
        currency: String,
    },
    Init {
        authorization_url: Option<String>,
        access_code: Option<String>,
        raw: Value,
    },
    InitError {
        error: String,
    },
    VerificationWarning(Discrepancy),
    VerificationIssue(Discrepancy),
    WebhookIssue(Discrepancy),
    ProviderVerification {
        provider_payment_id: Option<String>,
        raw: Value,
    },
    RawWebhook {
        raw: Value,
    },
    AutoExpired {
        threshold_hours: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub event: AuditEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentAudit {
    #[serde(default)]
    pub entries: Vec<AuditEntry>,
}

impl PaymentAudit {
    /// Trail for a freshly created payment, recording what the provider must match.
    pub fn created(expected_amount: i64, currency: &str, at: DateTime<Utc>) -> Self {
        let mut audit = Self::default();
        audit.record(
            at,
            AuditEvent::Created {
                expected_amount,
                currency: currency.to_string(),
            },
        );
        audit
    }

    pub fn record(&mut self, at: DateTime<Utc>, event: AuditEvent) {
        self.entries.push(AuditEntry { at, event });
    }

    pub fn expected_amount(&self) -> Option<i64> {
        self.entries.iter().find_map(|e| match &e.event {
            AuditEvent::Created {
                expected_amount, ..
            } => Some(*expected_amount),
            _ => None,
        })
    }

    pub fn currency(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| match &e.event {
            AuditEvent::Created { currency, .. } => Some(currency.as_str()),
            _ => None,
        })
    }

    /// Most recent checkout URL handed out by the provider, if any.
    pub fn latest_authorization_url(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|e| match &e.event {
            AuditEvent::Init {
                authorization_url, ..
            } => authorization_url.as_deref(),
            _ => None,
        })
    }

    pub fn is_auto_expired(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.event, AuditEvent::AutoExpired { .. }))
    }

    pub fn count_where(&self, pred: impl Fn(&AuditEvent) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.event)).count()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
