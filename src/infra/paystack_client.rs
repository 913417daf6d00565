use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::payment_gateway::{
        InitializeRequest, InitializedTransaction, PaymentGateway, ProviderCharge,
    },
    infra::{http_client::try_build_client, webhook_signature::verify_body_signature},
};

pub const PROVIDER_NAME: &str = "paystack";

#[derive(Clone)]
pub struct PaystackClient {
    client: Client,
    base_url: Url,
    secret_key: SecretString,
}

impl PaystackClient {
    pub fn new(secret_key: SecretString, base_url: Url) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: try_build_client()?,
            base_url,
            secret_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key.expose_secret())
    }

    async fn handle_response(&self, response: reqwest::Response) -> AppResult<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to read Paystack response: {e}")))?;
        decode_envelope(status, &body)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    #[serde(default)]
    access_code: Option<String>,
    reference: String,
}

/// Unwraps Paystack's `{status, message, data}` envelope.
fn decode_envelope(status: StatusCode, body: &str) -> AppResult<Value> {
    let envelope = serde_json::from_str::<Envelope>(body);

    if !status.is_success() {
        tracing::error!(status = %status, body = %body, "Paystack API error");
        let message = envelope
            .ok()
            .and_then(|e| e.message)
            .unwrap_or_else(|| status.to_string());
        return Err(AppError::Upstream(format!("Paystack error: {message}")));
    }

    let envelope = envelope.map_err(|e| {
        tracing::error!(body = %body, error = %e, "Failed to parse Paystack response");
        AppError::Upstream(format!("Failed to parse Paystack response: {e}"))
    })?;

    if !envelope.status {
        return Err(AppError::Upstream(format!(
            "Paystack error: {}",
            envelope.message.unwrap_or_else(|| "request not successful".into())
        )));
    }
    Ok(envelope.data)
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> AppResult<InitializedTransaction> {
        let mut body = json!({
            "email": request.email,
            "amount": request.amount_minor,
            "currency": request.currency,
            "reference": request.reference,
            "metadata": request.metadata,
            "channels": request.channels,
        });
        if let Some(callback_url) = &request.callback_url {
            body["callback_url"] = Value::String(callback_url.clone());
        }

        let response = self
            .client
            .post(self.endpoint("transaction/initialize"))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Paystack request failed: {e}")))?;

        let data = self.handle_response(response).await?;
        let parsed: InitializeData = serde_json::from_value(data.clone()).map_err(|e| {
            AppError::Upstream(format!("Unexpected Paystack initialize payload: {e}"))
        })?;

        Ok(InitializedTransaction {
            authorization_url: parsed.authorization_url,
            access_code: parsed.access_code,
            reference: parsed.reference,
            raw: data,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> AppResult<ProviderCharge> {
        let response = self
            .client
            .get(self.endpoint(&format!("transaction/verify/{reference}")))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Paystack request failed: {e}")))?;

        let data = self.handle_response(response).await?;
        ProviderCharge::from_value(data).map_err(|e| AppError::Upstream(e.to_string()))
    }

    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        verify_body_signature(
            self.secret_key.expose_secret().as_bytes(),
            raw_body,
            signature,
        )
    }
}
