use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::face_matcher::FaceMatcher,
    infra::http_client::build_client_with_timeout,
};

const COMPARE_TIMEOUT: Duration = Duration::from_secs(10);

/// Face++ `compare` API client.
#[derive(Clone)]
pub struct FacePlusPlusClient {
    client: Client,
    compare_url: Url,
    api_key: SecretString,
    api_secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    error_message: Option<String>,
}

impl FacePlusPlusClient {
    pub fn new(
        compare_url: Url,
        api_key: SecretString,
        api_secret: SecretString,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client_with_timeout(COMPARE_TIMEOUT)?,
            compare_url,
            api_key,
            api_secret,
        })
    }
}

fn confidence_from(status: reqwest::StatusCode, body: &str) -> AppResult<f64> {
    let parsed = serde_json::from_str::<CompareResponse>(body);
    if !status.is_success() {
        let detail = parsed
            .ok()
            .and_then(|r| r.error_message)
            .unwrap_or_else(|| status.to_string());
        return Err(AppError::Upstream(format!("Face service error: {detail}")));
    }
    parsed
        .ok()
        .and_then(|r| r.confidence)
        .ok_or_else(|| AppError::Upstream("Invalid Face++ response".into()))
}

#[async_trait]
impl FaceMatcher for FacePlusPlusClient {
    async fn compare(
        &self,
        reference_image_url: &str,
        candidate_image_base64: &str,
    ) -> AppResult<f64> {
        let form = [
            ("api_key", self.api_key.expose_secret()),
            ("api_secret", self.api_secret.expose_secret()),
            ("image_url1", reference_image_url),
            ("image_base64_2", candidate_image_base64),
        ];

        let response = self
            .client
            .post(self.compare_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Face service request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to read face service response: {e}")))?;

        confidence_from(status, &body).inspect_err(|e| {
            tracing::warn!(status = %status, error = %e, "Face comparison failed");
        })
    }
}
