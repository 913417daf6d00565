use async_trait::async_trait;

use crate::app_error::AppResult;

/// External face-similarity service.
#[async_trait]
pub trait FaceMatcher: Send + Sync {
    /// Returns a similarity score in `[0, 100]` for the registered reference image and a fresh capture.
    async fn compare(&self, reference_image_url: &str, candidate_image_base64: &str)
    -> AppResult<f64>;
}
