use url::Url;

use crate::app_error::{AppError, AppResult};

/// Origins (`scheme://host[:port]`) that payment callbacks may redirect to.
#[derive(Debug, Clone, Default)]
pub struct CallbackAllowList {
    allow_any: bool,
    origins: Vec<String>,
}

impl CallbackAllowList {
    /// Parses a comma-separated list. A `*` entry allows every origin.
    pub fn parse(raw: &str) -> Self {
        let mut list = Self::default();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if entry == "*" {
                list.allow_any = true;
            } else {
                list.origins.push(entry.trim_end_matches('/').to_ascii_lowercase());
            }
        }
        list
    }

    pub fn allow_any() -> Self {
        Self {
            allow_any: true,
            origins: vec![],
        }
    }

    /// Checks an optional callback URL. A missing callback is always accepted.
    pub fn validate(&self, callback_url: Option<&str>) -> AppResult<()> {
        let Some(raw) = callback_url else {
            return Ok(());
        };
        let url = Url::parse(raw).map_err(|_| AppError::InvalidInput("Invalid callback URL".into()))?;
        if self.allow_any {
            return Ok(());
        }
        let origin = url.origin().ascii_serialization();
        if self.origins.iter().any(|o| *o == origin) {
            Ok(())
        } else {
            Err(AppError::InvalidInput("Invalid callback URL".into()))
        }
    }
}
