//! Ledger database configuration
//!
//! Loads the Supabase/PostgREST endpoint from environment variables. When it is
//! not configured the bot runs with the in-memory ledger.

use thiserror::Error;
use tracing::{debug, info, warn};

/// Schema holding the bot's tables
pub const DEFAULT_SCHEMA: &str = "cb_pro";

/// Errors for ledger configuration
#[derive(Debug, Error)]
pub enum LedgerConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid ledger URL format: {0}")]
    InvalidUrl(String),
}

/// PostgREST endpoint configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Project URL (e.g., <https://xxx.supabase.co>), without `/rest/v1`
    pub url: String,
    /// API key sent as `apikey` and bearer token
    pub api_key: String,
    /// Postgres schema selected through the profile headers
    pub schema: String,
}

impl LedgerConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    /// Load from `SUPABASE_URL`, `SUPABASE_KEY` and optional `SUPABASE_SCHEMA`
    ///
    /// # Returns
    /// - `Ok(Some(LedgerConfig))` if configured
    /// - `Ok(None)` if `SUPABASE_URL` is unset or a placeholder
    /// - `Err` if the URL is set but malformed or the key is missing
    pub fn from_env() -> Result<Option<Self>, LedgerConfigError> {
        let url = match std::env::var("SUPABASE_URL") {
            Ok(u) if u.contains("your-project") => {
                warn!("SUPABASE_URL contains placeholder value, ledger database disabled");
                return Ok(None);
            }
            Ok(u) if !u.trim().is_empty() => u,
            _ => {
                debug!("SUPABASE_URL not set, ledger database disabled");
                return Ok(None);
            }
        };

        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(LedgerConfigError::InvalidUrl(url));
        }

        let api_key = std::env::var("SUPABASE_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LedgerConfigError::MissingEnvVar("SUPABASE_KEY".to_string()))?;

        let mut config = Self::new(url, api_key);
        if let Ok(schema) = std::env::var("SUPABASE_SCHEMA") {
            if !schema.is_empty() {
                config.schema = schema;
            }
        }

        info!(url = %config.url, schema = %config.schema, "Ledger database configuration loaded");
        Ok(Some(config))
    }
}
