//! Redaction helpers for credentials that end up in log fields
//!
//! ```rust,ignore
//! use rebalance_bot::core::logging::sanitize;
//!
//! tracing::info!(key = %sanitize(&api_key), "Authenticating user channel");
//! // key = "abcd...REDACTED"
//! ```

use std::fmt;

/// Number of leading characters kept visible on long values
const VISIBLE_PREFIX: usize = 4;
/// Values up to this length are fully redacted
const SHORT_VALUE_LEN: usize = 8;

/// Sensitive string that only shows a short prefix when displayed
#[derive(Clone, Copy)]
pub struct SanitizedValue<'a>(&'a str);

impl<'a> SanitizedValue<'a> {
    pub fn new(value: &'a str) -> Self {
        Self(value)
    }
}

impl fmt::Display for SanitizedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.chars().count() > SHORT_VALUE_LEN {
            let prefix: String = self.0.chars().take(VISIBLE_PREFIX).collect();
            write!(f, "{}...REDACTED", prefix)
        } else {
            write!(f, "REDACTED")
        }
    }
}

impl fmt::Debug for SanitizedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SanitizedValue(***)")
    }
}

pub fn sanitize(value: &str) -> SanitizedValue<'_> {
    SanitizedValue::new(value)
}

/// First 8 characters of a base64 signature
pub fn sanitize_signature(sig: &str) -> String {
    if sig.chars().count() > 12 {
        let prefix: String = sig.chars().take(8).collect();
        format!("{}...", prefix)
    } else {
        "REDACTED".to_string()
    }
}
