//! Caller options for a `get` request.
//!
//! Options arrive as the JSON params of the caller's request:
//!
//! ```json
//! {
//!   "requiredEmail": "user@example.com",
//!   "tosURL": "/tos",
//!   "privacyURL": "https://rp.example/privacy",
//!   "allowPersistent": true
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::transport::Origin;

use super::context::NegotiationError;

// ============================================================================
// Constants
// ============================================================================

/// Longest URL accepted for terms and privacy links.
pub const URL_MAX_LENGTH: usize = 2083;

/// Longest accepted email address.
pub const EMAIL_MAX_LENGTH: usize = 254;

/// Shortest accepted password.
pub const PASSWORD_MIN_LENGTH: usize = 8;

/// Longest accepted password.
pub const PASSWORD_MAX_LENGTH: usize = 80;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid")
});

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://").expect("absolute url regex is valid"));

// ============================================================================
// Validation helpers
// ============================================================================

/// Returns `true` if `email` looks like an email address.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= EMAIL_MAX_LENGTH && EMAIL.is_match(email)
}

/// Returns `true` if `password` has an acceptable length.
#[must_use]
pub fn is_valid_password(password: &str) -> bool {
    (PASSWORD_MIN_LENGTH..=PASSWORD_MAX_LENGTH).contains(&password.chars().count())
}

/// Resolves a caller-supplied link against the caller's origin.
///
/// Accepts absolute `http(s)` URLs, origin-relative `/path` and
/// scheme-relative `//host/path`.
fn fixup_url(origin: &Origin, input: &str) -> std::result::Result<Url, String> {
    let url = if ABSOLUTE_URL.is_match(input) {
        Url::parse(input)
    } else if input.starts_with("//") && !input.starts_with("///") {
        let scheme = if origin.is_secure() { "https:" } else { "http:" };
        Url::parse(&format!("{scheme}{input}"))
    } else if input.starts_with('/') && !input.starts_with("//") {
        Url::parse(&format!("{origin}{input}"))
    } else {
        return Err(format!("relative urls not allowed: ({input})"));
    }
    .map_err(|e| format!("invalid url ({input}): {e}"))?;

    if url.as_str().len() > URL_MAX_LENGTH {
        return Err(format!("urls must be < {URL_MAX_LENGTH} characters"));
    }
    Ok(url)
}

// ============================================================================
// GetOptions
// ============================================================================

/// Validated caller options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Sign in with this address only.
    pub required_email: Option<String>,
    /// Terms of service. Set only together with `privacy_policy`.
    pub terms_of_service: Option<Url>,
    /// Privacy policy. Set only together with `terms_of_service`.
    pub privacy_policy: Option<Url>,
    /// The caller allows long-lived sessions.
    pub allow_persistent: bool,
}

impl GetOptions {
    /// Validates the request params of a caller on `origin`.
    ///
    /// Terms of service and privacy policy are kept only as a pair.
    /// `tosURL` and `privacyURL` are accepted as aliases.
    ///
    /// # Errors
    ///
    /// - `invalid_required_email` if `requiredEmail` is not an address
    /// - `invalid_params` for non-object params or bad links
    pub fn from_params(
        origin: &Origin,
        params: &Value,
    ) -> std::result::Result<Self, NegotiationError> {
        let params = match params {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(NegotiationError::invalid_params(format!(
                    "options must be an object, got {other}"
                )));
            }
        };

        let required_email = match params.get("requiredEmail") {
            None | Some(Value::Null) => None,
            Some(Value::String(email)) if is_valid_email(email) => Some(email.clone()),
            Some(other) => {
                return Err(NegotiationError::invalid_required_email(other.to_string()));
            }
        };

        let link = |keys: [&str; 2]| -> std::result::Result<Option<Url>, NegotiationError> {
            let value = keys.iter().find_map(|key| params.get(*key).filter(|v| !v.is_null()));
            match value {
                None => Ok(None),
                Some(Value::String(s)) => fixup_url(origin, s)
                    .map(Some)
                    .map_err(NegotiationError::invalid_params),
                Some(other) => Err(NegotiationError::invalid_params(format!(
                    "urls must be strings: ({other})"
                ))),
            }
        };
        let terms = link(["termsOfService", "tosURL"])?;
        let privacy = link(["privacyPolicy", "privacyURL"])?;
        let (terms_of_service, privacy_policy) = match (terms, privacy) {
            (Some(terms), Some(privacy)) => (Some(terms), Some(privacy)),
            _ => (None, None),
        };

        let allow_persistent = match params
            .get("allowPersistent")
            .or_else(|| params.get("allow_persistent"))
        {
            None | Some(Value::Null) => false,
            Some(Value::Bool(allow)) => *allow,
            Some(other) => {
                return Err(NegotiationError::invalid_params(format!(
                    "invalid value for allowPersistent: {other}"
                )));
            }
        };

        Ok(Self {
            required_email,
            terms_of_service,
            privacy_policy,
            allow_persistent,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
