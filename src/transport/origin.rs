//! Web origins and origin matching.
//!
//! An [`Origin`] is the `scheme://host[:port]` triple of an `http` or `https`
//! URL, normalized to lowercase with default ports omitted. A
//! [`TargetOrigin`] is what a sender or a channel is willing to talk to:
//! exactly one origin, or `*` for discovery.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Origin
// ============================================================================

/// A normalized web origin, e.g. `https://rp.example`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Origin(String);

impl Origin {
    /// Parses an origin from an origin string or any URL on that origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrigin`] unless the input is an `http` or
    /// `https` URL with a host.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|_| Error::invalid_origin(input))?;
        Self::from_url(&url)
    }

    /// Extracts the origin of a URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrigin`] for non-http(s) or host-less URLs.
    pub fn from_url(url: &Url) -> Result<Self> {
        match url.scheme() {
            "http" | "https" if url.host().is_some() => {
                Ok(Self(url.origin().ascii_serialization().to_lowercase()))
            }
            _ => Err(Error::invalid_origin(url.as_str())),
        }
    }

    /// Returns the serialized origin.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the origin uses `https`.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.0.starts_with("https://")
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Origin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Origin {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        origin.0
    }
}

// ============================================================================
// TargetOrigin
// ============================================================================

/// The set of origins a message may be delivered to, or accepted from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetOrigin {
    /// Wildcard `*`. Only for initial discovery; never for sensitive payloads.
    Any,
    /// Exactly one origin.
    Exact(Origin),
}

impl TargetOrigin {
    /// Parses `*` or an origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrigin`] if the input is neither.
    pub fn parse(input: &str) -> Result<Self> {
        if input == "*" {
            return Ok(Self::Any);
        }
        Origin::parse(input).map(Self::Exact)
    }

    /// Returns `true` if `origin` is acceptable.
    #[inline]
    #[must_use]
    pub fn matches(&self, origin: &Origin) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == origin,
        }
    }

    /// Returns `true` for the wildcard.
    #[inline]
    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(origin) => origin.fmt(f),
        }
    }
}

impl From<Origin> for TargetOrigin {
    fn from(origin: Origin) -> Self {
        Self::Exact(origin)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_normalizes_case_and_path() {
        let origin = Origin::parse("HTTPS://RP.Example/path?q=1").expect("origin");
        assert_eq!(origin.as_str(), "https://rp.example");
    }

    #[test]
    fn test_origin_omits_default_port() {
        let origin = Origin::parse("https://rp.example:443/").expect("origin");
        assert_eq!(origin.as_str(), "https://rp.example");

        let origin = Origin::parse("http://localhost:10001").expect("origin");
        assert_eq!(origin.as_str(), "http://localhost:10001");
    }

    #[test]
    fn test_origin_rejects_other_schemes() {
        assert!(Origin::parse("ftp://rp.example").is_err());
        assert!(Origin::parse("not a url").is_err());
        assert!(Origin::parse("data:text/html,hi").is_err());
    }

    #[test]
    fn test_target_origin_matching() {
        let rp = Origin::parse("https://rp.example").expect("origin");
        let evil = Origin::parse("https://evil.example").expect("origin");

        let exact = TargetOrigin::from(rp.clone());
        assert!(exact.matches(&rp));
        assert!(!exact.matches(&evil));

        let any = TargetOrigin::parse("*").expect("wildcard");
        assert!(any.is_any());
        assert!(any.matches(&evil));
    }

    #[test]
    fn test_origin_serde_roundtrip_validates() {
        let parsed: std::result::Result<Origin, _> = serde_json::from_str("\"javascript:1\"");
        assert!(parsed.is_err());
    }
}
