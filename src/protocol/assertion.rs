//! Signed identity assertions.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Assertion
// ============================================================================

/// A signed proof that the user controls an address, bound to one audience.
///
/// The crate treats the assertion as opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assertion(String);

impl Assertion {
    /// Wraps serialized assertion text.
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the serialized assertion.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the assertion, returning its text.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Assertion {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Assertion {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
