//! Core identifiers shared by every store and the transfer engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw monetary amount in the smallest currency subunit.
///
/// Balances are never negative; signed so that credit deltas and
/// `P - N` counter values share one type.
pub type RawAmount = i64;

/// International Mobile Subscriber Identity, the stable subscriber key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Imsi(String);

impl Imsi {
    pub fn new(imsi: impl Into<String>) -> Self {
        Self(imsi.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Imsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Imsi {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Imsi {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Imsi {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imsi_serializes_as_plain_string() {
        let imsi = Imsi::new("IMSI001010000000001");
        let json = serde_json::to_string(&imsi).unwrap();
        assert_eq!(json, "\"IMSI001010000000001\"");
        let back: Imsi = serde_json::from_str(&json).unwrap();
        assert_eq!(back, imsi);
    }
}
