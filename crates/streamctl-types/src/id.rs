//! Session identity, validated once at construction.

use std::fmt;

use regex::Regex;
use std::sync::OnceLock;

fn safe_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex is valid"))
}

/// An opaque session identifier.
///
/// The only way to build one is [`SessionId::parse`], which rejects anything
/// that doesn't match `^[A-Za-z0-9_-]+$`. Every later path join or lease-key
/// derivation can then trust the value without re-checking it — this is the
/// path-traversal defense, pushed to the type boundary.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

/// Returned when a candidate session id fails the safe-id pattern.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid session id {0:?}: must match ^[A-Za-z0-9_-]+$")]
pub struct InvalidSessionId(pub String);

impl SessionId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidSessionId> {
        let raw = raw.into();
        if raw.is_empty() || !safe_id_pattern().is_match(&raw) {
            return Err(InvalidSessionId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A correlation id tying together a start/stop event pair and the log lines
/// the orchestrator emits while handling it. Plain `String` since it is
/// generated upstream (the bus publisher) and carries no internal structure
/// this crate needs to enforce.
pub type CorrelationId = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_underscore_dash() {
        assert!(SessionId::parse("s1").is_ok());
        assert!(SessionId::parse("session_1-a").is_ok());
        assert!(SessionId::parse("ABC123").is_ok());
    }

    #[test]
    fn rejects_path_traversal_attempts() {
        assert!(SessionId::parse("../etc/passwd").is_err());
        assert!(SessionId::parse("a/b").is_err());
        assert!(SessionId::parse("a b").is_err());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse(".").is_err());
    }

    #[test]
    fn display_roundtrips_the_raw_value() {
        let id = SessionId::parse("s1").unwrap();
        assert_eq!(id.to_string(), "s1");
        assert_eq!(id.as_str(), "s1");
    }
}
