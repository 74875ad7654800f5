//! Caller credential: the pre-issued bearer token for downstream APIs.
//!
//! A `Credential` can be read from a request body but can never be written
//! back out: it has no `Serialize` impl, its `Debug` is redacted, and the
//! secret is only reachable through [`Credential::expose`].

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::from(secret.into()))
    }

    /// Whether the credential is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }

    /// Raw secret. Only for building outbound `Authorization` headers.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// `Bearer <token>` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.expose())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Credential::new)
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let cred = Credential::new("super-secret-token");
        let dbg = format!("{cred:?}");
        assert!(!dbg.contains("super-secret-token"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn deserializes_from_plain_string() {
        let cred: Credential = serde_json::from_str(r#""tok""#).unwrap();
        assert_eq!(cred.expose(), "tok");
        assert_eq!(cred.bearer(), "Bearer tok");
    }

    #[test]
    fn blank_detection() {
        assert!(Credential::new("").is_blank());
        assert!(Credential::new("   ").is_blank());
        assert!(!Credential::new("tok").is_blank());
    }
}
