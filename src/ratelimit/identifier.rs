//! Identifier key generation.

use crate::error::{Result, WardenError};

/// Client address used when the interceptor cannot determine one.
pub const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

/// Check that `namespace` can prefix an identifier key.
///
/// The namespace must be non-empty and free of `:`, which separates it from
/// the client address.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(WardenError::InvalidIdentifier(
            "namespace is empty".to_string(),
        ));
    }
    if namespace.contains(':') {
        return Err(WardenError::InvalidIdentifier(format!(
            "namespace '{}' must not contain ':'",
            namespace
        )));
    }
    Ok(())
}

/// A key that groups requests for rate limiting.
///
/// The key is a namespace followed by the client address, e.g.
/// `api:203.0.113.5`. The namespace is the route class name unless the caller
/// keys its own bucket under the class's limits (`analytics:203.0.113.5`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    /// Namespace, usually the route class name
    pub class: String,
    /// Client address
    pub client: String,
}

impl Identifier {
    /// Create a new identifier, falling back to the loopback address for an empty client.
    pub fn new(class: &str, client: &str) -> Self {
        let client = client.trim();
        Self {
            class: class.to_string(),
            client: if client.is_empty() {
                FALLBACK_CLIENT_IP.to_string()
            } else {
                client.to_string()
            },
        }
    }

    /// Convert the identifier to its store key.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.class, self.client)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_to_string() {
        let id = Identifier::new("auth", "203.0.113.7");
        assert_eq!(id.to_string_key(), "auth:203.0.113.7");
        assert_eq!(id.to_string(), "auth:203.0.113.7");
    }

    #[test]
    fn test_empty_client_falls_back_to_loopback() {
        let id = Identifier::new("general", "  ");
        assert_eq!(id.client, FALLBACK_CLIENT_IP);
        assert_eq!(id.to_string_key(), "general:127.0.0.1");
    }

    #[test]
    fn test_validate_namespace() {
        assert!(validate_namespace("analytics").is_ok());
        assert!(matches!(
            validate_namespace(""),
            Err(WardenError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            validate_namespace("api:v2"),
            Err(WardenError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_identifier_equality() {
        assert_eq!(Identifier::new("api", "::1"), Identifier::new("api", "::1"));
        assert_ne!(Identifier::new("api", "::1"), Identifier::new("auth", "::1"));
    }
}
