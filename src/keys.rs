//! Key Namespace Module
//!
//! Maps `(namespace, user key)` pairs to flat backend keys.
//!
//! # Key Scheme
//! - Value key: `<namespace>:<key>`
//! - Type key (sibling layout): `:type:<value key>`
//! - Order key (insertion-ordered mappings): `:order:<value key>`
//! - Order counter: `:order-seq:<namespace>`
//!
//! Namespaces never contain the separator, so the namespace of a value key is
//! everything before its first `:`. User keys may contain `:`; chained keys
//! rely on it. Metadata keys all start with `:` and therefore never fall under
//! a namespace prefix.

use std::fmt;
use std::str::FromStr;

use crate::error::{DictError, Result};

// == Public Constants ==
/// Separator between namespace and key, and between chained key parts
pub const SEPARATOR: char = ':';

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "main";

const TYPE_KEY_PREFIX: &str = ":type:";
const ORDER_KEY_PREFIX: &str = ":order:";
const ORDER_SEQUENCE_PREFIX: &str = ":order-seq:";

// == Namespace ==
/// A validated namespace: non-empty and free of the separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("namespace must not be empty".to_string())
        } else if name.contains(SEPARATOR) {
            Some(format!("namespace must not contain '{}'", SEPARATOR))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(DictError::InvalidNamespace {
                namespace: name,
                reason,
            }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every value key of this namespace, separator included.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.0, SEPARATOR)
    }

    pub fn to_backend_key(&self, key: &str) -> String {
        format!("{}{}{}", self.0, SEPARATOR, key)
    }

    /// Returns the user key when `backend_key` belongs to this namespace.
    pub fn strip<'a>(&self, backend_key: &'a str) -> Option<&'a str> {
        backend_key
            .strip_prefix(self.0.as_str())?
            .strip_prefix(SEPARATOR)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self(DEFAULT_NAMESPACE.to_string())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = DictError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// == Key Derivation ==
pub fn to_backend_key(namespace: &Namespace, key: &str) -> String {
    namespace.to_backend_key(key)
}

/// Splits a value key into namespace and user key.
///
/// Returns `None` for metadata keys and keys without a separator.
pub fn from_backend_key(backend_key: &str) -> Option<(Namespace, String)> {
    let (namespace, key) = backend_key.split_once(SEPARATOR)?;
    let namespace = Namespace::new(namespace).ok()?;
    Some((namespace, key.to_string()))
}

/// Sibling key holding the type tag of `backend_key`.
pub fn to_type_key(backend_key: &str) -> String {
    format!("{}{}", TYPE_KEY_PREFIX, backend_key)
}

/// Key holding the insertion sequence number of `backend_key`.
pub fn to_order_key(backend_key: &str) -> String {
    format!("{}{}", ORDER_KEY_PREFIX, backend_key)
}

/// Counter handing out insertion sequence numbers for `namespace`.
pub fn order_sequence_key(namespace: &Namespace) -> String {
    format!("{}{}", ORDER_SEQUENCE_PREFIX, namespace)
}

/// Joins key parts with the separator.
pub fn chain_key<S: AsRef<str>>(parts: &[S]) -> String {
    let mut key = String::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            key.push(SEPARATOR);
        }
        key.push_str(part.as_ref());
    }
    key
}

/// True for keys that hold mapping metadata rather than values.
pub fn is_metadata_key(backend_key: &str) -> bool {
    backend_key.starts_with(SEPARATOR)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_key_round_trip() {
        let namespace = Namespace::new("users").unwrap();
        let backend_key = to_backend_key(&namespace, "alice");

        assert_eq!(backend_key, "users:alice");
        assert_eq!(
            from_backend_key(&backend_key),
            Some((namespace, "alice".to_string()))
        );
    }

    #[test]
    fn test_keys_may_contain_separator() {
        let namespace = Namespace::default();
        let backend_key = namespace.to_backend_key("user:1:name");

        assert_eq!(backend_key, "main:user:1:name");
        assert_eq!(namespace.strip(&backend_key), Some("user:1:name"));

        let (parsed, key) = from_backend_key(&backend_key).unwrap();
        assert_eq!(parsed.as_str(), "main");
        assert_eq!(key, "user:1:name");
    }

    #[test]
    fn test_invalid_namespaces() {
        assert!(matches!(
            Namespace::new(""),
            Err(DictError::InvalidNamespace { .. })
        ));
        assert!(matches!(
            "a:b".parse::<Namespace>(),
            Err(DictError::InvalidNamespace { namespace, .. }) if namespace == "a:b"
        ));
    }

    #[test]
    fn test_prefix_does_not_match_longer_namespace() {
        let short = Namespace::new("ns").unwrap();
        let long = Namespace::new("ns2").unwrap();

        let key = long.to_backend_key("foo");
        assert!(!key.starts_with(&short.prefix()));
        assert_eq!(short.strip(&key), None);
        assert_eq!(long.strip(&key), Some("foo"));
    }

    #[test]
    fn test_metadata_keys_never_fall_under_a_namespace() {
        let namespace = Namespace::default();
        let value_key = namespace.to_backend_key("foo");

        for metadata in [
            to_type_key(&value_key),
            to_order_key(&value_key),
            order_sequence_key(&namespace),
        ] {
            assert!(is_metadata_key(&metadata));
            assert!(!metadata.starts_with(&namespace.prefix()));
            assert_eq!(from_backend_key(&metadata), None);
        }
        assert_eq!(to_type_key(&value_key), ":type:main:foo");
    }

    #[test]
    fn test_chain_key() {
        assert_eq!(chain_key(&["user", "1", "name"]), "user:1:name");
        assert_eq!(chain_key(&["solo"]), "solo");
        assert_eq!(chain_key::<&str>(&[]), "");
    }
}
