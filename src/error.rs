//! Error types for the typed mapping
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

use crate::backend::BackendError;

// == Dict Error Enum ==
/// Unified error type for codec, namespace and mapping operations.
///
/// Every variant carries the key, namespace or tag involved so that a failure
/// can be diagnosed from the message alone.
#[derive(Error, Debug)]
pub enum DictError {
    /// No registered codec accepts the value
    #[error("Unsupported type: no codec registered for values of type '{type_name}'")]
    UnsupportedType { type_name: String },

    /// The stored tag is not registered in this process
    #[error("Unknown type tag '{tag}'{}", key_context(.key))]
    UnknownTag { tag: String, key: Option<String> },

    /// A codec with the same tag is already registered
    #[error("Duplicate type tag '{tag}'")]
    DuplicateTag { tag: String },

    /// Encode and decode are not inverses on a sample value
    #[error("Invalid encoder for tag '{tag}': {reason}")]
    InvalidEncoder { tag: String, reason: String },

    /// A codec failed to encode a value it accepted
    #[error("Failed to encode value as '{tag}': {reason}")]
    Encode { tag: String, reason: String },

    /// A payload could not be decoded by its codec
    #[error("Failed to decode '{tag}' payload{}: {reason}", key_context(.key))]
    Decode {
        tag: String,
        key: Option<String>,
        reason: String,
    },

    /// A backend value does not follow the persisted record layout
    #[error("Corrupt record at '{key}': {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Key not present in the namespace
    #[error("Key not found: '{key}' in namespace '{namespace}'")]
    KeyNotFound { namespace: String, key: String },

    /// popitem on a mapping without entries
    #[error("popitem(): mapping '{namespace}' is empty")]
    EmptyMapping { namespace: String },

    /// Selected entries kept disappearing before they could be removed
    #[error("Concurrent modification in namespace '{namespace}': gave up after {attempts} attempts")]
    ConcurrentModification { namespace: String, attempts: usize },

    /// Nested value exceeds the configured depth limit
    #[error("Nesting depth exceeds the limit of {limit}")]
    DepthExceeded { limit: usize },

    /// Namespace is empty or contains the key separator
    #[error("Invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    /// Encoded record is larger than the configured maximum
    #[error("Value for '{key}' is {size} bytes, exceeding the limit of {limit} bytes")]
    ValueTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    /// Failure reported by the key-value backend
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl DictError {
    /// Attaches the key being read to decode-time errors.
    pub fn with_key(self, key: &str) -> Self {
        match self {
            DictError::UnknownTag { tag, key: None } => DictError::UnknownTag {
                tag,
                key: Some(key.to_string()),
            },
            DictError::Decode {
                tag,
                key: None,
                reason,
            } => DictError::Decode {
                tag,
                key: Some(key.to_string()),
                reason,
            },
            other => other,
        }
    }
}

fn key_context(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(" at key '{}'", key),
        None => String::new(),
    }
}

// == Result Type Alias ==
/// Convenience Result type for the mapping.
pub type Result<T> = std::result::Result<T, DictError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_key_attaches_context() {
        let err = DictError::UnknownTag {
            tag: "Person".to_string(),
            key: None,
        }
        .with_key("main:alice");

        assert_eq!(
            err.to_string(),
            "Unknown type tag 'Person' at key 'main:alice'"
        );
    }

    #[test]
    fn test_with_key_keeps_existing_key() {
        let err = DictError::Decode {
            tag: "int".to_string(),
            key: Some("main:a".to_string()),
            reason: "invalid digit".to_string(),
        }
        .with_key("main:b");

        assert!(err.to_string().contains("main:a"));
    }

    #[test]
    fn test_backend_error_is_transparent() {
        let err: DictError = BackendError::Unavailable("connection reset".to_string()).into();
        assert_eq!(err.to_string(), "Backend unavailable: connection reset");
    }
}
