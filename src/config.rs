//! Configuration Module
//!
//! Handles loading and managing mapping configuration from environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;

use crate::backend::{DEFAULT_SCAN_COUNT, MAX_VALUE_SIZE};
use crate::codec::DEFAULT_MAX_DEPTH;
use crate::expiry::Expiry;
use crate::keys::DEFAULT_NAMESPACE;

/// Default number of selections `popitem` tries before giving up
pub const DEFAULT_POPITEM_ATTEMPTS: usize = 16;

// == Record Layout ==
/// Where the type tag of a record is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordLayout {
    /// Value key holds `<tag>:<payload>`
    #[default]
    Inline,
    /// Value key holds the payload; the tag lives under the sibling type key
    Sibling,
}

impl FromStr for RecordLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(RecordLayout::Inline),
            "sibling" => Ok(RecordLayout::Sibling),
            other => Err(format!("unknown record layout '{}'", other)),
        }
    }
}

impl fmt::Display for RecordLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordLayout::Inline => f.write_str("inline"),
            RecordLayout::Sibling => f.write_str("sibling"),
        }
    }
}

// == Config ==
/// Mapping configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the mapping's keys live under
    pub namespace: String,
    /// Default TTL in seconds for writes, None = never expire
    pub default_ttl_secs: Option<i64>,
    /// Keep the remaining TTL of keys that are overwritten
    pub preserve_expiration: bool,
    /// Track insertion order (ordered iteration, LIFO popitem)
    pub insertion_order: bool,
    /// Persisted record layout
    pub layout: RecordLayout,
    /// Nesting limit of the nested codec
    pub max_depth: usize,
    /// Selections popitem tries before reporting a concurrent modification
    pub popitem_attempts: usize,
    /// Largest encoded record accepted, in bytes
    pub max_value_size: usize,
    /// Keys requested per scan page
    pub scan_count: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_DICT_NAMESPACE` - Key namespace (default: main)
    /// - `REDIS_DICT_EXPIRE` - Default TTL in seconds (default: none)
    /// - `REDIS_DICT_PRESERVE_EXPIRATION` - true/false (default: false)
    /// - `REDIS_DICT_INSERTION_ORDER` - true/false (default: false)
    /// - `REDIS_DICT_LAYOUT` - inline or sibling (default: inline)
    /// - `REDIS_DICT_MAX_DEPTH` - Nested codec depth limit (default: 64)
    /// - `REDIS_DICT_POPITEM_ATTEMPTS` - popitem retry bound (default: 16)
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace: env::var("REDIS_DICT_NAMESPACE")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.namespace),
            default_ttl_secs: env::var("REDIS_DICT_EXPIRE")
                .ok()
                .and_then(|v| v.parse().ok()),
            preserve_expiration: env::var("REDIS_DICT_PRESERVE_EXPIRATION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.preserve_expiration),
            insertion_order: env::var("REDIS_DICT_INSERTION_ORDER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.insertion_order),
            layout: env::var("REDIS_DICT_LAYOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.layout),
            max_depth: env::var("REDIS_DICT_MAX_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_depth),
            popitem_attempts: env::var("REDIS_DICT_POPITEM_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.popitem_attempts),
            ..defaults
        }
    }

    // == Builders ==
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_default_ttl_secs(mut self, seconds: Option<i64>) -> Self {
        self.default_ttl_secs = seconds;
        self
    }

    pub fn with_preserve_expiration(mut self, preserve: bool) -> Self {
        self.preserve_expiration = preserve;
        self
    }

    pub fn with_insertion_order(mut self, insertion_order: bool) -> Self {
        self.insertion_order = insertion_order;
        self
    }

    pub fn with_layout(mut self, layout: RecordLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_popitem_attempts(mut self, attempts: usize) -> Self {
        self.popitem_attempts = attempts.max(1);
        self
    }

    pub fn with_max_value_size(mut self, max_value_size: usize) -> Self {
        self.max_value_size = max_value_size;
        self
    }

    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count.max(1);
        self
    }

    /// Instance-level default expiry.
    pub fn default_expiry(&self) -> Expiry {
        Expiry::from_secs_opt(self.default_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_ttl_secs: None,
            preserve_expiration: false,
            insertion_order: false,
            layout: RecordLayout::Inline,
            max_depth: DEFAULT_MAX_DEPTH,
            popitem_attempts: DEFAULT_POPITEM_ATTEMPTS,
            max_value_size: MAX_VALUE_SIZE,
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }
}
