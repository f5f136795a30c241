//! Expiration Policy Module
//!
//! Decides the TTL applied to each write: the innermost scoped override, the
//! instance default, or (with preserve-expiration) the remaining TTL of the
//! key being overwritten.

use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::{Backend, KeyTtl};

// == Expiry ==
/// Expiration requested for new writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Keys do not expire
    #[default]
    Never,
    /// Keys expire after the duration; zero or negative expires immediately
    After(chrono::Duration),
}

impl Expiry {
    /// Expiry after `seconds`.
    ///
    /// Values beyond the range of a duration saturate: large positive ones
    /// never expire and large negative ones expire immediately.
    pub fn seconds(seconds: i64) -> Self {
        Self::saturating(chrono::Duration::try_seconds(seconds), seconds)
    }

    pub fn millis(millis: i64) -> Self {
        Self::saturating(chrono::Duration::try_milliseconds(millis), millis)
    }

    fn saturating(duration: Option<chrono::Duration>, amount: i64) -> Self {
        match duration {
            Some(duration) => Expiry::After(duration),
            None if amount > 0 => Expiry::Never,
            None => Expiry::After(chrono::Duration::zero()),
        }
    }

    /// `None` means no expiration.
    pub fn from_secs_opt(seconds: Option<i64>) -> Self {
        seconds.map_or(Expiry::Never, Expiry::seconds)
    }

    /// Resolves the expiry into what a write should do.
    pub fn to_write_ttl(self) -> WriteTtl {
        match self {
            Expiry::Never => WriteTtl::Persist,
            Expiry::After(duration) => match duration.to_std() {
                Ok(ttl) if !ttl.is_zero() => WriteTtl::After(ttl),
                // to_std fails for negative durations
                _ => WriteTtl::Immediate,
            },
        }
    }
}

impl From<chrono::Duration> for Expiry {
    fn from(duration: chrono::Duration) -> Self {
        Expiry::After(duration)
    }
}

impl From<Duration> for Expiry {
    fn from(duration: Duration) -> Self {
        chrono::Duration::from_std(duration).map_or(Expiry::Never, Expiry::After)
    }
}

impl<T: Into<Expiry>> From<Option<T>> for Expiry {
    fn from(expiry: Option<T>) -> Self {
        expiry.map_or(Expiry::Never, Into::into)
    }
}

// == Write TTL ==
/// What a single write does with expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTtl {
    /// Store without expiration
    Persist,
    /// Store with the given time to live
    After(Duration),
    /// The write is turned into a delete
    Immediate,
}

impl WriteTtl {
    /// TTL to hand to the backend, `None` for persistent writes.
    pub fn as_backend_ttl(self) -> Option<Duration> {
        match self {
            WriteTtl::After(ttl) => Some(ttl),
            WriteTtl::Persist | WriteTtl::Immediate => None,
        }
    }
}

// == Expiry Stack ==
/// Handle returned by [`ExpiryStack::push`], consumed by [`ExpiryStack::pop`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "the scope must be popped to restore the previous expiry"]
pub struct ExpiryHandle {
    depth: usize,
}

/// Stack of scoped expiry overrides over an instance default.
#[derive(Debug, Clone, Default)]
pub struct ExpiryStack {
    default: Expiry,
    scopes: Vec<Expiry>,
}

impl ExpiryStack {
    pub fn new(default: Expiry) -> Self {
        Self {
            default,
            scopes: Vec::new(),
        }
    }

    pub fn default_expiry(&self) -> Expiry {
        self.default
    }

    pub fn set_default(&mut self, default: Expiry) {
        self.default = default;
    }

    /// Number of active scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push(&mut self, expiry: Expiry) -> ExpiryHandle {
        let handle = ExpiryHandle {
            depth: self.scopes.len(),
        };
        self.scopes.push(expiry);
        handle
    }

    /// Restores the state from before the matching `push`.
    ///
    /// Popping an outer handle also discards every scope pushed after it.
    pub fn pop(&mut self, handle: ExpiryHandle) {
        self.scopes.truncate(handle.depth);
    }

    /// The innermost scope, or the default when no scope is active.
    pub fn effective(&self) -> Expiry {
        self.scopes.last().copied().unwrap_or(self.default)
    }

    /// Plans the TTL of a write to `key`.
    ///
    /// With `preserve` set and the key present, its remaining lifetime is
    /// kept: a persistent key stays persistent and an expiring key keeps its
    /// deadline. A missing key or a failed TTL read falls back to
    /// [`ExpiryStack::effective`].
    pub fn plan_write<B: Backend + ?Sized>(&self, backend: &B, key: &str, preserve: bool) -> WriteTtl {
        let fallback = self.effective().to_write_ttl();
        if !preserve {
            return fallback;
        }

        match backend.ttl(key) {
            Ok(KeyTtl::Persistent) => WriteTtl::Persist,
            Ok(KeyTtl::Expires(remaining)) if !remaining.is_zero() => WriteTtl::After(remaining),
            Ok(_) => {
                debug!("No live key at '{}', applying {:?}", key, fallback);
                fallback
            }
            Err(err) => {
                warn!(
                    "Failed to read TTL of '{}' ({}), applying {:?} instead",
                    key, err, fallback
                );
                fallback
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_effective_is_innermost_scope() {
        let mut stack = ExpiryStack::new(Expiry::seconds(60));
        assert_eq!(stack.effective(), Expiry::seconds(60));

        let outer = stack.push(Expiry::seconds(5));
        let inner = stack.push(Expiry::Never);
        assert_eq!(stack.effective(), Expiry::Never);

        stack.pop(inner);
        assert_eq!(stack.effective(), Expiry::seconds(5));
        stack.pop(outer);
        assert_eq!(stack.effective(), Expiry::seconds(60));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_popping_outer_discards_inner_scopes() {
        let mut stack = ExpiryStack::default();
        let outer = stack.push(Expiry::seconds(5));
        let _inner = stack.push(Expiry::seconds(1));

        stack.pop(outer);
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.effective(), Expiry::Never);
    }

    #[test]
    fn test_non_positive_ttl_expires_immediately() {
        assert_eq!(Expiry::seconds(0).to_write_ttl(), WriteTtl::Immediate);
        assert_eq!(Expiry::seconds(-5).to_write_ttl(), WriteTtl::Immediate);
        assert_eq!(Expiry::Never.to_write_ttl(), WriteTtl::Persist);
        assert_eq!(
            Expiry::millis(1500).to_write_ttl(),
            WriteTtl::After(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_out_of_range_amounts_saturate() {
        assert_eq!(Expiry::seconds(i64::MAX), Expiry::Never);
        assert_eq!(Expiry::seconds(i64::MAX / 999), Expiry::Never);
        assert!(matches!(Expiry::millis(i64::MAX), Expiry::After(_)));
        assert_eq!(Expiry::seconds(i64::MIN).to_write_ttl(), WriteTtl::Immediate);
        assert_eq!(Expiry::millis(i64::MIN).to_write_ttl(), WriteTtl::Immediate);
        assert_eq!(Expiry::from_secs_opt(Some(i64::MAX)), Expiry::Never);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Expiry::from(Duration::from_secs(3)), Expiry::seconds(3));
        assert_eq!(Expiry::from(Option::<Duration>::None), Expiry::Never);
        assert_eq!(Expiry::from_secs_opt(Some(10)), Expiry::seconds(10));
        assert_eq!(Expiry::from(chrono::Duration::minutes(1)), Expiry::seconds(60));
    }

    #[test]
    fn test_plan_write_without_preserve_uses_effective() {
        let backend = MemoryBackend::new();
        backend
            .set("main:a", "int:1", Some(Duration::from_secs(100)))
            .unwrap();
        let stack = ExpiryStack::new(Expiry::seconds(5));

        assert_eq!(
            stack.plan_write(&backend, "main:a", false),
            WriteTtl::After(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_plan_write_preserves_remaining_ttl() {
        let backend = MemoryBackend::new();
        backend
            .set("main:a", "int:1", Some(Duration::from_secs(100)))
            .unwrap();
        backend.set("main:b", "int:2", None).unwrap();
        let stack = ExpiryStack::new(Expiry::seconds(5));

        match stack.plan_write(&backend, "main:a", true) {
            WriteTtl::After(ttl) => assert!(ttl > Duration::from_secs(95)),
            other => panic!("expected preserved ttl, got {:?}", other),
        }
        assert_eq!(stack.plan_write(&backend, "main:b", true), WriteTtl::Persist);
        assert_eq!(
            stack.plan_write(&backend, "main:missing", true),
            WriteTtl::After(Duration::from_secs(5))
        );
    }
}
