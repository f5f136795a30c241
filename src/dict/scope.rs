//! Scope guards for batching and scoped expiration.
//!
//! Both guards dereference to the mapping, so every mapping operation is
//! available inside the scope. Leaving the scope (normally, through `?`, or
//! by unwinding) restores the previous state.

use std::ops::{Deref, DerefMut};

use tracing::warn;

use super::RedisDict;
use crate::backend::Backend;
use crate::error::Result;
use crate::expiry::{Expiry, ExpiryHandle};

// == Batch Scope ==
/// Buffers mutations until the scope ends.
///
/// Nested scopes join the outermost one; its end submits everything as one
/// request. Call [`BatchScope::commit`] to observe flush errors; a scope that
/// is simply dropped still flushes and logs a failure instead.
pub struct BatchScope<'a, B: Backend> {
    dict: &'a mut RedisDict<B>,
    closed: bool,
}

impl<'a, B: Backend> BatchScope<'a, B> {
    fn new(dict: &'a mut RedisDict<B>) -> Self {
        dict.pipeline.begin();
        Self {
            dict,
            closed: false,
        }
    }

    /// Ends the scope, flushing when it is the outermost one.
    pub fn commit(mut self) -> Result<()> {
        self.closed = true;
        self.dict.end_batch()
    }
}

impl<B: Backend> Deref for BatchScope<'_, B> {
    type Target = RedisDict<B>;

    fn deref(&self) -> &Self::Target {
        &*self.dict
    }
}

impl<B: Backend> DerefMut for BatchScope<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.dict
    }
}

impl<B: Backend> Drop for BatchScope<'_, B> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.dict.end_batch() {
            warn!(
                "Batch flush for namespace '{}' failed on scope exit: {}",
                self.dict.namespace, err
            );
        }
    }
}

// == Expiry Scope ==
/// Applies an expiry to writes until the scope ends.
pub struct ExpiryScope<'a, B: Backend> {
    dict: &'a mut RedisDict<B>,
    handle: Option<ExpiryHandle>,
}

impl<B: Backend> Deref for ExpiryScope<'_, B> {
    type Target = RedisDict<B>;

    fn deref(&self) -> &Self::Target {
        &*self.dict
    }
}

impl<B: Backend> DerefMut for ExpiryScope<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.dict
    }
}

impl<B: Backend> Drop for ExpiryScope<'_, B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.dict.expiry.pop(handle);
        }
    }
}

impl<B: Backend> RedisDict<B> {
    // == Batching ==
    /// Opens a batch scope.
    pub fn begin_batch(&mut self) -> BatchScope<'_, B> {
        BatchScope::new(self)
    }

    /// Runs `f` inside a batch scope.
    ///
    /// The buffer is flushed even when `f` fails; an error from `f` takes
    /// precedence over a flush error.
    pub fn batch<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let mut scope = self.begin_batch();
        let outcome = f(&mut *scope);
        let flushed = scope.commit();

        match (outcome, flushed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(flush_err)) => {
                warn!("Batch flush failed after an earlier error: {}", flush_err);
                Err(err)
            }
        }
    }

    /// Submits the operations buffered so far without closing the scope.
    pub fn flush(&mut self) -> Result<()> {
        self.pipeline.flush(&self.backend).map(|_| ())
    }

    pub(super) fn end_batch(&mut self) -> Result<()> {
        self.pipeline.end(&self.backend).map(|_| ())
    }

    // == Scoped Expiration ==
    /// Applies `expiry` to writes until the returned guard is dropped.
    pub fn push_ttl(&mut self, expiry: impl Into<Expiry>) -> ExpiryScope<'_, B> {
        let handle = self.expiry.push(expiry.into());
        ExpiryScope {
            dict: self,
            handle: Some(handle),
        }
    }

    /// Runs `f` with `expiry` applied to its writes.
    pub fn with_expiry<T, F>(&mut self, expiry: impl Into<Expiry>, f: F) -> T
    where
        F: FnOnce(&mut Self) -> T,
    {
        let mut scope = self.push_ttl(expiry);
        f(&mut *scope)
    }
}
