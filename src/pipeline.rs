//! Pipeline Module
//!
//! Buffers mutations issued inside a batch scope and submits them to the
//! backend as one request when the outermost scope ends.

use tracing::debug;

use crate::backend::{Backend, BatchOp, BatchReply};
use crate::error::Result;

// == Pipeline Buffer ==
/// Ordered buffer of pending backend operations.
///
/// Scopes nest by depth: inner scopes join the outer one and only the end of
/// the outermost scope flushes. Operations are submitted in append order,
/// without coalescing.
#[derive(Debug, Default)]
pub struct PipelineBuffer {
    ops: Vec<BatchOp>,
    depth: usize,
}

impl PipelineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a scope, returning the new nesting depth.
    pub fn begin(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations waiting for the flush, in submission order.
    pub fn pending(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn push(&mut self, op: BatchOp) {
        self.ops.push(op);
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = BatchOp>) {
        self.ops.extend(ops);
    }

    /// Closes a scope. Ending the outermost scope flushes the buffer.
    ///
    /// Calling `end` without an open scope flushes whatever is pending.
    pub fn end<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<Vec<BatchReply>> {
        self.depth = self.depth.saturating_sub(1);
        if self.depth > 0 {
            return Ok(Vec::new());
        }
        self.flush(backend)
    }

    /// Submits every pending operation as one batch and empties the buffer.
    ///
    /// The buffer is emptied even when submission fails; the error is
    /// returned to the caller instead of retrying.
    pub fn flush<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<Vec<BatchReply>> {
        if self.ops.is_empty() {
            return Ok(Vec::new());
        }

        let ops = std::mem::take(&mut self.ops);
        debug!("Flushing {} buffered operations", ops.len());
        Ok(backend.submit_batch(&ops)?)
    }
}
