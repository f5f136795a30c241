//! Background Tasks Module
//!
//! Periodic maintenance for the in-memory backend.
//!
//! # Tasks
//! - Expiry sweep: removes expired keys that were never read again

mod cleanup;

pub use cleanup::spawn_cleanup_task;
