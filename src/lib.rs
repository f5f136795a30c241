//! Redis Dict - A typed mapping over a flat key-value store
//!
//! Values keep their type through a round trip: every record is stored with a
//! type tag, and a registry of codecs turns values into text and back. The
//! mapping adds namespacing, scoped expiration, batched writes and an
//! optional insertion-ordered variant on top of any [`Backend`].
//!
//! ```
//! use redis_dict::{Expiry, RedisDict, Value};
//!
//! let mut dict = RedisDict::in_memory("sessions").unwrap();
//! dict.set("visits", 3).unwrap();
//! dict.with_expiry(Expiry::seconds(60), |dict| dict.set("token", "abc"))
//!     .unwrap();
//!
//! assert_eq!(dict.get("visits").unwrap(), Some(Value::Int(3)));
//! assert!(dict.get_ttl("token").unwrap().is_some());
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod dict;
pub mod error;
pub mod expiry;
pub mod keys;
pub mod pipeline;
pub mod tasks;

pub use backend::{Backend, BackendError, MemoryBackend};
pub use codec::{Complex, CustomObject, CustomValue, TypeRegistry, Value};
pub use config::{Config, RecordLayout};
pub use dict::{BatchScope, ExpiryScope, RedisDict};
pub use error::{DictError, Result};
pub use expiry::Expiry;
pub use keys::Namespace;
pub use tasks::spawn_cleanup_task;
