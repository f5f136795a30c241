//! Mapping Module
//!
//! [`RedisDict`] turns a flat key-value [`Backend`] into a typed, enumerable
//! mapping. Every value is stored with its type tag so that reads return the
//! type that was written.
//!
//! One instance owns its codec registry, expiration stack and pipeline
//! buffer, and is meant to be used from one thread at a time. Instances share
//! data only through the backend: two instances with the same namespace on
//! the same backend see the same entries.

mod iter;
mod scope;


use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::debug;

use crate::backend::{Backend, BatchOp, BatchReply, KeyTtl, MemoryBackend};
use crate::codec::{TypeRegistry, Value};
use crate::config::{Config, RecordLayout};
use crate::error::{DictError, Result};
use crate::expiry::{Expiry, ExpiryStack, WriteTtl};
use crate::keys::{self, Namespace, SEPARATOR};
use crate::pipeline::PipelineBuffer;

pub use iter::{Items, Keys, ScanKeys, Values};
pub use scope::{BatchScope, ExpiryScope};

// == Redis Dict ==
/// Typed mapping persisted in a key-value backend.
///
/// # Example
/// ```
/// use redis_dict::{Config, MemoryBackend, RedisDict, Value};
///
/// let mut dict = RedisDict::new(MemoryBackend::new(), Config::default()).unwrap();
/// dict.set("foo", 42).unwrap();
/// dict.set("baz", "hello world").unwrap();
///
/// assert_eq!(dict.get("foo").unwrap(), Some(Value::Int(42)));
/// assert_eq!(dict.len().unwrap(), 2);
/// ```
pub struct RedisDict<B: Backend = MemoryBackend> {
    backend: B,
    namespace: Namespace,
    registry: TypeRegistry,
    config: Config,
    expiry: ExpiryStack,
    pipeline: PipelineBuffer,
}

impl RedisDict<MemoryBackend> {
    /// Mapping over a fresh in-memory backend.
    pub fn in_memory(namespace: &str) -> Result<Self> {
        Self::new(
            MemoryBackend::new(),
            Config::default().with_namespace(namespace),
        )
    }
}

impl<B: Backend> RedisDict<B> {
    // == Constructors ==
    /// Creates a mapping with the built-in codecs.
    ///
    /// Fails with `InvalidNamespace` when the configured namespace is empty
    /// or contains `:`.
    pub fn new(backend: B, config: Config) -> Result<Self> {
        Self::with_registry(backend, config, TypeRegistry::new())
    }

    /// Creates a mapping around an existing registry.
    ///
    /// Use this to share one set of extension types between mappings: build
    /// the registry once and pass a clone to each.
    pub fn with_registry(backend: B, config: Config, mut registry: TypeRegistry) -> Result<Self> {
        let namespace = Namespace::new(config.namespace.clone())?;
        registry.set_max_depth(config.max_depth);

        Ok(Self {
            backend,
            namespace,
            registry,
            expiry: ExpiryStack::new(config.default_expiry()),
            config,
            pipeline: PipelineBuffer::new(),
        })
    }

    // == Accessors ==
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Expiry applied to writes right now.
    pub fn effective_expiry(&self) -> Expiry {
        self.expiry.effective()
    }

    pub fn set_default_expiry(&mut self, expiry: impl Into<Expiry>) {
        self.expiry.set_default(expiry.into());
    }

    /// True while a batch scope is open.
    pub fn is_batching(&self) -> bool {
        self.pipeline.is_active()
    }

    /// Number of operations waiting for the current batch to flush.
    pub fn pending_operations(&self) -> usize {
        self.pipeline.len()
    }

    // == Extension Types ==
    /// Registers a codec for the Rust type `T`; see [`TypeRegistry::register_type`].
    pub fn register_type<T, E, D>(&mut self, tag: &str, encode: E, decode: D) -> Result<()>
    where
        T: crate::codec::CustomObject,
        E: Fn(&T) -> anyhow::Result<String> + Send + Sync + 'static,
        D: Fn(&str) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.registry.register_type(tag, encode, decode)
    }

    /// Registers a structural codec; see [`TypeRegistry::register`].
    pub fn register<M, E, D>(&mut self, tag: &str, matches: M, encode: E, decode: D) -> Result<()>
    where
        M: Fn(&Value) -> bool + Send + Sync + 'static,
        E: Fn(&Value) -> anyhow::Result<String> + Send + Sync + 'static,
        D: Fn(&str) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.registry.register(tag, matches, encode, decode)
    }

    // == Writes ==
    /// Stores `value` under `key`.
    ///
    /// The TTL is the innermost expiry scope or the instance default; with
    /// preserve-expiration an existing key keeps its remaining TTL. A zero or
    /// negative TTL deletes the key instead. Inside a batch scope the write
    /// is buffered.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let ops = self.write_ops(key, &value.into())?;
        self.execute(ops)
    }

    /// Removes `key`. Removing a missing key is not an error.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let value_key = self.namespace.to_backend_key(key);
        let ops = self.delete_ops(&value_key);
        self.execute(ops)
    }

    /// Stores every entry in one batch.
    pub fn update<I, K, V>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.batch(|dict| {
            for (key, value) in entries {
                dict.set(key.as_ref(), value)?;
            }
            Ok(())
        })
    }

    /// Stores `value` under every key, in one batch.
    pub fn from_keys<I, K>(&mut self, keys: I, value: impl Into<Value>) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let value = value.into();
        self.batch(|dict| {
            for key in keys {
                dict.set(key.as_ref(), value.clone())?;
            }
            Ok(())
        })
    }

    // == Reads ==
    /// Reads `key`, or `None` when it is absent.
    ///
    /// Inside a batch scope reads observe the backend, not buffered writes.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let value_key = self.namespace.to_backend_key(key);
        Ok(self.load_many(&[value_key])?.pop().flatten())
    }

    /// Reads `key`, failing with `KeyNotFound` when it is absent.
    pub fn get_item(&self, key: &str) -> Result<Value> {
        self.get(key)?.ok_or_else(|| self.not_found(key))
    }

    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.backend.exists(&self.namespace.to_backend_key(key))?)
    }

    /// Remaining TTL of `key`; `None` when it is absent or never expires.
    pub fn get_ttl(&self, key: &str) -> Result<Option<Duration>> {
        match self.backend.ttl(&self.namespace.to_backend_key(key))? {
            KeyTtl::Expires(remaining) => Ok(Some(remaining)),
            KeyTtl::Persistent | KeyTtl::Missing => Ok(None),
        }
    }

    // == Read-Modify-Write ==
    /// Removes `key` and returns its value, failing with `KeyNotFound`.
    ///
    /// Runs immediately, even inside a batch scope. When several callers pop
    /// the same key, exactly one receives the value.
    pub fn pop(&mut self, key: &str) -> Result<Value> {
        self.take(key)?.ok_or_else(|| self.not_found(key))
    }

    /// Like [`RedisDict::pop`], returning `default` for a missing key.
    pub fn pop_or(&mut self, key: &str, default: impl Into<Value>) -> Result<Value> {
        Ok(self.take(key)?.unwrap_or_else(|| default.into()))
    }

    /// Returns the value of `key`, storing `default` first when it is absent.
    ///
    /// Runs immediately, even inside a batch scope.
    pub fn setdefault(&mut self, key: &str, default: impl Into<Value>) -> Result<Value> {
        let default = default.into();
        let value_key = self.namespace.to_backend_key(key);
        let (tag, payload) = self.registry.encode_value(&default)?;
        let plan = self
            .expiry
            .plan_write(&self.backend, &value_key, self.config.preserve_expiration);
        if plan == WriteTtl::Immediate {
            return Ok(self.get(key)?.unwrap_or(default));
        }
        let ttl = plan.as_backend_ttl();

        match self.config.layout {
            RecordLayout::Inline => {
                let record = self.checked_record(key, format!("{}{}{}", tag, SEPARATOR, payload))?;
                if let Some(existing) = self.backend.set_if_absent(&value_key, &record, ttl)? {
                    return self.decode_inline(&value_key, &existing);
                }
            }
            RecordLayout::Sibling => {
                let payload = self.checked_record(key, payload)?;
                // Claim the type key first: a reader that sees it without a
                // payload treats the key as absent
                let type_key = keys::to_type_key(&value_key);
                if self.backend.set_if_absent(&type_key, &tag, ttl)?.is_some() {
                    if let Some(existing) = self.get(key)? {
                        return Ok(existing);
                    }
                    self.backend.set(&type_key, &tag, ttl)?;
                }
                self.backend.set(&value_key, &payload, ttl)?;
            }
        }

        if self.config.insertion_order {
            let ops = self.order_ops(&value_key, ttl)?;
            self.backend.submit_batch(&ops)?;
        }
        Ok(default)
    }

    // == Chained Keys ==
    /// Stores `value` under the parts joined with `:`.
    pub fn chain_set<S: AsRef<str>>(&mut self, parts: &[S], value: impl Into<Value>) -> Result<()> {
        self.set(&keys::chain_key(parts), value)
    }

    pub fn chain_get<S: AsRef<str>>(&self, parts: &[S]) -> Result<Value> {
        self.get_item(&keys::chain_key(parts))
    }

    pub fn chain_del<S: AsRef<str>>(&mut self, parts: &[S]) -> Result<()> {
        self.delete(&keys::chain_key(parts))
    }

    // == Prefix Queries ==
    /// Values of every key starting with `prefix`.
    pub fn multi_get(&self, prefix: &str) -> Result<Vec<Value>> {
        Ok(self.multi_dict(prefix)?.into_values().collect())
    }

    /// Values under the chained prefix `parts`.
    pub fn multi_chain_get<S: AsRef<str>>(&self, parts: &[S]) -> Result<Vec<Value>> {
        self.multi_get(&keys::chain_key(parts))
    }

    /// Entries whose key starts with `prefix`, keyed by the full user key.
    pub fn multi_dict(&self, prefix: &str) -> Result<IndexMap<String, Value>> {
        let found = self.scan(prefix).collect::<Result<Vec<_>>>()?;
        let value_keys: Vec<String> = found
            .iter()
            .map(|key| self.namespace.to_backend_key(key))
            .collect();

        let values = self.load_many(&value_keys)?;
        Ok(found
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|value| (key, value)))
            .collect())
    }

    /// Deletes every key starting with `prefix`, returning how many existed.
    ///
    /// Runs immediately, even inside a batch scope.
    pub fn multi_del(&mut self, prefix: &str) -> Result<usize> {
        let found = self.scan(prefix).collect::<Result<Vec<_>>>()?;
        let ops: Vec<BatchOp> = found
            .iter()
            .flat_map(|key| self.delete_ops(&self.namespace.to_backend_key(key)))
            .collect();
        if ops.is_empty() {
            return Ok(0);
        }

        let value_keys: Vec<String> = found
            .iter()
            .map(|key| self.namespace.to_backend_key(key))
            .collect();
        let replies = self.backend.submit_batch(&ops)?;
        let deleted = ops
            .iter()
            .zip(replies)
            .filter(|(op, reply)| {
                *reply == BatchReply::Deleted(true) && value_keys.iter().any(|key| key == op.key())
            })
            .count();
        debug!("multi_del('{}') removed {} keys", prefix, deleted);
        Ok(deleted)
    }

    // == Record Encoding ==
    fn write_ops(&self, key: &str, value: &Value) -> Result<Vec<BatchOp>> {
        let value_key = self.namespace.to_backend_key(key);
        let (tag, payload) = self.registry.encode_value(value)?;

        let plan = self
            .expiry
            .plan_write(&self.backend, &value_key, self.config.preserve_expiration);
        if plan == WriteTtl::Immediate {
            debug!("Non-positive TTL for '{}', deleting instead", value_key);
            return Ok(self.delete_ops(&value_key));
        }
        let ttl = plan.as_backend_ttl();

        let mut ops = match self.config.layout {
            RecordLayout::Inline => vec![BatchOp::Set {
                key: value_key.clone(),
                value: self.checked_record(key, format!("{}{}{}", tag, SEPARATOR, payload))?,
                ttl,
            }],
            RecordLayout::Sibling => vec![
                BatchOp::Set {
                    key: value_key.clone(),
                    value: self.checked_record(key, payload)?,
                    ttl,
                },
                BatchOp::Set {
                    key: keys::to_type_key(&value_key),
                    value: tag,
                    ttl,
                },
            ],
        };

        if self.config.insertion_order {
            ops.extend(self.order_ops(&value_key, ttl)?);
        }
        Ok(ops)
    }

    fn checked_record(&self, key: &str, record: String) -> Result<String> {
        if record.len() > self.config.max_value_size {
            return Err(DictError::ValueTooLarge {
                key: key.to_string(),
                size: record.len(),
                limit: self.config.max_value_size,
            });
        }
        Ok(record)
    }

    /// Records the insertion position of `value_key` unless it already has one.
    ///
    /// The sequence number is drawn immediately, even inside a batch scope.
    fn order_ops(&self, value_key: &str, ttl: Option<Duration>) -> Result<Vec<BatchOp>> {
        let sequence = self
            .backend
            .incr(&keys::order_sequence_key(&self.namespace))?;
        let order_key = keys::to_order_key(value_key);

        Ok(vec![
            BatchOp::SetIfAbsent {
                key: order_key.clone(),
                value: sequence.to_string(),
                ttl,
            },
            BatchOp::Expire {
                key: order_key,
                ttl,
            },
        ])
    }

    fn delete_ops(&self, value_key: &str) -> Vec<BatchOp> {
        let mut ops = vec![BatchOp::Delete {
            key: value_key.to_string(),
        }];
        if self.config.layout == RecordLayout::Sibling {
            ops.push(BatchOp::Delete {
                key: keys::to_type_key(value_key),
            });
        }
        if self.config.insertion_order {
            ops.push(BatchOp::Delete {
                key: keys::to_order_key(value_key),
            });
        }
        ops
    }

    /// Buffers `ops` inside a batch scope, otherwise submits them at once.
    fn execute(&mut self, ops: Vec<BatchOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        if self.pipeline.is_active() {
            self.pipeline.extend(ops);
            return Ok(());
        }
        self.backend.submit_batch(&ops)?;
        Ok(())
    }

    // == Record Decoding ==
    /// Reads and decodes several value keys, `None` for absent ones.
    fn load_many(&self, value_keys: &[String]) -> Result<Vec<Option<Value>>> {
        if value_keys.is_empty() {
            return Ok(Vec::new());
        }

        match self.config.layout {
            RecordLayout::Inline => self
                .backend
                .get_many(value_keys)?
                .into_iter()
                .zip(value_keys)
                .map(|(raw, value_key)| {
                    raw.map(|raw| self.decode_inline(value_key, &raw))
                        .transpose()
                })
                .collect(),
            RecordLayout::Sibling => {
                let request: Vec<String> = value_keys
                    .iter()
                    .flat_map(|value_key| [value_key.clone(), keys::to_type_key(value_key)])
                    .collect();
                let replies = self.backend.get_many(&request)?;

                replies
                    .chunks(2)
                    .zip(value_keys)
                    .map(|(pair, value_key)| match pair {
                        [Some(payload), Some(tag)] => self.decode_record(value_key, tag, payload).map(Some),
                        [Some(_), None] => Err(DictError::CorruptRecord {
                            key: value_key.clone(),
                            reason: "type key is missing".to_string(),
                        }),
                        _ => Ok(None),
                    })
                    .collect()
            }
        }
    }

    fn decode_inline(&self, value_key: &str, raw: &str) -> Result<Value> {
        let (tag, payload) = raw
            .split_once(SEPARATOR)
            .ok_or_else(|| DictError::CorruptRecord {
                key: value_key.to_string(),
                reason: "no type tag separator in stored value".to_string(),
            })?;
        self.decode_record(value_key, tag, payload)
    }

    fn decode_record(&self, value_key: &str, tag: &str, payload: &str) -> Result<Value> {
        self.registry
            .decode_value(tag, payload)
            .map_err(|err| err.with_key(value_key))
    }

    /// Atomically reads and removes `key`.
    fn take(&mut self, key: &str) -> Result<Option<Value>> {
        let value_key = self.namespace.to_backend_key(key);
        let raw = match self.backend.get_del(&value_key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        if self.config.insertion_order {
            self.backend.delete(&keys::to_order_key(&value_key))?;
        }
        let value = match self.config.layout {
            RecordLayout::Inline => self.decode_inline(&value_key, &raw)?,
            RecordLayout::Sibling => {
                let tag = self
                    .backend
                    .get_del(&keys::to_type_key(&value_key))?
                    .ok_or_else(|| DictError::CorruptRecord {
                        key: value_key.clone(),
                        reason: "type key is missing".to_string(),
                    })?;
                self.decode_record(&value_key, &tag, &raw)?
            }
        };
        Ok(Some(value))
    }

    fn not_found(&self, key: &str) -> DictError {
        DictError::KeyNotFound {
            namespace: self.namespace.to_string(),
            key: key.to_string(),
        }
    }
}

impl<B: Backend> fmt::Debug for RedisDict<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDict")
            .field("namespace", &self.namespace.as_str())
            .field("layout", &self.config.layout)
            .field("insertion_order", &self.config.insertion_order)
            .field("expiry", &self.expiry.effective())
            .field("pending_operations", &self.pipeline.len())
            .finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;

    fn dict() -> RedisDict {
        RedisDict::in_memory("test").unwrap()
    }

    #[test]
    fn test_set_and_get_keep_types() {
        let mut dict = dict();
        dict.set("int", 42).unwrap();
        dict.set("float", 42.0).unwrap();
        dict.set("text", "42").unwrap();
        dict.set("flag", true).unwrap();
        dict.set("nothing", Value::None).unwrap();

        assert_eq!(dict.get("int").unwrap(), Some(Value::Int(42)));
        assert_eq!(dict.get("float").unwrap(), Some(Value::Float(42.0)));
        assert_eq!(dict.get("text").unwrap(), Some(Value::from("42")));
        assert_eq!(dict.get("flag").unwrap(), Some(Value::Bool(true)));
        assert_eq!(dict.get("nothing").unwrap(), Some(Value::None));
        assert_eq!(dict.get("missing").unwrap(), None);
    }

    #[test]
    fn test_inline_record_layout() {
        let mut dict = dict();
        dict.set("foo", 42).unwrap();
        dict.set("path", "a:b:c").unwrap();

        assert_eq!(
            dict.backend().get("test:foo").unwrap(),
            Some("int:42".to_string())
        );
        assert_eq!(dict.get("path").unwrap(), Some(Value::from("a:b:c")));
    }

    #[test]
    fn test_get_item_and_pop_report_missing_keys() {
        let mut dict = dict();

        let err = dict.get_item("ghost").unwrap_err();
        assert!(matches!(
            err,
            DictError::KeyNotFound { ref namespace, ref key } if namespace == "test" && key == "ghost"
        ));
        assert!(matches!(dict.pop("ghost"), Err(DictError::KeyNotFound { .. })));
        assert_eq!(dict.pop_or("ghost", 7).unwrap(), Value::Int(7));
        assert_eq!(dict.get_or("ghost", "x").unwrap(), Value::from("x"));
    }

    #[test]
    fn test_pop_removes_entry() {
        let mut dict = dict();
        dict.set("a", 1).unwrap();

        assert_eq!(dict.pop("a").unwrap(), Value::Int(1));
        assert!(!dict.contains("a").unwrap());
    }

    #[test]
    fn test_delete_missing_key_is_not_an_error() {
        let mut dict = dict();
        dict.delete("ghost").unwrap();

        dict.set("a", 1).unwrap();
        dict.delete("a").unwrap();
        assert_eq!(dict.get("a").unwrap(), None);
    }

    #[test]
    fn test_setdefault() {
        let mut dict = dict();

        assert_eq!(dict.setdefault("a", 1).unwrap(), Value::Int(1));
        assert_eq!(dict.setdefault("a", 2).unwrap(), Value::Int(1));
        assert_eq!(dict.get("a").unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_update_and_from_keys() {
        let mut dict = dict();
        dict.update(vec![("a", Value::Int(1)), ("b", Value::from("two"))])
            .unwrap();
        dict.from_keys(["x", "y"], Value::None).unwrap();

        assert_eq!(dict.get("b").unwrap(), Some(Value::from("two")));
        assert_eq!(dict.get("y").unwrap(), Some(Value::None));
        assert_eq!(dict.len().unwrap(), 4);
    }

    #[test]
    fn test_chained_keys() {
        let mut dict = dict();
        dict.chain_set(&["user", "1", "name"], "alice").unwrap();
        dict.chain_set(&["user", "1", "age"], 30).unwrap();
        dict.chain_set(&["user", "2", "name"], "bob").unwrap();

        assert_eq!(dict.get("user:1:name").unwrap(), Some(Value::from("alice")));
        assert_eq!(dict.chain_get(&["user", "1", "age"]).unwrap(), Value::Int(30));
        assert_eq!(dict.multi_chain_get(&["user", "1"]).unwrap().len(), 2);

        let users = dict.multi_dict("user:").unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users.get("user:2:name"), Some(&Value::from("bob")));

        dict.chain_del(&["user", "2", "name"]).unwrap();
        assert!(matches!(
            dict.chain_get(&["user", "2", "name"]),
            Err(DictError::KeyNotFound { .. })
        ));
        assert_eq!(dict.multi_del("user:1").unwrap(), 2);
        assert!(dict.is_empty().unwrap());
    }

    #[test]
    fn test_value_too_large() {
        let mut dict = RedisDict::new(
            MemoryBackend::new(),
            Config::default().with_max_value_size(16),
        )
        .unwrap();

        dict.set("small", "ok").unwrap();
        let err = dict.set("big", "x".repeat(64)).unwrap_err();
        assert!(matches!(
            err,
            DictError::ValueTooLarge { ref key, limit: 16, .. } if key == "big"
        ));
        assert!(!dict.contains("big").unwrap());
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let result = RedisDict::new(MemoryBackend::new(), Config::default().with_namespace("a:b"));
        assert!(matches!(result, Err(DictError::InvalidNamespace { .. })));
    }

    #[test]
    fn test_corrupt_and_unknown_records_are_errors() {
        let dict = dict();
        dict.backend().set("test:raw", "no-separator", None).unwrap();
        dict.backend().set("test:alien", "Person:bob", None).unwrap();

        assert!(matches!(
            dict.get("raw"),
            Err(DictError::CorruptRecord { ref key, .. }) if key == "test:raw"
        ));
        assert!(matches!(
            dict.get("alien"),
            Err(DictError::UnknownTag { ref tag, key: Some(ref key) }) if tag == "Person" && key == "test:alien"
        ));
    }

    #[test]
    fn test_get_ttl() {
        let mut dict = dict();
        dict.set("forever", 1).unwrap();
        dict.with_expiry(Expiry::seconds(30), |dict| dict.set("soon", 2))
            .unwrap();

        assert_eq!(dict.get_ttl("forever").unwrap(), None);
        assert_eq!(dict.get_ttl("missing").unwrap(), None);
        let ttl = dict.get_ttl("soon").unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(30) && ttl > Duration::from_secs(25));
    }

    #[test]
    fn test_zero_ttl_deletes() {
        let mut dict = dict();
        dict.set("a", 1).unwrap();

        dict.with_expiry(Expiry::seconds(0), |dict| dict.set("a", 2))
            .unwrap();
        assert_eq!(dict.get("a").unwrap(), None);

        let value = dict
            .with_expiry(Expiry::seconds(-1), |dict| dict.setdefault("b", 3))
            .unwrap();
        assert_eq!(value, Value::Int(3));
        assert!(!dict.contains("b").unwrap());
    }

    #[test]
    fn test_backend_errors_are_not_missing_keys() {
        struct Down;

        impl Backend for Down {
            fn get(&self, _: &str) -> crate::backend::BackendResult<Option<String>> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
            fn set(&self, _: &str, _: &str, _: Option<Duration>) -> crate::backend::BackendResult<()> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
            fn delete(&self, _: &str) -> crate::backend::BackendResult<bool> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
            fn exists(&self, _: &str) -> crate::backend::BackendResult<bool> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
            fn ttl(&self, _: &str) -> crate::backend::BackendResult<KeyTtl> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
            fn expire(&self, _: &str, _: Option<Duration>) -> crate::backend::BackendResult<bool> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
            fn scan(
                &self,
                _: &str,
                _: Option<&crate::backend::ScanCursor>,
                _: usize,
            ) -> crate::backend::BackendResult<crate::backend::ScanPage> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
            fn submit_batch(&self, _: &[BatchOp]) -> crate::backend::BackendResult<Vec<BatchReply>> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
            fn incr(&self, _: &str) -> crate::backend::BackendResult<i64> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
        }

        let mut dict = RedisDict::new(Down, Config::default()).unwrap();
        assert!(matches!(dict.get("a"), Err(DictError::Backend(_))));
        assert!(matches!(dict.get_item("a"), Err(DictError::Backend(_))));
        assert!(matches!(dict.set("a", 1), Err(DictError::Backend(_))));
        assert!(matches!(dict.len(), Err(DictError::Backend(_))));
    }

    #[test]
    fn test_sibling_layout_stores_tag_separately() {
        let mut dict = RedisDict::new(
            MemoryBackend::new(),
            Config::default().with_layout(RecordLayout::Sibling),
        )
        .unwrap();
        dict.set("foo", 42).unwrap();

        assert_eq!(dict.backend().get("main:foo").unwrap(), Some("42".to_string()));
        assert_eq!(
            dict.backend().get(":type:main:foo").unwrap(),
            Some("int".to_string())
        );
        assert_eq!(dict.get("foo").unwrap(), Some(Value::Int(42)));
        assert_eq!(dict.setdefault("foo", 1).unwrap(), Value::Int(42));
        assert_eq!(dict.pop("foo").unwrap(), Value::Int(42));
        assert_eq!(dict.backend().key_count(), 0);
    }
}
