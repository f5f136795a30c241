//! Type Registry Module
//!
//! Maps type tags to codec entries. Encoding walks the entries in a fixed
//! priority order; decoding looks an entry up by tag.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::codec::builtin::builtin_entries;
use crate::codec::tree;
use crate::codec::value::{CustomObject, Value};
use crate::error::{DictError, Result};

/// Default limit on container nesting for the nested codec.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Predicate deciding whether an entry can encode a value.
pub type MatchFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub(crate) type EncodeFn = Arc<dyn Fn(&Value, Nesting<'_>) -> Result<String> + Send + Sync>;
pub(crate) type DecodeFn = Arc<dyn Fn(&str, Nesting<'_>) -> Result<Value> + Send + Sync>;

// == Match Priority ==
/// Exact entries are consulted before structural ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPriority {
    /// Matches one concrete variant or Rust type
    Exact,
    /// Matches by inspecting the value's shape
    Structural,
}

// == Nesting ==
/// Recursion context handed to codecs that encode nested values.
#[derive(Clone, Copy)]
pub(crate) struct Nesting<'a> {
    registry: &'a TypeRegistry,
    depth: usize,
}

impl<'a> Nesting<'a> {
    pub(crate) fn root(registry: &'a TypeRegistry) -> Self {
        Self { registry, depth: 0 }
    }

    pub(crate) fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    /// Deepest JSON document a payload parsed at this level may hold.
    ///
    /// A nesting level costs at most two JSON levels (a wrapped map or a
    /// key/value pair), plus one for the outermost wrapper.
    pub(crate) fn json_depth_budget(&self) -> usize {
        let remaining = self.registry.max_depth.saturating_sub(self.depth);
        remaining.saturating_mul(2).saturating_add(2)
    }

    pub(crate) fn depth_exceeded(&self) -> DictError {
        DictError::DepthExceeded {
            limit: self.registry.max_depth,
        }
    }

    /// Context one level down, failing once the depth limit is reached.
    pub(crate) fn deeper(self) -> Result<Self> {
        if self.depth >= self.registry.max_depth {
            return Err(self.depth_exceeded());
        }
        Ok(Self {
            registry: self.registry,
            depth: self.depth + 1,
        })
    }
}

// == Codec Entry ==
/// One tag with its match predicate and encode/decode pair.
#[derive(Clone)]
pub struct CodecEntry {
    tag: String,
    priority: MatchPriority,
    matches: MatchFn,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl CodecEntry {
    /// Builds an entry from fallible free functions.
    pub fn new<M, E, D>(
        tag: impl Into<String>,
        priority: MatchPriority,
        matches: M,
        encode: E,
        decode: D,
    ) -> Self
    where
        M: Fn(&Value) -> bool + Send + Sync + 'static,
        E: Fn(&Value) -> anyhow::Result<String> + Send + Sync + 'static,
        D: Fn(&str) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let tag = tag.into();
        let encode_tag = tag.clone();
        let decode_tag = tag.clone();

        Self::with_priority(
            tag,
            priority,
            matches,
            move |value, _| {
                encode(value).map_err(|err| DictError::Encode {
                    tag: encode_tag.clone(),
                    reason: format!("{:#}", err),
                })
            },
            move |payload, _| {
                decode(payload).map_err(|err| DictError::Decode {
                    tag: decode_tag.clone(),
                    key: None,
                    reason: format!("{:#}", err),
                })
            },
        )
    }

    /// Builds an entry whose codec recurses into nested values.
    pub(crate) fn nested<M, E, D>(tag: &str, matches: M, encode: E, decode: D) -> Self
    where
        M: Fn(&Value) -> bool + Send + Sync + 'static,
        E: Fn(&Value, Nesting<'_>) -> Result<String> + Send + Sync + 'static,
        D: Fn(&str, Nesting<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::with_priority(tag.to_string(), MatchPriority::Exact, matches, encode, decode)
    }

    fn with_priority<M, E, D>(
        tag: String,
        priority: MatchPriority,
        matches: M,
        encode: E,
        decode: D,
    ) -> Self
    where
        M: Fn(&Value) -> bool + Send + Sync + 'static,
        E: Fn(&Value, Nesting<'_>) -> Result<String> + Send + Sync + 'static,
        D: Fn(&str, Nesting<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            tag,
            priority,
            matches: Arc::new(matches),
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn priority(&self) -> MatchPriority {
        self.priority
    }

    pub fn accepts(&self, value: &Value) -> bool {
        (self.matches)(value)
    }

    /// Checks that decode inverts encode on `sample`.
    fn verify(&self, sample: &Value, nesting: Nesting<'_>) -> Result<()> {
        let invalid = |reason: String| DictError::InvalidEncoder {
            tag: self.tag.clone(),
            reason,
        };

        if !self.accepts(sample) {
            return Err(invalid(format!("sample {:?} is not matched", sample)));
        }
        let payload = (self.encode)(sample, nesting).map_err(|err| invalid(err.to_string()))?;
        let decoded = (self.decode)(&payload, nesting).map_err(|err| invalid(err.to_string()))?;
        if &decoded != sample {
            return Err(invalid(format!(
                "round trip of {:?} produced {:?}",
                sample, decoded
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for CodecEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecEntry")
            .field("tag", &self.tag)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

// == Type Registry ==
/// Ordered codec table.
///
/// Each mapping owns one registry, built with the built-in codecs. To make
/// several mappings read each other's extension types, register the types on
/// one registry and hand clones of it to each mapping.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: Vec<CodecEntry>,
    by_tag: HashMap<String, usize>,
    max_depth: usize,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    // == Constructors ==
    /// Registry with every built-in codec.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for entry in builtin_entries() {
            registry.insert(entry);
        }
        registry
    }

    /// Registry without any codec.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            by_tag: HashMap::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    /// Registered tags in registration order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(CodecEntry::tag)
    }

    fn insert(&mut self, entry: CodecEntry) {
        self.by_tag.insert(entry.tag.clone(), self.entries.len());
        self.entries.push(entry);
    }

    // == Registration ==
    /// Adds an entry.
    ///
    /// Fails with `DuplicateTag` when the tag is taken and with
    /// `InvalidEncoder` when the tag could not be read back from a record.
    pub fn register_entry(&mut self, entry: CodecEntry) -> Result<()> {
        check_tag(&entry.tag)?;
        if self.contains(&entry.tag) {
            return Err(DictError::DuplicateTag { tag: entry.tag });
        }
        debug!("Registered codec '{}' ({:?})", entry.tag, entry.priority);
        self.insert(entry);
        Ok(())
    }

    /// Adds an entry after checking the round trip on every sample.
    ///
    /// Fails with `InvalidEncoder` when a sample is not matched or does not
    /// survive encode then decode; the registry is left unchanged.
    pub fn register_verified(&mut self, entry: CodecEntry, samples: &[Value]) -> Result<()> {
        check_tag(&entry.tag)?;
        if self.contains(&entry.tag) {
            return Err(DictError::DuplicateTag { tag: entry.tag });
        }
        let mut candidate = self.clone();
        candidate.insert(entry.clone());
        for sample in samples {
            entry.verify(sample, Nesting::root(&candidate))?;
        }
        *self = candidate;
        Ok(())
    }

    /// Registers a structural codec from free functions.
    pub fn register<M, E, D>(&mut self, tag: &str, matches: M, encode: E, decode: D) -> Result<()>
    where
        M: Fn(&Value) -> bool + Send + Sync + 'static,
        E: Fn(&Value) -> anyhow::Result<String> + Send + Sync + 'static,
        D: Fn(&str) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register_entry(CodecEntry::new(
            tag,
            MatchPriority::Structural,
            matches,
            encode,
            decode,
        ))
    }

    /// Registers a codec for the Rust type `T`, carried as [`Value::Custom`].
    ///
    /// # Example
    /// ```
    /// use redis_dict::{TypeRegistry, Value};
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct Celsius(f64);
    ///
    /// let mut registry = TypeRegistry::new();
    /// registry
    ///     .register_type::<Celsius, _, _>(
    ///         "Celsius",
    ///         |c| Ok(c.0.to_string()),
    ///         |s| Ok(Celsius(s.parse()?)),
    ///     )
    ///     .unwrap();
    ///
    /// let (tag, payload) = registry.encode_value(&Value::custom(Celsius(21.5))).unwrap();
    /// assert_eq!((tag.as_str(), payload.as_str()), ("Celsius", "21.5"));
    /// ```
    pub fn register_type<T, E, D>(&mut self, tag: &str, encode: E, decode: D) -> Result<()>
    where
        T: CustomObject,
        E: Fn(&T) -> anyhow::Result<String> + Send + Sync + 'static,
        D: Fn(&str) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        self.register_entry(CodecEntry::new(
            tag,
            MatchPriority::Exact,
            |value| value.downcast_ref::<T>().is_some(),
            move |value| {
                value
                    .downcast_ref::<T>()
                    .ok_or_else(|| anyhow::anyhow!("value is not a {}", type_name))
                    .and_then(&encode)
            },
            move |payload| decode(payload).map(Value::custom),
        ))
    }

    // == Encoding ==
    /// Encodes a value into `(tag, payload)`.
    pub fn encode_value(&self, value: &Value) -> Result<(String, String)> {
        self.encode_nested(value, Nesting::root(self))
    }

    pub(crate) fn encode_nested(
        &self,
        value: &Value,
        nesting: Nesting<'_>,
    ) -> Result<(String, String)> {
        let entry = self.lookup(value).ok_or_else(|| DictError::UnsupportedType {
            type_name: value.type_name().to_string(),
        })?;
        let payload = (entry.encode)(value, nesting)?;
        Ok((entry.tag.clone(), payload))
    }

    fn lookup(&self, value: &Value) -> Option<&CodecEntry> {
        let by_priority = |priority| {
            self.entries
                .iter()
                .filter(move |entry| entry.priority == priority)
        };
        by_priority(MatchPriority::Exact)
            .chain(by_priority(MatchPriority::Structural))
            .find(|entry| entry.accepts(value))
    }

    // == Decoding ==
    /// Decodes a payload stored under `tag`.
    pub fn decode_value(&self, tag: &str, payload: &str) -> Result<Value> {
        self.decode_nested(tag, payload, Nesting::root(self))
    }

    pub(crate) fn decode_nested(
        &self,
        tag: &str,
        payload: &str,
        nesting: Nesting<'_>,
    ) -> Result<Value> {
        let index = self
            .by_tag
            .get(tag)
            .ok_or_else(|| DictError::UnknownTag {
                tag: tag.to_string(),
                key: None,
            })?;
        (self.entries[*index].decode)(payload, nesting)
    }

    // == Nested JSON ==
    /// Encodes a value tree as one JSON document.
    ///
    /// JSON-native values stay native; every other leaf becomes
    /// `{"__type__": <tag>, "value": <payload>}` using its registered codec.
    pub fn encode_tree(&self, value: &Value) -> Result<String> {
        tree::encode_tree(value, Nesting::root(self))
    }

    /// Decodes a document produced by [`TypeRegistry::encode_tree`].
    pub fn decode_tree(&self, text: &str) -> Result<Value> {
        tree::decode_tree(text, Nesting::root(self))
    }
}

/// Inline records are split at the first `:`, so a tag may not contain one.
fn check_tag(tag: &str) -> Result<()> {
    let reason = if tag.is_empty() {
        "tag is empty"
    } else if tag.contains(':') {
        "tag contains the record separator ':'"
    } else {
        return Ok(());
    };
    Err(DictError::InvalidEncoder {
        tag: tag.to_string(),
        reason: reason.to_string(),
    })
}

/// Convenience for matching closures: true when `value` wraps a `T`.
pub fn is_custom<T: Any>(value: &Value) -> bool {
    value.downcast_ref::<T>().is_some()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Person {
        name: String,
        age: u32,
    }

    fn person_registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .register_type::<Person, _, _>(
                "Person",
                |p| Ok(format!("{}|{}", p.name, p.age)),
                |s| {
                    let (name, age) = s
                        .split_once('|')
                        .ok_or_else(|| anyhow::anyhow!("missing separator"))?;
                    Ok(Person {
                        name: name.to_string(),
                        age: age.parse()?,
                    })
                },
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_builtin_tags_registered() {
        let registry = TypeRegistry::new();
        for tag in [
            "str", "int", "float", "bool", "NoneType", "list", "dict", "tuple", "set",
            "datetime", "date", "time", "timedelta", "Decimal", "complex", "bytes", "UUID",
            "OrderedDict", "defaultdict", "frozenset",
        ] {
            assert!(registry.contains(tag), "missing built-in tag {}", tag);
        }
    }

    #[test]
    fn test_int_and_float_keep_their_tags() {
        let registry = TypeRegistry::new();

        assert_eq!(
            registry.encode_value(&Value::Int(42)).unwrap(),
            ("int".to_string(), "42".to_string())
        );
        assert_eq!(
            registry.encode_value(&Value::Float(42.0)).unwrap(),
            ("float".to_string(), "42.0".to_string())
        );
        assert_eq!(
            registry.encode_value(&Value::Bool(true)).unwrap(),
            ("bool".to_string(), "True".to_string())
        );
    }

    #[test]
    fn test_custom_type_round_trip() {
        let registry = person_registry();
        let alice = Value::custom(Person {
            name: "alice".to_string(),
            age: 30,
        });

        let (tag, payload) = registry.encode_value(&alice).unwrap();
        assert_eq!(tag, "Person");
        assert_eq!(payload, "alice|30");

        assert_eq!(registry.decode_value(&tag, &payload).unwrap(), alice);
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let mut registry = person_registry();

        let result = registry.register("Person", |_| false, |_| Ok(String::new()), |_| {
            Ok(Value::None)
        });
        assert!(matches!(result, Err(DictError::DuplicateTag { tag }) if tag == "Person"));

        let result = registry.register("int", |_| false, |_| Ok(String::new()), |_| {
            Ok(Value::None)
        });
        assert!(matches!(result, Err(DictError::DuplicateTag { .. })));
    }

    #[test]
    fn test_tags_that_break_records_are_rejected() {
        let mut registry = TypeRegistry::new();

        for tag in ["my:type", "str:x", ""] {
            let result = registry.register_type::<Person, _, _>(
                tag,
                |p| Ok(p.name.clone()),
                |s| {
                    Ok(Person {
                        name: s.to_string(),
                        age: 0,
                    })
                },
            );
            assert!(
                matches!(result, Err(DictError::InvalidEncoder { .. })),
                "tag '{}' was accepted",
                tag
            );
            assert!(!registry.contains(tag));
        }

        let entry = CodecEntry::new(
            "a:b",
            MatchPriority::Exact,
            is_custom::<u8>,
            |_| Ok(String::new()),
            |_| Ok(Value::None),
        );
        assert!(matches!(
            registry.register_verified(entry, &[]),
            Err(DictError::InvalidEncoder { .. })
        ));
    }

    #[test]
    fn test_unsupported_type() {
        let registry = TypeRegistry::new();

        let result = registry.encode_value(&Value::custom(7_u16));
        assert!(matches!(result, Err(DictError::UnsupportedType { type_name }) if type_name == "u16"));
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let registry = TypeRegistry::new();

        let result = registry.decode_value("Person", "alice|30");
        assert!(matches!(result, Err(DictError::UnknownTag { tag, .. }) if tag == "Person"));
    }

    #[test]
    fn test_exact_entries_win_over_structural() {
        let mut registry = TypeRegistry::new();
        // Structural codec that would also accept plain strings
        registry
            .register(
                "Shout",
                |value| matches!(value, Value::Str(_)),
                |value| Ok(value.as_str().unwrap_or_default().to_uppercase()),
                |payload| Ok(Value::Str(payload.to_lowercase())),
            )
            .unwrap();

        let (tag, _) = registry.encode_value(&Value::from("hello")).unwrap();
        assert_eq!(tag, "str");
    }

    #[test]
    fn test_structural_entry_used_when_no_exact_match() {
        let mut registry = TypeRegistry::new();
        registry
            .register(
                "Pair",
                |value| value.downcast_ref::<(i64, i64)>().is_some(),
                |value| {
                    let (a, b) = value
                        .downcast_ref::<(i64, i64)>()
                        .ok_or_else(|| anyhow::anyhow!("not a pair"))?;
                    Ok(format!("{},{}", a, b))
                },
                |payload| {
                    let (a, b) = payload
                        .split_once(',')
                        .ok_or_else(|| anyhow::anyhow!("missing comma"))?;
                    Ok(Value::custom((a.parse::<i64>()?, b.parse::<i64>()?)))
                },
            )
            .unwrap();

        let pair = Value::custom((3_i64, 4_i64));
        let (tag, payload) = registry.encode_value(&pair).unwrap();
        assert_eq!((tag.as_str(), payload.as_str()), ("Pair", "3,4"));
        assert_eq!(registry.decode_value("Pair", "3,4").unwrap(), pair);

        let err = registry.decode_value("Pair", "34").unwrap_err();
        assert!(matches!(err, DictError::Decode { tag, .. } if tag == "Pair"));
    }

    #[test]
    fn test_register_verified_rejects_lossy_codec() {
        let mut registry = TypeRegistry::new();
        // Drops the fractional part, so decode does not invert encode
        let lossy = CodecEntry::new(
            "Truncated",
            MatchPriority::Exact,
            is_custom::<f32>,
            |value| {
                let f = value.downcast_ref::<f32>().copied().unwrap_or_default();
                Ok((f as i64).to_string())
            },
            |payload| Ok(Value::custom(payload.parse::<i64>()? as f32)),
        );

        let result = registry.register_verified(lossy, &[Value::custom(1.5_f32)]);
        assert!(matches!(result, Err(DictError::InvalidEncoder { .. })));
        assert!(!registry.contains("Truncated"));
    }

    #[test]
    fn test_register_verified_accepts_inverse_codec() {
        let mut registry = TypeRegistry::new();
        let entry = CodecEntry::new(
            "Flag",
            MatchPriority::Exact,
            is_custom::<u8>,
            |value| Ok(value.downcast_ref::<u8>().copied().unwrap_or_default().to_string()),
            |payload| Ok(Value::custom(payload.parse::<u8>()?)),
        );

        registry
            .register_verified(entry, &[Value::custom(0_u8), Value::custom(255_u8)])
            .unwrap();
        assert!(registry.contains("Flag"));
        assert_eq!(registry.tags().last(), Some("Flag"));
    }
}
