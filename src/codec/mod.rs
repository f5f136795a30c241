//! Codec Module
//!
//! Type-tagged string encoding of [`Value`]s: the value model, the codec
//! registry with its built-in entries, and the nested JSON codec.

mod builtin;
mod registry;
mod tree;
mod value;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use registry::{is_custom, CodecEntry, MatchFn, MatchPriority, TypeRegistry, DEFAULT_MAX_DEPTH};
pub use tree::{TYPE_FIELD, VALUE_FIELD};
pub use value::{Complex, CustomObject, CustomValue, Value};
