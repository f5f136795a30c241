//! Value Module
//!
//! The typed value model stored in the mapping. Each variant corresponds to one
//! built-in type tag; [`Value::Custom`] carries values of user-registered types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::error::{DictError, Result};

// == Value ==
/// A value that keeps its semantic type through a round trip.
///
/// ## Equality Rules
///
/// - Different variants are never equal: `Int(1) != Float(1.0)`, `Bool(true) != Int(1)`
/// - Floats use IEEE-754 equality
/// - `Set` and `FrozenSet` compare as unordered collections
/// - Map variants compare as maps, independent of key order
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    List(Vec<Value>),
    Dict(IndexMap<String, Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Stored with microsecond resolution
    Duration(chrono::Duration),
    /// Decimal literal, kept verbatim
    Decimal(String),
    Complex(Complex),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    OrderedMap(IndexMap<String, Value>),
    DefaultMap(IndexMap<String, Value>),
    FrozenSet(Vec<Value>),
    Custom(CustomValue),
}

impl Value {
    // == Constructors ==
    /// Builds a set, dropping duplicate members.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Set(dedup(items))
    }

    /// Builds a frozen set, dropping duplicate members.
    pub fn frozen_set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::FrozenSet(dedup(items))
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(bytes.into())
    }

    /// Wraps a value of a user-registered type.
    pub fn custom<T: CustomObject>(value: T) -> Self {
        Value::Custom(CustomValue::new(value))
    }

    /// Validates and wraps a decimal literal such as `-12.50` or `1E+3`.
    pub fn decimal(literal: &str) -> Result<Self> {
        if is_decimal_literal(literal) {
            Ok(Value::Decimal(literal.to_string()))
        } else {
            Err(DictError::Decode {
                tag: "Decimal".to_string(),
                key: None,
                reason: format!("'{}' is not a decimal literal", literal),
            })
        }
    }

    // == Introspection ==
    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "str",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::None => "NoneType",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Duration(_) => "timedelta",
            Value::Decimal(_) => "Decimal",
            Value::Complex(_) => "complex",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "UUID",
            Value::OrderedMap(_) => "OrderedDict",
            Value::DefaultMap(_) => "defaultdict",
            Value::FrozenSet(_) => "frozenset",
            Value::Custom(custom) => custom.type_name(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Borrows the inner value of a user-registered type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Custom(custom) => custom.downcast_ref::<T>(),
            _ => None,
        }
    }
}

fn dedup(items: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::new();
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

fn same_members(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().all(|item| b.contains(item))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Str(a), Str(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (None, None) => true,
            (List(a), List(b)) | (Tuple(a), Tuple(b)) => a == b,
            (Set(a), Set(b)) | (FrozenSet(a), FrozenSet(b)) => same_members(a, b),
            (Dict(a), Dict(b)) | (DefaultMap(a), DefaultMap(b)) => a == b,
            // Order is part of an ordered map's identity
            (OrderedMap(a), OrderedMap(b)) => a.iter().eq(b.iter()),
            (DateTime(a), DateTime(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (Duration(a), Duration(b)) => a == b,
            (Decimal(a), Decimal(b)) => a == b,
            (Complex(a), Complex(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (Custom(a), Custom(b)) => a == b,
            _ => false,
        }
    }
}

// == Conversions ==
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Value::Dict(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveTime> for Value {
    fn from(value: NaiveTime) -> Self {
        Value::Time(value)
    }
}

impl From<chrono::Duration> for Value {
    fn from(value: chrono::Duration) -> Self {
        Value::Duration(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<Complex> for Value {
    fn from(value: Complex) -> Self {
        Value::Complex(value)
    }
}

// == Complex ==
/// Complex number with `f64` parts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

// == Custom Values ==
/// Capability required of user-registered types.
///
/// Implemented for every `T: Any + Debug + PartialEq + Send + Sync`.
pub trait CustomObject: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_object(&self, other: &dyn CustomObject) -> bool;
    fn object_type_name(&self) -> &'static str;
}

impl<T> CustomObject for T
where
    T: Any + fmt::Debug + PartialEq + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_object(&self, other: &dyn CustomObject) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn object_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A shared value of a user-registered type.
#[derive(Clone)]
pub struct CustomValue(Arc<dyn CustomObject>);

impl CustomValue {
    pub fn new<T: CustomObject>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Rust type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.0.object_type_name()
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_object(&*other.0)
    }
}

// == Decimal Literals ==
/// Accepts `[+-]digits[.digits][(e|E)[+-]digits]` plus `NaN`, `sNaN` and `Infinity`.
pub(crate) fn is_decimal_literal(text: &str) -> bool {
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    if matches!(unsigned, "NaN" | "sNaN" | "Infinity" | "Inf") {
        return true;
    }

    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, Some(exponent)),
        None => (unsigned, None),
    };

    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    let mantissa_ok = digits(whole) && digits(fraction) && !(whole.is_empty() && fraction.is_empty());

    let exponent_ok = exponent.map_or(true, |exponent| {
        let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
        !exponent.is_empty() && digits(exponent)
    });

    mantissa_ok && exponent_ok
}
