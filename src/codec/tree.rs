//! Nested JSON Codec
//!
//! Encodes heterogeneous containers as one JSON document. JSON-native leaves
//! (strings, integers, finite floats, booleans, null) stay native; every other
//! leaf is delegated to the registry and written as
//! `{"__type__": <tag>, "value": <payload>}`.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Map, Number, Value as Json};

use crate::codec::registry::Nesting;
use crate::codec::value::Value;
use crate::error::{DictError, Result};

/// Field holding the tag of a delegated leaf
pub const TYPE_FIELD: &str = "__type__";

/// Field holding the payload of a delegated leaf
pub const VALUE_FIELD: &str = "value";

const DOCUMENT_TAG: &str = "json";

// == Entry Points ==
pub(crate) fn encode_tree(value: &Value, nesting: Nesting<'_>) -> Result<String> {
    render(DOCUMENT_TAG, &to_json(value, nesting)?)
}

pub(crate) fn decode_tree(text: &str, nesting: Nesting<'_>) -> Result<Value> {
    from_json(&parse(DOCUMENT_TAG, text, nesting)?, nesting)
}

/// Parses a payload, bounded by the registry's depth limit rather than
/// serde_json's fixed recursion limit.
pub(crate) fn parse(tag: &str, text: &str, nesting: Nesting<'_>) -> Result<Json> {
    if exceeds_depth(text, nesting.json_depth_budget()) {
        return Err(nesting.depth_exceeded());
    }

    let mut deserializer = serde_json::Deserializer::from_str(text);
    deserializer.disable_recursion_limit();
    let json = Json::deserialize(&mut deserializer)
        .map_err(|err| decode_error(tag, err.to_string()))?;
    deserializer
        .end()
        .map_err(|err| decode_error(tag, err.to_string()))?;
    Ok(json)
}

/// True when brackets in `text` nest deeper than `limit`, strings excluded.
fn exceeds_depth(text: &str, limit: usize) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for byte in text.bytes() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                if depth > limit {
                    return true;
                }
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    false
}

pub(crate) fn render(tag: &str, json: &Json) -> Result<String> {
    serde_json::to_string(json).map_err(|err| DictError::Encode {
        tag: tag.to_string(),
        reason: err.to_string(),
    })
}

fn decode_error(tag: &str, reason: impl Into<String>) -> DictError {
    DictError::Decode {
        tag: tag.to_string(),
        key: None,
        reason: reason.into(),
    }
}

// == Encoding ==
pub(crate) fn to_json(value: &Value, nesting: Nesting<'_>) -> Result<Json> {
    match value {
        Value::Str(s) => Ok(Json::String(s.clone())),
        Value::Int(i) => Ok(Json::from(*i)),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::None => Ok(Json::Null),
        Value::Float(f) => match Number::from_f64(*f) {
            Some(number) => Ok(Json::Number(number)),
            // nan and infinities have no JSON number form
            None => tagged_leaf(value, nesting),
        },
        Value::List(items) => array_to_json(items, nesting),
        Value::Dict(map) => map_to_json(map, nesting),
        _ => tagged_leaf(value, nesting),
    }
}

fn tagged_leaf(value: &Value, nesting: Nesting<'_>) -> Result<Json> {
    let (tag, payload) = nesting.registry().encode_nested(value, nesting)?;
    Ok(json!({ TYPE_FIELD: tag, VALUE_FIELD: payload }))
}

pub(crate) fn array_to_json(items: &[Value], nesting: Nesting<'_>) -> Result<Json> {
    let inner = nesting.deeper()?;
    items
        .iter()
        .map(|item| to_json(item, inner))
        .collect::<Result<Vec<_>>>()
        .map(Json::Array)
}

/// Encodes a string-keyed map as a JSON object.
///
/// A map whose keys are exactly `__type__` and `value` would read back as a
/// delegated leaf, so it is wrapped as a `dict` leaf holding the object.
pub(crate) fn map_to_json(map: &IndexMap<String, Value>, nesting: Nesting<'_>) -> Result<Json> {
    let inner = nesting.deeper()?;
    let mut object = Map::with_capacity(map.len());
    for (key, item) in map {
        object.insert(key.clone(), to_json(item, inner)?);
    }

    if has_leaf_shape(&object) {
        return Ok(json!({ TYPE_FIELD: "dict", VALUE_FIELD: Json::Object(object) }));
    }
    Ok(Json::Object(object))
}

/// Encodes a map as an array of `[key, value]` pairs.
pub(crate) fn pairs_to_json(map: &IndexMap<String, Value>, nesting: Nesting<'_>) -> Result<Json> {
    let inner = nesting.deeper()?;
    map.iter()
        .map(|(key, item)| -> Result<Json> { Ok(json!([key, to_json(item, inner)?])) })
        .collect::<Result<Vec<_>>>()
        .map(Json::Array)
}

fn has_leaf_shape(object: &Map<String, Json>) -> bool {
    object.len() == 2 && object.contains_key(TYPE_FIELD) && object.contains_key(VALUE_FIELD)
}

// == Decoding ==
pub(crate) fn from_json(json: &Json, nesting: Nesting<'_>) -> Result<Value> {
    match json {
        Json::Null => Ok(Value::None),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::String(s) => Ok(Value::Str(s.clone())),
        Json::Number(number) => number_from_json(number),
        Json::Array(items) => array_items(items, nesting).map(Value::List),
        Json::Object(object) => match leaf_parts(object) {
            Some((tag, payload)) => leaf_from_json(tag, payload, nesting),
            None => object_entries(object, nesting).map(Value::Dict),
        },
    }
}

fn number_from_json(number: &Number) -> Result<Value> {
    if let Some(i) = number.as_i64() {
        return Ok(Value::Int(i));
    }
    if number.is_f64() {
        if let Some(f) = number.as_f64() {
            return Ok(Value::Float(f));
        }
    }
    Err(decode_error(
        "int",
        format!("{} does not fit in a 64-bit integer", number),
    ))
}

fn leaf_parts(object: &Map<String, Json>) -> Option<(&str, &Json)> {
    if !has_leaf_shape(object) {
        return None;
    }
    let tag = object.get(TYPE_FIELD)?.as_str()?;
    Some((tag, object.get(VALUE_FIELD)?))
}

fn leaf_from_json(tag: &str, payload: &Json, nesting: Nesting<'_>) -> Result<Value> {
    match payload {
        Json::String(payload) => nesting.registry().decode_nested(tag, payload, nesting),
        Json::Object(object) if tag == "dict" => object_entries(object, nesting).map(Value::Dict),
        other => Err(decode_error(
            tag,
            format!("expected a string payload, found {}", other),
        )),
    }
}

fn array_items(items: &[Json], nesting: Nesting<'_>) -> Result<Vec<Value>> {
    let inner = nesting.deeper()?;
    items.iter().map(|item| from_json(item, inner)).collect()
}

fn object_entries(object: &Map<String, Json>, nesting: Nesting<'_>) -> Result<IndexMap<String, Value>> {
    let inner = nesting.deeper()?;
    object
        .iter()
        .map(|(key, item)| -> Result<(String, Value)> {
            Ok((key.clone(), from_json(item, inner)?))
        })
        .collect()
}

/// Decodes a payload that must hold a JSON array.
pub(crate) fn decode_array(tag: &str, payload: &str, nesting: Nesting<'_>) -> Result<Vec<Value>> {
    match parse(tag, payload, nesting)? {
        Json::Array(items) => array_items(&items, nesting),
        other => Err(decode_error(tag, format!("expected a JSON array, found {}", other))),
    }
}

/// Decodes a payload that must hold a JSON object (possibly wrapped as a `dict` leaf).
pub(crate) fn decode_map(
    tag: &str,
    payload: &str,
    nesting: Nesting<'_>,
) -> Result<IndexMap<String, Value>> {
    match from_json(&parse(tag, payload, nesting)?, nesting)? {
        Value::Dict(map) => Ok(map),
        other => Err(decode_error(
            tag,
            format!("expected a JSON object, found {}", other.type_name()),
        )),
    }
}

/// Decodes a payload holding an array of `[key, value]` pairs.
pub(crate) fn decode_pairs(
    tag: &str,
    payload: &str,
    nesting: Nesting<'_>,
) -> Result<IndexMap<String, Value>> {
    let items = match parse(tag, payload, nesting)? {
        Json::Array(items) => items,
        other => return Err(decode_error(tag, format!("expected a JSON array, found {}", other))),
    };

    let inner = nesting.deeper()?;
    let mut map = IndexMap::with_capacity(items.len());
    for pair in &items {
        match pair.as_array().map(Vec::as_slice) {
            Some([Json::String(key), item]) => {
                map.insert(key.clone(), from_json(item, inner)?);
            }
            _ => {
                return Err(decode_error(
                    tag,
                    format!("expected a [key, value] pair, found {}", pair),
                ))
            }
        }
    }
    Ok(map)
}
