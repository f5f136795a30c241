//! Built-in Codecs
//!
//! Scalar payloads follow the textual forms used by the Python `redis-dict`
//! package, so records stay readable by both. Containers go through the
//! nested JSON codec.

use anyhow::{anyhow, bail, Context};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use uuid::Uuid;

use crate::codec::registry::{CodecEntry, MatchPriority};
use crate::codec::tree;
use crate::codec::value::{is_decimal_literal, Complex, Value};
use crate::error::DictError;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_PARSE_FORMAT: &str = "%H:%M:%S%.f";
const DATETIME_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

type Matcher = fn(&Value) -> bool;

/// Scalar tags in dispatch order.
fn scalar_matchers() -> [(&'static str, Matcher); 13] {
    [
        ("str", |v| matches!(v, Value::Str(_))),
        ("int", |v| matches!(v, Value::Int(_))),
        ("float", |v| matches!(v, Value::Float(_))),
        ("bool", |v| matches!(v, Value::Bool(_))),
        ("NoneType", |v| matches!(v, Value::None)),
        ("datetime", |v| matches!(v, Value::DateTime(_))),
        ("date", |v| matches!(v, Value::Date(_))),
        ("time", |v| matches!(v, Value::Time(_))),
        ("timedelta", |v| matches!(v, Value::Duration(_))),
        ("Decimal", |v| matches!(v, Value::Decimal(_))),
        ("complex", |v| matches!(v, Value::Complex(_))),
        ("bytes", |v| matches!(v, Value::Bytes(_))),
        ("UUID", |v| matches!(v, Value::Uuid(_))),
    ]
}

/// Every built-in entry, scalars first.
pub(crate) fn builtin_entries() -> Vec<CodecEntry> {
    let mut entries: Vec<CodecEntry> = scalar_matchers()
        .into_iter()
        .map(|(tag, matches)| {
            CodecEntry::new(tag, MatchPriority::Exact, matches, encode_scalar, move |payload| {
                decode_scalar(tag, payload)
            })
        })
        .collect();

    entries.extend([
        sequence("list", |v| matches!(v, Value::List(_)), Value::List),
        sequence("tuple", |v| matches!(v, Value::Tuple(_)), Value::Tuple),
        sequence("set", |v| matches!(v, Value::Set(_)), |items| Value::set(items)),
        sequence("frozenset", |v| matches!(v, Value::FrozenSet(_)), |items| {
            Value::frozen_set(items)
        }),
        mapping("dict", |v| matches!(v, Value::Dict(_)), Value::Dict),
        mapping("defaultdict", |v| matches!(v, Value::DefaultMap(_)), Value::DefaultMap),
        CodecEntry::nested(
            "OrderedDict",
            |v| matches!(v, Value::OrderedMap(_)),
            |value, nesting| match value {
                Value::OrderedMap(map) => {
                    tree::render("OrderedDict", &tree::pairs_to_json(map, nesting)?)
                }
                other => Err(mismatch("OrderedDict", other)),
            },
            |payload, nesting| {
                tree::decode_pairs("OrderedDict", payload, nesting).map(Value::OrderedMap)
            },
        ),
    ]);
    entries
}

// == Containers ==
fn sequence(tag: &'static str, matches: Matcher, build: fn(Vec<Value>) -> Value) -> CodecEntry {
    CodecEntry::nested(
        tag,
        matches,
        move |value, nesting| match value {
            Value::List(items) | Value::Tuple(items) | Value::Set(items) | Value::FrozenSet(items) => {
                tree::render(tag, &tree::array_to_json(items, nesting)?)
            }
            other => Err(mismatch(tag, other)),
        },
        move |payload, nesting| tree::decode_array(tag, payload, nesting).map(build),
    )
}

fn mapping(
    tag: &'static str,
    matches: Matcher,
    build: fn(indexmap::IndexMap<String, Value>) -> Value,
) -> CodecEntry {
    CodecEntry::nested(
        tag,
        matches,
        move |value, nesting| match value {
            Value::Dict(map) | Value::DefaultMap(map) => {
                tree::render(tag, &tree::map_to_json(map, nesting)?)
            }
            other => Err(mismatch(tag, other)),
        },
        move |payload, nesting| tree::decode_map(tag, payload, nesting).map(build),
    )
}

fn mismatch(tag: &str, value: &Value) -> DictError {
    DictError::Encode {
        tag: tag.to_string(),
        reason: format!("codec does not accept a {} value", value.type_name()),
    }
}

// == Scalars ==
fn encode_scalar(value: &Value) -> anyhow::Result<String> {
    let payload = match value {
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::None => "None".to_string(),
        Value::DateTime(dt) => format!("{}T{}", dt.format(DATE_FORMAT), format_time(&dt.time())),
        Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        Value::Time(t) => format_time(t),
        Value::Duration(d) => {
            let micros = d
                .num_microseconds()
                .ok_or_else(|| anyhow!("duration {} overflows microseconds", d))?;
            if chrono::Duration::microseconds(micros) != *d {
                bail!("duration {} is finer than a microsecond", d);
            }
            format_seconds(micros)
        }
        Value::Decimal(literal) => literal.clone(),
        Value::Complex(c) => format!("{},{}", format_float(c.re), format_float(c.im)),
        Value::Bytes(bytes) => STANDARD.encode(bytes),
        Value::Uuid(uuid) => uuid.hyphenated().to_string(),
        other => bail!("{} is not a scalar", other.type_name()),
    };
    Ok(payload)
}

fn decode_scalar(tag: &str, payload: &str) -> anyhow::Result<Value> {
    let value = match tag {
        "str" => Value::Str(payload.to_string()),
        "int" => Value::Int(payload.trim().parse().context("invalid integer")?),
        "float" => Value::Float(parse_float(payload)?),
        "bool" => match payload {
            "True" => Value::Bool(true),
            "False" => Value::Bool(false),
            other => bail!("expected True or False, found '{}'", other),
        },
        "NoneType" => match payload {
            "None" => Value::None,
            other => bail!("expected None, found '{}'", other),
        },
        "datetime" => Value::DateTime(NaiveDateTime::parse_from_str(payload, DATETIME_PARSE_FORMAT)?),
        "date" => Value::Date(NaiveDate::parse_from_str(payload, DATE_FORMAT)?),
        "time" => Value::Time(NaiveTime::parse_from_str(payload, TIME_PARSE_FORMAT)?),
        "timedelta" => Value::Duration(chrono::Duration::microseconds(parse_seconds(payload)?)),
        "Decimal" => {
            let literal = payload.trim();
            if !is_decimal_literal(literal) {
                bail!("'{}' is not a decimal literal", payload);
            }
            Value::Decimal(literal.to_string())
        }
        "complex" => {
            let (re, im) = payload
                .split_once(',')
                .ok_or_else(|| anyhow!("expected '<real>,<imag>'"))?;
            Value::Complex(Complex::new(parse_float(re)?, parse_float(im)?))
        }
        "bytes" => Value::Bytes(STANDARD.decode(payload.trim())?),
        "UUID" => Value::Uuid(Uuid::parse_str(payload.trim())?),
        other => bail!("no scalar codec for '{}'", other),
    };
    Ok(value)
}

/// Shortest round-trip form; integral values keep a `.0`.
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        let sign = if f > 0.0 { "" } else { "-" };
        format!("{}inf", sign)
    } else {
        format!("{:?}", f)
    }
}

pub(crate) fn parse_float(text: &str) -> anyhow::Result<f64> {
    let text = text.trim();
    match text.to_ascii_lowercase().as_str() {
        "nan" | "+nan" | "-nan" => Ok(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" => Ok(f64::INFINITY),
        "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
        _ => text
            .parse()
            .with_context(|| format!("invalid float '{}'", text)),
    }
}

/// Seconds with up to six fractional digits, e.g. `3600.0` or `-1.000001`.
fn format_seconds(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let magnitude = micros.unsigned_abs();
    let fraction = format!("{:06}", magnitude % 1_000_000);
    let fraction = match fraction.trim_end_matches('0') {
        "" => "0",
        digits => digits,
    };
    format!("{}{}.{}", sign, magnitude / 1_000_000, fraction)
}

/// Parses a decimal number of seconds into microseconds without going
/// through a float. Digits past the microsecond round half to even.
fn parse_seconds(text: &str) -> anyhow::Result<i64> {
    let text = text.trim();
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (
            &unsigned[..at],
            unsigned[at + 1..]
                .parse::<i64>()
                .with_context(|| format!("invalid exponent in '{}'", text))?,
        ),
        None => (unsigned, 0),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if (whole.is_empty() && fraction.is_empty())
        || !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit())
    {
        bail!("invalid duration '{}'", text);
    }

    // micros = digits * 10^shift
    let all_digits = format!("{}{}", whole, fraction);
    let digits = all_digits.trim_start_matches('0');
    let shift = exponent.saturating_add(6).saturating_sub(fraction.len() as i64);
    let out_of_range = || anyhow!("duration of {} seconds is out of range", text);

    let magnitude: i128 = if digits.is_empty() {
        0
    } else if shift >= 0 {
        if digits.len() as i64 + shift > 20 {
            return Err(out_of_range());
        }
        digits.parse::<i128>()? * 10i128.pow(shift as u32)
    } else {
        let cut = usize::try_from(shift.unsigned_abs()).unwrap_or(usize::MAX);
        let (kept, dropped) = digits.split_at(digits.len().saturating_sub(cut));
        if kept.len() > 20 {
            return Err(out_of_range());
        }
        let kept = if kept.is_empty() { 0 } else { kept.parse::<i128>()? };
        // Fewer dropped digits than the cut means implicit leading zeros,
        // which is always below one half
        let round_up = dropped.len() == cut
            && match dropped.as_bytes()[0] {
                b'5' => dropped[1..].bytes().any(|b| b != b'0') || kept % 2 == 1,
                first => first > b'5',
            };
        kept + i128::from(round_up)
    };

    let signed = if negative { -magnitude } else { magnitude };
    i64::try_from(signed).map_err(|_| out_of_range())
}

fn format_time(time: &NaiveTime) -> String {
    let pattern = match time.nanosecond() {
        0 => "%H:%M:%S",
        n if n % 1_000 == 0 => "%H:%M:%S%.6f",
        _ => "%H:%M:%S%.9f",
    };
    time.format(pattern).to_string()
}
