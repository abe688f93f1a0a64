//! Setting protobuf fields from strings.
//!
//! Path captures, query parameters and form bodies all arrive as text. The
//! populator walks a [`DynamicMessage`] along a field path and converts the
//! strings into typed values for the leaf field:
//!
//! - singular fields take exactly one value
//! - repeated fields append every value in order
//! - map fields take exactly two values, key then value
//!
//! Scalars cover every protobuf kind; `bytes` are base64 (standard, then
//! URL-safe); enums accept a value name or number. The well-known
//! `Timestamp` (RFC 3339), `Duration` (`1h2m3.5s`), wrapper types and
//! `FieldMask` (comma-separated paths) are recognized by full name.
//!
//! All values are parsed before the message is touched, so a failed call
//! leaves the message as it was.

use std::collections::HashMap;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor, ReflectMessage, Value};

/// Errors produced while populating a message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PopulateError {
    /// No field with this name (JSON name or proto name) exists.
    #[error("field not found: {0}")]
    FieldNotFound(String),

    /// The field path was empty.
    #[error("empty field path")]
    EmptyPath,

    /// A non-final path component is not a singular message field.
    #[error("field {0} is not a message")]
    NotMessage(String),

    /// Wrong number of values for the field's cardinality.
    #[error("field {field} expects {expected} value(s), got {actual}")]
    ValueCount {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// A value could not be parsed as the field's type.
    #[error("invalid value {value:?} for field {field}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// The leaf is a message type that cannot be built from a string.
    #[error("unsupported message type {message} for field {field}")]
    UnsupportedMessage { field: String, message: String },
}

impl PopulateError {
    /// Returns true for [`PopulateError::FieldNotFound`].
    pub fn is_field_not_found(&self) -> bool {
        matches!(self, PopulateError::FieldNotFound(_))
    }
}

impl From<PopulateError> for trpc_axum_core::Error {
    fn from(err: PopulateError) -> Self {
        trpc_axum_core::Error::decode_fail(err.to_string()).with_cause(err)
    }
}

/// Set the field at `field_path` in `msg` from `values`.
pub fn populate_message<S, V>(
    msg: &mut DynamicMessage,
    field_path: &[S],
    values: &[V],
) -> Result<(), PopulateError>
where
    S: AsRef<str>,
    V: AsRef<str>,
{
    let fields = resolve_path(&msg.descriptor(), field_path)?;
    let Some((leaf, parents)) = fields.split_last() else {
        return Err(PopulateError::EmptyPath);
    };
    let parsed = parse_leaf(leaf, values)?;

    let mut current = msg;
    for fd in parents {
        current = current
            .get_field_mut(fd)
            .as_message_mut()
            .ok_or_else(|| PopulateError::NotMessage(fd.full_name().to_owned()))?;
    }
    apply(current, leaf, parsed)
}

/// Populate `msg` from `key=value` pairs.
///
/// Keys are dot-separated field paths; repeated keys are grouped in
/// first-seen order. `skip` is consulted with each split key and may claim
/// it, in which case the pair is ignored. Unknown fields are ignored when
/// `discard_unknown` is set.
pub fn populate_pairs<I, F>(
    msg: &mut DynamicMessage,
    pairs: I,
    mut skip: F,
    discard_unknown: bool,
) -> Result<(), PopulateError>
where
    I: IntoIterator<Item = (String, String)>,
    F: FnMut(&[&str]) -> bool,
{
    for (key, values) in group_pairs(pairs) {
        let path: Vec<&str> = key.split('.').collect();
        if skip(&path) {
            continue;
        }
        match populate_message(msg, &path, &values) {
            Err(err) if discard_unknown && err.is_field_not_found() => {
                tracing::debug!(key = %key, "discarding unknown parameter");
            }
            other => other?,
        }
    }
    Ok(())
}

/// Group pairs by key, keeping the first-seen order of keys and of values.
pub fn group_pairs<I>(pairs: I) -> Vec<(String, Vec<String>)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in pairs {
        match index.get(&key) {
            Some(&i) => grouped[i].1.push(value),
            None => {
                index.insert(key.clone(), grouped.len());
                grouped.push((key, vec![value]));
            }
        }
    }
    grouped
}

enum Parsed {
    Single(Value),
    List(Vec<Value>),
    Entry(MapKey, Value),
}

fn resolve_path<S: AsRef<str>>(
    desc: &MessageDescriptor,
    path: &[S],
) -> Result<Vec<FieldDescriptor>, PopulateError> {
    let mut fields = Vec::with_capacity(path.len());
    let mut current = desc.clone();
    for (i, name) in path.iter().enumerate() {
        let name = name.as_ref();
        let fd = current
            .get_field_by_json_name(name)
            .or_else(|| current.get_field_by_name(name))
            .ok_or_else(|| PopulateError::FieldNotFound(join(&path[..=i])))?;
        if i + 1 < path.len() {
            match fd.kind() {
                Kind::Message(md) if !fd.is_list() && !fd.is_map() => current = md,
                _ => return Err(PopulateError::NotMessage(fd.full_name().to_owned())),
            }
        }
        fields.push(fd);
    }
    Ok(fields)
}

fn join<S: AsRef<str>>(path: &[S]) -> String {
    path.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(".")
}

fn parse_leaf<V: AsRef<str>>(fd: &FieldDescriptor, values: &[V]) -> Result<Parsed, PopulateError> {
    let count = |expected: usize| PopulateError::ValueCount {
        field: fd.full_name().to_owned(),
        expected,
        actual: values.len(),
    };

    if fd.is_map() {
        let [key, value] = values else {
            return Err(count(2));
        };
        let Kind::Message(entry) = fd.kind() else {
            return Err(PopulateError::NotMessage(fd.full_name().to_owned()));
        };
        let key_fd = entry.map_entry_key_field();
        let value_fd = entry.map_entry_value_field();
        let key = parse_value(&key_fd, key.as_ref())?;
        let key = map_key(key).ok_or_else(|| PopulateError::InvalidValue {
            field: fd.full_name().to_owned(),
            value: values[0].as_ref().to_owned(),
            reason: "not a valid map key".into(),
        })?;
        let value = parse_value(&value_fd, value.as_ref())?;
        return Ok(Parsed::Entry(key, value));
    }

    if fd.is_list() {
        let list = values
            .iter()
            .map(|v| parse_value(fd, v.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Parsed::List(list));
    }

    let [value] = values else {
        return Err(count(1));
    };
    parse_value(fd, value.as_ref()).map(Parsed::Single)
}

fn apply(msg: &mut DynamicMessage, fd: &FieldDescriptor, parsed: Parsed) -> Result<(), PopulateError> {
    let mismatch = || PopulateError::InvalidValue {
        field: fd.full_name().to_owned(),
        value: String::new(),
        reason: "type mismatch".into(),
    };
    match parsed {
        Parsed::Single(value) => msg.try_set_field(fd, value).map_err(|_| mismatch()),
        Parsed::List(values) => {
            msg.get_field_mut(fd)
                .as_list_mut()
                .ok_or_else(mismatch)?
                .extend(values);
            Ok(())
        }
        Parsed::Entry(key, value) => {
            msg.get_field_mut(fd)
                .as_map_mut()
                .ok_or_else(mismatch)?
                .insert(key, value);
            Ok(())
        }
    }
}

fn map_key(value: Value) -> Option<MapKey> {
    match value {
        Value::Bool(v) => Some(MapKey::Bool(v)),
        Value::I32(v) => Some(MapKey::I32(v)),
        Value::I64(v) => Some(MapKey::I64(v)),
        Value::U32(v) => Some(MapKey::U32(v)),
        Value::U64(v) => Some(MapKey::U64(v)),
        Value::String(v) => Some(MapKey::String(v)),
        _ => None,
    }
}

/// Parse one string as a value of `fd`'s element type.
fn parse_value(fd: &FieldDescriptor, s: &str) -> Result<Value, PopulateError> {
    let invalid = |reason: String| PopulateError::InvalidValue {
        field: fd.full_name().to_owned(),
        value: s.to_owned(),
        reason,
    };
    parse_kind(fd, &fd.kind(), s).map_err(invalid)
}

fn parse_kind(fd: &FieldDescriptor, kind: &Kind, s: &str) -> Result<Value, String> {
    fn num<T: FromStr>(s: &str) -> Result<T, String>
    where
        T::Err: std::fmt::Display,
    {
        s.parse::<T>().map_err(|e| e.to_string())
    }

    Ok(match kind {
        Kind::Double => Value::F64(num(s)?),
        Kind::Float => Value::F32(num(s)?),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(num(s)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Value::I64(num(s)?),
        Kind::Uint32 | Kind::Fixed32 => Value::U32(num(s)?),
        Kind::Uint64 | Kind::Fixed64 => Value::U64(num(s)?),
        Kind::Bool => Value::Bool(parse_bool(s).ok_or("invalid boolean")?),
        Kind::String => Value::String(s.to_owned()),
        Kind::Bytes => Value::Bytes(parse_bytes(s)?),
        Kind::Enum(desc) => {
            let number = match desc.get_value_by_name(s) {
                Some(v) => v.number(),
                None => s
                    .parse::<i32>()
                    .ok()
                    .and_then(|n| desc.get_value(n))
                    .map(|v| v.number())
                    .ok_or_else(|| format!("unknown value of enum {}", desc.full_name()))?,
            };
            Value::EnumNumber(number)
        }
        Kind::Message(desc) => Value::Message(parse_well_known(fd, desc, s)?),
    })
}

/// Accepts the spellings `1 t T TRUE true True 0 f F FALSE false False`.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_bytes(s: &str) -> Result<Bytes, String> {
    general_purpose::STANDARD
        .decode(s)
        .or_else(|_| general_purpose::URL_SAFE.decode(s))
        .map(Bytes::from)
        .map_err(|e| e.to_string())
}

fn parse_well_known(fd: &FieldDescriptor, desc: &MessageDescriptor, s: &str) -> Result<DynamicMessage, String> {
    let mut msg = DynamicMessage::new(desc.clone());
    match desc.full_name() {
        "google.protobuf.Timestamp" => {
            let ts = prost_types::Timestamp::from_str(s).map_err(|e| e.to_string())?;
            set(&mut msg, "seconds", Value::I64(ts.seconds))?;
            set(&mut msg, "nanos", Value::I32(ts.nanos))?;
        }
        "google.protobuf.Duration" => {
            let (seconds, nanos) = parse_duration(s).ok_or("invalid duration")?;
            set(&mut msg, "seconds", Value::I64(seconds))?;
            set(&mut msg, "nanos", Value::I32(nanos))?;
        }
        "google.protobuf.FieldMask" => {
            let paths = s
                .split(',')
                .filter(|p| !p.is_empty())
                .map(|p| Value::String(p.to_owned()))
                .collect();
            set(&mut msg, "paths", Value::List(paths))?;
        }
        "google.protobuf.DoubleValue"
        | "google.protobuf.FloatValue"
        | "google.protobuf.Int64Value"
        | "google.protobuf.UInt64Value"
        | "google.protobuf.Int32Value"
        | "google.protobuf.UInt32Value"
        | "google.protobuf.BoolValue"
        | "google.protobuf.StringValue"
        | "google.protobuf.BytesValue" => {
            let value_fd = desc
                .get_field_by_name("value")
                .ok_or("wrapper type without value field")?;
            let value = parse_kind(&value_fd, &value_fd.kind(), s)?;
            msg.try_set_field(&value_fd, value).map_err(|e| e.to_string())?;
        }
        other => {
            return Err(
                PopulateError::UnsupportedMessage {
                    field: fd.full_name().to_owned(),
                    message: other.to_owned(),
                }
                .to_string(),
            );
        }
    }
    Ok(msg)
}

fn set(msg: &mut DynamicMessage, name: &str, value: Value) -> Result<(), String> {
    let fd = msg
        .descriptor()
        .get_field_by_name(name)
        .ok_or_else(|| format!("missing field {name}"))?;
    msg.try_set_field(&fd, value).map_err(|e| e.to_string())
}

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Parse a duration such as `300ms`, `-1.5h` or `2h45m`.
///
/// Units are `ns`, `us` (`µs`), `ms`, `s`, `m` and `h`. A bare `0` is
/// accepted. Returns seconds and same-signed nanoseconds.
pub fn parse_duration(s: &str) -> Option<(i64, i32)> {
    let (negative, mut rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if rest == "0" {
        return Some((0, 0));
    }
    if rest.is_empty() {
        return None;
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut total: i128 = 0;
    while !rest.is_empty() {
        let split = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);
        let split = tail.find(is_number).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(split);
        rest = tail;

        let scale: i128 = match unit {
            "ns" => 1,
            "us" | "\u{b5}s" | "\u{3bc}s" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SECOND,
            "m" => 60 * NANOS_PER_SECOND,
            "h" => 3600 * NANOS_PER_SECOND,
            _ => return None,
        };
        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        let whole: i128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut value = whole.checked_mul(scale)?;
        let mut place = scale;
        for digit in frac.bytes() {
            if !digit.is_ascii_digit() {
                return None;
            }
            place /= 10;
            value += i128::from(digit - b'0') * place;
        }
        total = total.checked_add(value)?;
    }

    if negative {
        total = -total;
    }
    let seconds = i64::try_from(total / NANOS_PER_SECOND).ok()?;
    let nanos = i32::try_from(total % NANOS_PER_SECOND).ok()?;
    Some((seconds, nanos))
}
