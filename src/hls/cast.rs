//! Attribute casting for manifest tag values.
//!
//! Every `#EXT-X-...` tag the parser doesn't understand natively ends up as
//! an entry in an [`Attributes`] map. Values are cast into the narrowest
//! [`Value`] that fits:
//!
//! - `3` → [`Value::Int`], `10.0` → [`Value::Float`]
//! - `"quoted"` → [`Value::Str`] (quotes stripped)
//! - `10.0,Segment Title` → [`Value::List`]
//! - `BANDWIDTH=1280000,CODECS="avc1,mp4a"` → [`Value::Map`]
//! - bare `#EXT-X-TAG` (no `:value`) → [`Value::Flag`]
//!
//! Casting never fails; anything unrecognised is kept as a string.

use std::collections::BTreeMap;
use std::fmt;

/// A typed manifest attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    /// Tag present without a value.
    Flag,
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// First positional element of a list, or the value itself for scalars.
    pub fn first(&self) -> &Value {
        match self {
            Self::List(items) => items.first().unwrap_or(self),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Flag => f.write_str("YES"),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Map(map) => {
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                Ok(())
            }
        }
    }
}

/// Named attributes attached to a playlist.
///
/// Keys are normalized with [`attr_name`]. The well-known tags get typed
/// accessors; everything else is reachable through [`Attributes::get`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// `#EXT-X-MEDIA-SEQUENCE`
    pub fn media_sequence(&self) -> Option<i64> {
        self.get("media_sequence").and_then(Value::as_i64)
    }

    /// `#EXT-X-TARGETDURATION`
    pub fn target_duration(&self) -> Option<f64> {
        self.get("targetduration").and_then(Value::as_f64)
    }

    /// `#EXT-X-VERSION`
    pub fn version(&self) -> Option<i64> {
        self.get("version").and_then(Value::as_i64)
    }

    /// `BANDWIDTH` from a stream-info attribute list.
    pub fn bandwidth(&self) -> Option<u64> {
        self.get("bandwidth")
            .and_then(Value::as_i64)
            .and_then(|b| u64::try_from(b).ok())
    }
}

impl From<BTreeMap<String, Value>> for Attributes {
    /// Builds playlist attributes from a stream-info attribute list,
    /// normalizing each key.
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map.into_iter().map(|(k, v)| (attr_name(&k), v)).collect())
    }
}

/// Normalize a tag name into an attribute identifier.
///
/// Strips the `#EXT-X-` (or `#EXT`, or `#`) prefix, lower-cases, and turns
/// every character that can't appear in an identifier into `_`.
pub fn attr_name(tag: &str) -> String {
    let tag = tag.trim();
    let bare = tag
        .strip_prefix("#EXT-X-")
        .or_else(|| tag.strip_prefix("#EXT"))
        .or_else(|| tag.strip_prefix('#'))
        .unwrap_or(tag);

    bare.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Cast a raw tag value into a [`Value`].
pub fn cast_value(raw: &str) -> Value {
    let raw = raw.trim();

    if is_attribute_list(raw) {
        let map = split_top_level(raw)
            .into_iter()
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                Some((key.trim().to_string(), cast_scalar(value)))
            })
            .collect();
        return Value::Map(map);
    }

    let parts = split_top_level(raw);
    if parts.len() > 1 {
        return Value::List(parts.into_iter().map(cast_scalar).collect());
    }

    cast_scalar(raw)
}

fn cast_scalar(raw: &str) -> Value {
    let raw = raw.trim();

    if let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        return Value::Str(inner.to_string());
    }

    if let Ok(v) = raw.parse::<i64>() {
        return Value::Int(v);
    }

    // f64::from_str also accepts "inf"/"NaN", which are names here, not numbers
    if looks_numeric(raw) {
        if let Ok(v) = raw.parse::<f64>() {
            return Value::Float(v);
        }
    }

    Value::Str(raw.to_string())
}

fn looks_numeric(raw: &str) -> bool {
    !raw.is_empty()
        && raw.chars().any(|c| c.is_ascii_digit())
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
}

/// `KEY=VALUE` where the first key is an uppercase attribute name.
fn is_attribute_list(raw: &str) -> bool {
    let Some((key, _)) = raw.split_once('=') else {
        return false;
    };
    !key.is_empty()
        && !key.contains(',')
        && !key.contains('"')
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

/// Split on commas that are not inside double quotes.
fn split_top_level(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}
