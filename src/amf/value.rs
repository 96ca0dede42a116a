//! AMF value types
//!
//! Decoded values borrow their string data from the message body they were
//! parsed from: an [`AmfString`] is a `Bytes` slice with an explicit length,
//! not a copy. Objects keep their properties in wire order and allow
//! duplicate names; lookups return the first match.

use std::fmt;

use bytes::Bytes;

/// Length-delimited AMF string backed by a shared buffer
///
/// Equality is a case-sensitive byte comparison. The bytes are not required
/// to be valid UTF-8 until [`AmfString::as_str`] is called.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct AmfString(Bytes);

impl AmfString {
    /// Wrap a static string without copying
    pub const fn from_static(s: &'static str) -> Self {
        AmfString(Bytes::from_static(s.as_bytes()))
    }

    /// Raw bytes of the string
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// View as UTF-8, if valid
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Owned UTF-8 string, replacing invalid sequences
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The backing buffer slice
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for AmfString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for AmfString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<Bytes> for AmfString {
    fn from(b: Bytes) -> Self {
        AmfString(b)
    }
}

impl From<&str> for AmfString {
    fn from(s: &str) -> Self {
        AmfString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for AmfString {
    fn from(s: String) -> Self {
        AmfString(Bytes::from(s.into_bytes()))
    }
}

impl PartialEq<str> for AmfString {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for AmfString {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

/// Ordered list of named properties
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmfObject {
    properties: Vec<(AmfString, AmfValue)>,
}

impl AmfObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a property; earlier properties with the same name still win lookups
    pub fn push(&mut self, name: impl Into<AmfString>, value: impl Into<AmfValue>) {
        self.properties.push((name.into(), value.into()));
    }

    /// Builder-style [`AmfObject::push`]
    pub fn with(mut self, name: impl Into<AmfString>, value: impl Into<AmfValue>) -> Self {
        self.push(name, value);
        self
    }

    /// First property with the given name
    pub fn get(&self, name: &str) -> Option<&AmfValue> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AmfString, &AmfValue)> {
        self.properties.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl<K: Into<AmfString>, V: Into<AmfValue>> FromIterator<(K, V)> for AmfObject {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        AmfObject {
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// AMF0 value representation
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// IEEE 754 double (0x00)
    Number(f64),

    /// Boolean (0x01)
    Boolean(bool),

    /// String (0x02, or 0x0C when longer than 65535 bytes)
    String(AmfString),

    /// Anonymous object (0x03)
    Object(AmfObject),

    /// Null (0x05)
    Null,

    /// Undefined (0x06)
    Undefined,

    /// Associative array (0x08): count hint followed by named properties
    EcmaArray(AmfObject),

    /// Dense array (0x0A): element count followed by unnamed values
    StrictArray(Vec<AmfValue>),

    /// Date (0x0B): milliseconds since the Unix epoch plus timezone offset in minutes
    Date { millis: f64, timezone: i16 },

    /// XML document (0x0F), long-string encoded
    Xml(AmfString),
}

impl AmfValue {
    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => s.as_str(),
            _ => None,
        }
    }

    /// Try to get this value as a raw AMF string
    pub fn as_amf_string(&self) -> Option<&AmfString> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an object (anonymous or associative array)
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(o) | AmfValue::EcmaArray(o) => Some(o),
            _ => None,
        }
    }

    /// Try to get this value as a dense array
    pub fn as_array(&self) -> Option<&[AmfValue]> {
        match self {
            AmfValue::StrictArray(a) => Some(a),
            _ => None,
        }
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Get a property from an object value
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    /// Get a string property from an object value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get a number property from an object value
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<i32> for AmfValue {
    fn from(v: i32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v.into())
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.into())
    }
}

impl From<AmfString> for AmfValue {
    fn from(v: AmfString) -> Self {
        AmfValue::String(v)
    }
}

impl From<AmfObject> for AmfValue {
    fn from(v: AmfObject) -> Self {
        AmfValue::Object(v)
    }
}

impl<V: Into<AmfValue>> From<Vec<V>> for AmfValue {
    fn from(v: Vec<V>) -> Self {
        AmfValue::StrictArray(v.into_iter().map(|x| x.into()).collect())
    }
}
