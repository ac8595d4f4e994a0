//! Keys, key ranges and key paths.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A record key.
///
/// Keys are totally ordered: every number sorts before every string,
/// numbers compare numerically and strings compare by code point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    /// A numeric key.
    Number(f64),
    /// A string key.
    Text(String),
}

impl Key {
    /// Converts a JSON value into a key.
    ///
    /// # Errors
    ///
    /// Returns `DataError` for anything but a finite number or a string.
    pub fn from_value(value: &Value) -> StoreResult<Self> {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() => Ok(Key::Number(f)),
                _ => Err(StoreError::data(format!("{n} is not a valid key"))),
            },
            Value::String(s) => Ok(Key::Text(s.clone())),
            other => Err(StoreError::data(format!("{other} is not a valid key"))),
        }
    }

    /// Converts the key back into JSON, using an integer when the number is
    /// integral.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(f) => match self.as_i64() {
                Some(i) => Value::from(i),
                None => serde_json::Number::from_f64(*f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            },
            Key::Text(s) => Value::String(s.clone()),
        }
    }

    /// A key below every valid key. Never stored; used to seek to the first
    /// entry for an index key.
    pub(crate) fn lowest() -> Self {
        Key::Number(f64::NEG_INFINITY)
    }

    /// Returns the key as an integer if it is an integral number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Key::Number(f) if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
                Some(*f as i64)
            }
            _ => None,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::Number(_), Key::Text(_)) => Ordering::Less,
            (Key::Text(_), Key::Number(_)) => Ordering::Greater,
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.as_i64()) {
            (_, Some(i)) => write!(f, "{i}"),
            (Key::Number(n), None) => write!(f, "{n}"),
            (Key::Text(s), None) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Number(value as f64)
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key::Number(value as f64)
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Number(f64::from(value))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

/// A contiguous interval of keys. The default range matches every key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<(Key, bool)>,
    upper: Option<(Key, bool)>,
}

impl KeyRange {
    /// Matches every key.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some((key.clone(), false)),
            upper: Some((key, false)),
        }
    }

    /// Matches keys between `lower` and `upper`; `*_open` excludes the bound.
    pub fn bound(lower: impl Into<Key>, upper: impl Into<Key>, lower_open: bool, upper_open: bool) -> Self {
        Self {
            lower: Some((lower.into(), lower_open)),
            upper: Some((upper.into(), upper_open)),
        }
    }

    /// Matches keys at or above `lower` (strictly above when `open`).
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Some((lower.into(), open)),
            upper: None,
        }
    }

    /// Matches keys at or below `upper` (strictly below when `open`).
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some((upper.into(), open)),
        }
    }

    /// Returns true if `key` lies inside the range.
    pub fn contains(&self, key: &Key) -> bool {
        !self.lies_below(key) && !self.lies_above(key)
    }

    /// The lower end, if the range has one.
    pub(crate) fn lower_key(&self) -> Option<&Key> {
        self.lower.as_ref().map(|(key, _)| key)
    }

    /// Returns true if `key` sorts before every key in the range.
    pub(crate) fn lies_below(&self, key: &Key) -> bool {
        match &self.lower {
            None => false,
            Some((bound, true)) => key <= bound,
            Some((bound, false)) => key < bound,
        }
    }

    /// Returns true if `key` sorts after every key in the range.
    pub(crate) fn lies_above(&self, key: &Key) -> bool {
        match &self.upper {
            None => false,
            Some((bound, true)) => key >= bound,
            Some((bound, false)) => key > bound,
        }
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> Self {
        KeyRange::only(key)
    }
}

/// Reads the key at a dotted key path (`"latlng.lat"`).
///
/// Returns `Ok(None)` when the path is absent or null.
///
/// # Errors
///
/// Returns `DataError` when the value at the path is not a valid key.
pub fn extract_key(value: &Value, key_path: &str) -> StoreResult<Option<Key>> {
    let mut current = value;
    for segment in key_path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    if current.is_null() {
        return Ok(None);
    }
    Key::from_value(current).map(Some)
}

/// Writes `key` into `value` at a dotted key path, creating intermediate
/// objects.
///
/// # Errors
///
/// Returns `DataError` when a segment along the path is not an object.
pub fn inject_key(value: &mut Value, key_path: &str, key: &Key) -> StoreResult<()> {
    let mut segments = key_path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let map = current
            .as_object_mut()
            .ok_or_else(|| StoreError::data(format!("cannot set key path '{key_path}' on a non-object")))?;
        if segments.peek().is_none() {
            map.insert(segment.to_string(), key.to_value());
            return Ok(());
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn numbers_sort_before_strings() {
        let mut keys = vec![Key::from("b"), Key::from(10i64), Key::from("a"), Key::from(2i64)];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::from(2i64), Key::from(10i64), Key::from("a"), Key::from("b")]
        );
    }

    #[test]
    fn integral_numbers_round_trip_as_integers() {
        let key = Key::from_value(&json!(7)).unwrap();
        assert_eq!(key.as_i64(), Some(7));
        assert_eq!(key.to_value(), json!(7));
        assert_eq!(key.to_string(), "7");
    }

    #[test]
    fn objects_are_not_keys() {
        let err = Key::from_value(&json!({"a": 1})).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::DataError);
    }

    #[test]
    fn range_bounds() {
        let range = KeyRange::bound(2i64, 5i64, true, false);
        assert!(!range.contains(&Key::from(2i64)));
        assert!(range.contains(&Key::from(3i64)));
        assert!(range.contains(&Key::from(5i64)));
        assert!(!range.contains(&Key::from(6i64)));
        assert!(KeyRange::all().contains(&Key::from("anything")));
        assert!(KeyRange::only(4i64).contains(&Key::from(4i64)));
        assert!(KeyRange::upper_bound(4i64, true).contains(&Key::from(3i64)));
        assert!(!KeyRange::lower_bound(4i64, true).contains(&Key::from(4i64)));
    }

    #[test]
    fn key_paths_read_and_write_nested_fields() {
        let mut value = json!({"name": "Mission Chinese", "latlng": {"lat": 40.7}});
        assert_eq!(extract_key(&value, "name").unwrap(), Some(Key::from("Mission Chinese")));
        assert_eq!(extract_key(&value, "missing").unwrap(), None);
        assert!(extract_key(&value, "latlng").is_err());

        inject_key(&mut value, "meta.id", &Key::from(3i64)).unwrap();
        assert_eq!(value["meta"]["id"], json!(3));
    }

    #[test]
    fn injecting_into_scalar_fails() {
        let mut value = json!(5);
        assert!(inject_key(&mut value, "id", &Key::from(1i64)).is_err());
    }

    proptest! {
        #[test]
        fn ordering_is_antisymmetric(a in any::<i32>(), b in ".*") {
            let n = Key::from(i64::from(a));
            let s = Key::from(b);
            prop_assert!(n < s);
            prop_assert_eq!(n.cmp(&s), s.cmp(&n).reverse());
        }
    }
}
