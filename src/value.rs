//! The event payload value model.
//!
//! [`EventValue`] is the tagged union carried in every event's key->value
//! payload. It is totally ordered and hashable -- including the `Number`
//! variant, via IEEE total ordering on the bit pattern -- so values can
//! key grouping aggregators and produce deterministic encodings.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::timestamp_secs;

/// A single value in an event's payload.
///
/// The encoded form is an externally tagged JSON object (`{"Number": 1.5}`,
/// `{"Text": "hi"}`, ...); dates encode as f64 seconds since the Unix
/// epoch and opaque bytes as base64 text. `Absent` is a distinct key: an
/// event can record that a column was explicitly empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventValue {
    /// A numeric value.
    Number(f64),
    /// A text value. Text is the input to keyword extraction.
    Text(String),
    /// An absolute instant.
    Date(#[serde(with = "timestamp_secs")] DateTime<Utc>),
    /// A boolean value.
    Bool(bool),
    /// Uninterpreted bytes.
    Opaque(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Explicitly no value.
    Absent,
}

impl EventValue {
    /// Rank used to order values of different variants.
    fn variant_rank(&self) -> u8 {
        match self {
            EventValue::Number(_) => 0,
            EventValue::Text(_) => 1,
            EventValue::Date(_) => 2,
            EventValue::Bool(_) => 3,
            EventValue::Opaque(_) => 4,
            EventValue::Absent => 5,
        }
    }

    /// The numeric payload, if this is a `Number`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            EventValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The text payload, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The date payload, if this is a `Date`.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            EventValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// The boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EventValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this is the `Absent` marker.
    pub fn is_absent(&self) -> bool {
        matches!(self, EventValue::Absent)
    }
}

impl PartialEq for EventValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EventValue {}

impl PartialOrd for EventValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (EventValue::Number(a), EventValue::Number(b)) => a.total_cmp(b),
            (EventValue::Text(a), EventValue::Text(b)) => a.cmp(b),
            (EventValue::Date(a), EventValue::Date(b)) => a.cmp(b),
            (EventValue::Bool(a), EventValue::Bool(b)) => a.cmp(b),
            (EventValue::Opaque(a), EventValue::Opaque(b)) => a.cmp(b),
            (EventValue::Absent, EventValue::Absent) => Ordering::Equal,
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

impl Hash for EventValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant_rank().hash(state);
        match self {
            // Bit-pattern hashing is consistent with total_cmp equality.
            EventValue::Number(n) => n.to_bits().hash(state),
            EventValue::Text(s) => s.hash(state),
            EventValue::Date(d) => d.hash(state),
            EventValue::Bool(b) => b.hash(state),
            EventValue::Opaque(bytes) => bytes.hash(state),
            EventValue::Absent => {}
        }
    }
}

impl From<f64> for EventValue {
    fn from(n: f64) -> Self {
        EventValue::Number(n)
    }
}

impl From<&str> for EventValue {
    fn from(s: &str) -> Self {
        EventValue::Text(s.to_string())
    }
}

impl From<String> for EventValue {
    fn from(s: String) -> Self {
        EventValue::Text(s)
    }
}

impl From<bool> for EventValue {
    fn from(b: bool) -> Self {
        EventValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for EventValue {
    fn from(d: DateTime<Utc>) -> Self {
        EventValue::Date(d)
    }
}

/// Serde adapter embedding opaque bytes in JSON as base64 text.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(value: &EventValue) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equality_respects_variant_tag() {
        assert_ne!(EventValue::Number(1.0), EventValue::Text("1".into()));
        assert_ne!(EventValue::Bool(false), EventValue::Absent);
        assert_eq!(EventValue::Absent, EventValue::Absent);
    }

    #[test]
    fn numbers_order_totally() {
        let mut values = vec![
            EventValue::Number(2.0),
            EventValue::Number(f64::NEG_INFINITY),
            EventValue::Number(-1.5),
            EventValue::Number(0.0),
        ];
        values.sort();
        assert_eq!(values[0], EventValue::Number(f64::NEG_INFINITY));
        assert_eq!(values[3], EventValue::Number(2.0));
    }

    #[test]
    fn equal_values_hash_equal() {
        let a = EventValue::Text("alpha".into());
        let b = EventValue::Text("alpha".into());
        assert_eq!(hash_of(&a), hash_of(&b));

        let x = EventValue::Number(3.25);
        let y = EventValue::Number(3.25);
        assert_eq!(hash_of(&x), hash_of(&y));
    }

    #[test]
    fn absent_is_a_distinct_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(EventValue::Absent, 1u32);
        map.insert(EventValue::Number(0.0), 2u32);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&EventValue::Absent], 1);
    }

    #[test]
    fn serde_uses_single_key_objects() {
        let json = serde_json::to_string(&EventValue::Number(1.5)).unwrap();
        assert_eq!(json, r#"{"Number":1.5}"#);
        let json = serde_json::to_string(&EventValue::Text("hi".into())).unwrap();
        assert_eq!(json, r#"{"Text":"hi"}"#);
    }

    #[test]
    fn date_encodes_as_epoch_seconds() {
        let instant = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 30).unwrap();
        let json = serde_json::to_string(&EventValue::Date(instant)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["Date"].as_f64(), Some(1_672_531_230.0));
        let back: EventValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventValue::Date(instant));
    }

    #[test]
    fn opaque_roundtrips_through_base64() {
        let original = EventValue::Opaque(vec![0, 159, 146, 150]);
        let json = serde_json::to_string(&original).unwrap();
        let back: EventValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
        // Raw bytes never appear in the JSON text.
        assert!(json.contains("Opaque"));
    }

    #[test]
    fn all_variants_roundtrip() {
        let values = vec![
            EventValue::Number(-0.5),
            EventValue::Text("keystone".into()),
            EventValue::Date(Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap()),
            EventValue::Bool(true),
            EventValue::Opaque(b"blob".to_vec()),
            EventValue::Absent,
        ];
        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: EventValue = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value, "round trip failed for {json}");
        }
    }
}
