//! The immutable event record and the category/column schema types.
//!
//! An [`Event`] is a point-in-time fact: who, what category, when, and a
//! heterogeneous payload keyed by column name. Events are never mutated
//! after construction; identity is the v4 id. [`EventCategory`] and
//! [`EventColumn`] describe the schema aggregators register against --
//! the column named `"id"` is reserved as the synthetic carrier for
//! category-level aggregators and is injected by the builder.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::timestamp_secs;
use crate::value::EventValue;

/// Name of the reserved synthetic column carrying category-level
/// aggregators. User schemas may not register a column under this name.
pub const ID_COLUMN: &str = "id";

/// An immutable analytics event.
///
/// The payload maps column names to [`EventValue`]s; a `BTreeMap` keeps
/// the encoded form deterministic. Timestamps encode as f64 seconds since
/// the Unix epoch, ids as lowercase RFC-4122 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identity (v4).
    pub id: Uuid,
    /// The user the event originated from.
    pub user_id: String,
    /// The category this event belongs to.
    pub category: String,
    /// When the event occurred.
    #[serde(with = "timestamp_secs")]
    pub timestamp: DateTime<Utc>,
    /// Column-name -> value payload.
    pub data: BTreeMap<String, EventValue>,
}

impl Event {
    /// Construct an event with an explicit identity and timestamp.
    ///
    /// Hosts normally go through
    /// [`EventClient::create_event`](crate::client::EventClient::create_event),
    /// which stamps the configured user, a fresh id, and the clock's now.
    pub fn new(
        id: Uuid,
        user_id: impl Into<String>,
        category: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: BTreeMap<String, EventValue>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            category: category.into(),
            timestamp,
            data,
        }
    }

    /// The payload value for `column`, if present.
    pub fn value(&self, column: &str) -> Option<&EventValue> {
        self.data.get(column)
    }

    /// A copy of this event with `column` set to `value`.
    ///
    /// Events are immutable; rewrites (e.g. by a mapping aggregator in a
    /// chain) produce a new event with the same identity.
    pub fn with_value(&self, column: &str, value: EventValue) -> Self {
        let mut data = self.data.clone();
        data.insert(column.to_string(), value);
        Self {
            data,
            ..self.clone()
        }
    }
}

/// A named registration point for aggregators within a category.
///
/// `category_name` is `None` for the synthetic all-events column: an
/// aggregator registered there sees every event regardless of category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventColumn {
    /// Column name within the category payload.
    pub name: String,
    /// Owning category; `None` means the column matches all events.
    pub category_name: Option<String>,
}

impl EventColumn {
    /// A column scoped to one category.
    pub fn new(name: impl Into<String>, category_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category_name: Some(category_name.into()),
        }
    }

    /// The synthetic all-events column.
    pub fn all_events() -> Self {
        Self {
            name: ID_COLUMN.to_string(),
            category_name: None,
        }
    }

    /// Whether `event` is in scope for this column.
    pub fn matches(&self, event: &Event) -> bool {
        match &self.category_name {
            Some(category) => event.category == *category,
            None => true,
        }
    }
}

/// A group of events sharing a logical schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCategory {
    /// Category name, matched against [`Event::category`].
    pub name: String,
    /// Ordered columns, including the injected `"id"` column.
    pub columns: Vec<EventColumn>,
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::{at, event_at};
    use super::*;

    #[test]
    fn with_value_preserves_identity() {
        let event = event_at(
            "numericEvent",
            at(2023, 1, 3, 10, 0, 0),
            &[("numericValueA", EventValue::Number(1.0))],
        );
        let rewritten = event.with_value("numericValueA", EventValue::Number(2.0));
        assert_eq!(rewritten.id, event.id);
        assert_eq!(
            rewritten.value("numericValueA"),
            Some(&EventValue::Number(2.0))
        );
        // The original is untouched.
        assert_eq!(event.value("numericValueA"), Some(&EventValue::Number(1.0)));
    }

    #[test]
    fn column_scoping() {
        let event = event_at("textEvent", at(2023, 1, 3, 10, 0, 0), &[]);
        assert!(EventColumn::all_events().matches(&event));
        assert!(EventColumn::new("textValueA", "textEvent").matches(&event));
        assert!(!EventColumn::new("numericValueA", "numericEvent").matches(&event));
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = event_at(
            "numericEvent",
            at(2023, 1, 14, 9, 30, 0),
            &[
                ("numericValueA", EventValue::Number(4.5)),
                ("label", EventValue::Text("alpha".into())),
                ("flag", EventValue::Bool(false)),
                ("empty", EventValue::Absent),
            ],
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn event_id_encodes_lowercase() {
        let event = event_at("numericEvent", at(2023, 1, 3, 10, 0, 0), &[]);
        let json = serde_json::to_string(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let id = value["id"].as_str().unwrap();
        assert_eq!(id, id.to_lowercase());
    }
}
