//! Thin, typed event-submission client.
//!
//! Creation and dispatch of events is decoupled from the analyzer: the
//! client stamps identity and time onto payloads and persists them
//! through the backend, where the analyzer discovers them on its next
//! reload.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::backend::EventBackend;
use crate::clock::Clock;
use crate::error::AnalyticsError;
use crate::event::Event;
use crate::value::EventValue;

/// Creates and submits events against a backend.
///
/// Cheap to clone; clones share the backend and clock.
#[derive(Clone)]
pub struct EventClient {
    backend: Arc<dyn EventBackend>,
    user_identifier: String,
    clock: Arc<dyn Clock>,
}

impl EventClient {
    /// A client stamping `user_identifier` onto created events.
    pub fn new(
        backend: Arc<dyn EventBackend>,
        user_identifier: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            user_identifier: user_identifier.into(),
            clock,
        }
    }

    /// Build an event for `category` stamped with the configured user,
    /// the clock's now, and a fresh v4 id. The event is not persisted
    /// until submitted.
    pub fn create_event(&self, category: &str, data: BTreeMap<String, EventValue>) -> Event {
        Event::new(
            Uuid::new_v4(),
            self.user_identifier.clone(),
            category,
            self.clock.now(),
            data,
        )
    }

    /// Persist one event through the backend.
    pub async fn submit_event(&self, event: &Event) -> Result<(), AnalyticsError> {
        self.backend
            .persist_event(event)
            .await
            .map_err(AnalyticsError::Backend)
    }

    /// Persist a batch of events through the backend.
    pub async fn submit_events(&self, events: &[Event]) -> Result<(), AnalyticsError> {
        self.backend
            .persist_events(events)
            .await
            .map_err(AnalyticsError::Backend)
    }
}

impl std::fmt::Debug for EventClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventClient")
            .field("user_identifier", &self.user_identifier)
            .finish()
    }
}
