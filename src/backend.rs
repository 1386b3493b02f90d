//! The remote event store seam.
//!
//! The analyzer never talks to a concrete store; hosts implement
//! [`EventBackend`] over whatever transport they have (a cloud record
//! store, a database, a file). [`MemoryBackend`] is the reference
//! implementation used throughout the test suite and the template for
//! real adapters.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::calendar::{DateInterval, all_time};
use crate::error::CollaboratorError;
use crate::event::Event;
use crate::status::BackendStatus;

/// Callback receiving backend progress notes during a load.
pub type BackendStatusSink<'a> = &'a mut (dyn FnMut(BackendStatus) + Send);

/// Durable store of raw events.
///
/// Loads return events sorted by timestamp, bounds inclusive. Failures
/// propagate to the caller of the provoking analyzer API; the analyzer
/// never retries on its own.
#[async_trait]
pub trait EventBackend: Send + Sync {
    /// Persist one event (best-effort durable write).
    async fn persist_event(&self, event: &Event) -> Result<(), CollaboratorError>;

    /// Persist a batch. The default loops over [`persist_event`](EventBackend::persist_event).
    async fn persist_events(&self, events: &[Event]) -> Result<(), CollaboratorError> {
        for event in events {
            self.persist_event(event).await?;
        }
        Ok(())
    }

    /// Load all events whose timestamps lie within `interval`, sorted by
    /// timestamp, reporting progress through `on_status`.
    async fn load_events(
        &self,
        interval: DateInterval,
        on_status: BackendStatusSink<'_>,
    ) -> Result<Vec<Event>, CollaboratorError>;

    /// Load the entire event history. Defaults to loading the all-time
    /// interval.
    async fn load_all_events(
        &self,
        on_status: BackendStatusSink<'_>,
    ) -> Result<Vec<Event>, CollaboratorError> {
        self.load_events(all_time(), on_status).await
    }
}

/// In-memory [`EventBackend`].
///
/// Stores events behind a `std::sync::Mutex` held only for the duration
/// of a copy; no lock is held across an await point.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    events: Mutex<Vec<Event>>,
}

impl MemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend pre-loaded with `events`.
    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.lock().expect("backend mutex poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventBackend for MemoryBackend {
    async fn persist_event(&self, event: &Event) -> Result<(), CollaboratorError> {
        let mut events = self.events.lock().expect("backend mutex poisoned");
        // Writes are idempotent by event identity.
        if !events.iter().any(|existing| existing.id == event.id) {
            events.push(event.clone());
        }
        Ok(())
    }

    async fn load_events(
        &self,
        interval: DateInterval,
        on_status: BackendStatusSink<'_>,
    ) -> Result<Vec<Event>, CollaboratorError> {
        let mut matching: Vec<Event> = {
            let events = self.events.lock().expect("backend mutex poisoned");
            events
                .iter()
                .filter(|event| interval.contains(event.timestamp))
                .cloned()
                .collect()
        };
        on_status(BackendStatus::FetchedRecords(matching.len() as u64));
        matching.sort_by_key(|event| event.timestamp);
        on_status(BackendStatus::ProcessingRecords(1.0));
        on_status(BackendStatus::Ready);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_fixtures::{at, event_at};

    fn sink() -> impl FnMut(BackendStatus) + Send {
        |_status| {}
    }

    #[tokio::test]
    async fn load_events_filters_and_sorts() {
        let backend = MemoryBackend::new();
        let late = event_at("numericEvent", at(2023, 1, 20, 0, 0, 0), &[]);
        let early = event_at("numericEvent", at(2023, 1, 5, 0, 0, 0), &[]);
        let outside = event_at("numericEvent", at(2023, 2, 1, 0, 0, 0), &[]);
        backend.persist_events(&[late.clone(), early.clone(), outside]).await.unwrap();

        let january = crate::calendar::month_interval(at(2023, 1, 1, 0, 0, 0));
        let mut on_status = sink();
        let loaded = backend.load_events(january, &mut on_status).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, early.id);
        assert_eq!(loaded[1].id, late.id);
    }

    #[tokio::test]
    async fn persist_event_is_idempotent_by_id() {
        let backend = MemoryBackend::new();
        let event = event_at("numericEvent", at(2023, 1, 5, 0, 0, 0), &[]);
        backend.persist_event(&event).await.unwrap();
        backend.persist_event(&event).await.unwrap();
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn load_all_events_covers_history() {
        let backend = MemoryBackend::new();
        backend
            .persist_event(&event_at("numericEvent", at(2021, 6, 1, 0, 0, 0), &[]))
            .await
            .unwrap();
        backend
            .persist_event(&event_at("numericEvent", at(2023, 1, 1, 0, 0, 0), &[]))
            .await
            .unwrap();
        let mut on_status = sink();
        let all = backend.load_all_events(&mut on_status).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn load_reports_fetch_progress() {
        let backend = MemoryBackend::new();
        backend
            .persist_event(&event_at("numericEvent", at(2023, 1, 5, 0, 0, 0), &[]))
            .await
            .unwrap();
        let mut notes = Vec::new();
        let mut on_status = |status: BackendStatus| notes.push(status);
        backend
            .load_events(
                crate::calendar::month_interval(at(2023, 1, 1, 0, 0, 0)),
                &mut on_status,
            )
            .await
            .unwrap();
        assert!(notes.contains(&BackendStatus::FetchedRecords(1)));
        assert!(notes.contains(&BackendStatus::Ready));
    }
}
