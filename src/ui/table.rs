//! Widget-facing tabular model surface and change events.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;

/// Change notification fired to widgets bound to a model. Row ranges are
/// inclusive and refer to the model state right after the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEvent {
    RowsInserted { first: usize, last: usize },
    RowsDeleted { first: usize, last: usize },
    RowsUpdated { first: usize, last: usize },
    /// Everything may have changed; re-read the whole model.
    DataChanged,
}

/// Widget-side callback. Always invoked on the UI thread.
pub trait TableListener: Send + Sync {
    fn table_changed(&self, event: &TableEvent);
}

/// Read surface a table or list widget binds to. UI thread only.
pub trait TableModel {
    fn row_count(&self) -> usize;
    fn column_count(&self) -> usize;
    /// Panics on an unknown column.
    fn column_name(&self, column: usize) -> &'static str;
    /// Panics on an unknown row or column.
    fn value_at(&self, row: usize, column: usize) -> String;
}

/// Listener registry. Fires outside its own lock so listeners may read the
/// model or register further listeners.
#[derive(Default)]
pub struct ListenerList {
    listeners: Mutex<Vec<Arc<dyn TableListener>>>,
}

impl ListenerList {
    pub fn add(&self, listener: Arc<dyn TableListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn remove(&self, listener: &Arc<dyn TableListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn fire(&self, event: &TableEvent) {
        let listeners: Vec<Arc<dyn TableListener>> = self.listeners.lock().clone();
        for listener in listeners {
            listener.table_changed(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Listener that records every event, for headless hosts and tests.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<TableEvent>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn events(&self) -> Vec<TableEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<TableEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl TableListener for EventLog {
    fn table_changed(&self, event: &TableEvent) {
        self.events.lock().push(*event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_reaches_every_listener() {
        let list = ListenerList::default();
        let a = EventLog::new();
        let b = EventLog::new();
        list.add(a.clone());
        list.add(b.clone());
        list.fire(&TableEvent::DataChanged);
        assert_eq!(a.events(), vec![TableEvent::DataChanged]);
        assert_eq!(b.events(), vec![TableEvent::DataChanged]);
    }

    #[test]
    fn removed_listener_is_not_fired() {
        let list = ListenerList::default();
        let log = EventLog::new();
        let as_dyn: Arc<dyn TableListener> = log.clone();
        list.add(Arc::clone(&as_dyn));
        assert!(list.remove(&as_dyn));
        assert!(list.is_empty());
        list.fire(&TableEvent::DataChanged);
        assert!(log.events().is_empty());
    }
}
