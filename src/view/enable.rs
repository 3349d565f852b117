//! Tab enable/disable state for one category model.
//!
//! Requests arrive from cache callbacks on whatever thread mutated the cache.
//! Each change of the requested value is posted to the UI queue and applied
//! there in posting order, so the applied state follows the sequence of
//! counts the cache actually reported.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::logger::journal::{JournalEvent, JournalHandle};
use crate::results::outcome::Category;
use crate::ui::event_loop::UiHandle;
use crate::ui::notification::NotificationSet;

pub type EnabledListener = Arc<dyn Fn(Category, bool) + Send + Sync>;

pub struct EnableSignal {
    category: Category,
    notifications: NotificationSet,
    /// Last value posted to the UI queue.
    requested: AtomicBool,
    /// Value the UI currently shows. Written on the UI thread only.
    applied: AtomicBool,
    listeners: Mutex<Vec<EnabledListener>>,
    journal: JournalHandle,
    me: Weak<Self>,
}

impl EnableSignal {
    pub fn new(category: Category, ui: UiHandle, journal: JournalHandle) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            category,
            notifications: NotificationSet::new(ui),
            requested: AtomicBool::new(false),
            applied: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            journal,
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.applied.load(Ordering::Acquire)
    }

    pub fn add_listener(&self, listener: EnabledListener) {
        self.listeners.lock().push(listener);
    }

    /// Re-evaluate against the latest count. Any thread.
    pub fn request(&self, count: usize) {
        let enabled = count > 0;
        if self.requested.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        let me = self.me.clone();
        self.notifications.schedule(move || {
            if let Some(signal) = me.upgrade() {
                signal.apply(enabled);
            }
        });
    }

    /// Cancel in-flight changes and force the disabled state. UI thread.
    pub fn reset(&self) -> usize {
        self.notifications.ui().assert_ui_thread("EnableSignal::reset");
        let cancelled = self.notifications.cancel_all();
        self.requested.store(false, Ordering::Release);
        self.apply(false);
        cancelled
    }

    /// Changes posted and not yet applied or cancelled.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.notifications.outstanding()
    }

    fn apply(&self, enabled: bool) {
        self.notifications.ui().assert_ui_thread("EnableSignal::apply");
        if self.applied.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        tracing::debug!(category = %self.category, enabled, "tab toggled");
        self.journal.send(JournalEvent::TabToggled {
            category: self.category,
            enabled,
        });
        let listeners: Vec<EnabledListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(self.category, enabled);
        }
    }
}
