//! Lock-order discipline for the sync protocol.
//!
//! Three locks take part in every scan: the NodeCache lock, the view-model
//! binding lock and the commit-buffer lock. They must always be taken in that
//! order (cache outer, buffer innermost). The branch coordinator's own state
//! lock sits outside all three; only the UI thread takes it. The cache's own mutation path
//! delivers observer callbacks while holding the cache lock, so a consumer
//! that took its model lock first and then reached for the cache would
//! deadlock against it.
//!
//! [`OrderedMutex`] wraps a `parking_lot::Mutex` with a [`LockLevel`]. In
//! debug builds every acquisition is checked against the levels already held
//! by the current thread and an out-of-order acquisition panics before it can
//! block.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Position of a lock in the global acquisition order. Lower levels are
/// outer locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockLevel {
    /// Branch coordinator state (selected node, running synchronizers).
    Coordinator = 0,
    /// NodeCache scan state.
    Cache = 1,
    /// View-model binding (cache reference and observer registration).
    Model = 2,
    /// Two-stage commit buffer pending queue and live store.
    Buffer = 3,
}

static CHECKS_ENABLED: AtomicBool = AtomicBool::new(true);

thread_local! {
    static HELD: RefCell<Vec<LockLevel>> = const { RefCell::new(Vec::new()) };
}

/// Turn lock-order assertions on or off process-wide. Has no effect in
/// release builds, where checks never run.
pub fn set_checks_enabled(enabled: bool) {
    CHECKS_ENABLED.store(enabled, Ordering::Relaxed);
}

fn checks_active() -> bool {
    cfg!(debug_assertions) && CHECKS_ENABLED.load(Ordering::Relaxed)
}

/// Levels currently held by this thread, outermost first.
#[must_use]
pub fn held_levels() -> Vec<LockLevel> {
    HELD.with(|held| held.borrow().clone())
}

/// Record an acquisition of `level`, panicking if the current thread already
/// holds a lock at the same or an inner level.
fn enter(level: LockLevel) -> LevelToken {
    if !checks_active() {
        return LevelToken { level: None };
    }
    HELD.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(innermost) = held.iter().max().copied() {
            assert!(
                level > innermost,
                "lock order violation: acquiring {level:?} while holding {innermost:?} \
                 (required order: Coordinator -> Cache -> Model -> Buffer)"
            );
        }
        held.push(level);
    });
    LevelToken { level: Some(level) }
}

struct LevelToken {
    level: Option<LockLevel>,
}

impl Drop for LevelToken {
    fn drop(&mut self) {
        if let Some(level) = self.level {
            HELD.with(|held| {
                let mut held = held.borrow_mut();
                if let Some(pos) = held.iter().rposition(|l| *l == level) {
                    held.remove(pos);
                }
            });
        }
    }
}

/// A mutex that participates in the lock-order checks.
#[derive(Debug)]
pub struct OrderedMutex<T> {
    level: LockLevel,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    pub const fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            inner: Mutex::new(value),
        }
    }

    /// Level this mutex was declared at.
    pub const fn level(&self) -> LockLevel {
        self.level
    }

    /// Acquire the lock. Checks ordering before blocking.
    pub fn lock(&self) -> OrderedGuard<'_, T> {
        let token = enter(self.level);
        OrderedGuard {
            guard: self.inner.lock(),
            _token: token,
        }
    }
}

/// Guard returned by [`OrderedMutex::lock`].
pub struct OrderedGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    _token: LevelToken,
}

impl<T> Deref for OrderedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
