//! Toolkit-neutral UI seam: the UI-thread task queue, cancellable scheduled
//! notifications and the table model surface widgets bind to.

pub mod event_loop;
pub mod notification;
pub mod table;
