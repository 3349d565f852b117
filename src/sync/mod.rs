//! Two-stage commit buffer and the background snapshot feed in front of it.

pub mod buffer;
pub mod synchronizer;
