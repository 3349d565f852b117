//! Core types: errors, configuration, lock-order discipline.

pub mod config;
pub mod errors;
pub mod lock_order;
