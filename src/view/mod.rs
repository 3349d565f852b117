//! UI-thread models and the coordinator that binds them to a node.

pub mod category_model;
pub mod coordinator;
pub mod enable;
pub mod summary;
