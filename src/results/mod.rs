//! The test-result side of the protocol: outcome data model, the NodeCache
//! observer contract and cache lookup.

pub mod node_cache;
pub mod outcome;
pub mod provider;
