//! Sync journal: JSONL lines written by a dedicated logger thread.

pub mod journal;
pub mod jsonl;
