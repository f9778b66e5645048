//! Application layer (use-cases, policies).
//!
//! Orchestrates domain logic over the streaming infrastructure without
//! depending on any UI framework or storage.

pub mod events;
pub mod generation;
pub mod history;
pub mod patch_engine;
pub mod revision;
