//! Streaming course map builder: turns course documents into a structured
//! lesson/section grid by orchestrating streaming LLM calls, reconciling
//! partial JSON as it arrives, and applying targeted patches on top.

pub mod application;
pub mod domain;
pub mod infra;
pub mod prompts;
pub mod state;
