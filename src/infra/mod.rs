//! Infrastructure layer (IO adapters and mechanical services).

pub mod app_config;
pub mod import;
pub mod notify;
pub mod reconcile;
pub mod source;
pub mod stream;
pub mod token_budget;
