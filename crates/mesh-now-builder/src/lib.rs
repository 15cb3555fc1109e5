pub mod artifacts;
pub mod config;
pub mod embed;
pub mod error;
pub mod executor;
pub mod flash;
pub mod log_sanitize;
pub mod orchestrator;
pub mod overlay;
pub mod pipeline;
pub mod targets;
pub mod workspace;

pub use error::{Error, Result};
