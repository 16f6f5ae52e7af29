//! vigil-server: HTTP facade over the vigil-eye detection pipeline

pub mod config;
pub mod diagnostics;
pub mod http;
pub mod metrics;
pub mod static_files;

pub use config::{ConfigOverrides, ServerConfig, ServerConfigError};
pub use http::{create_router, ApiState};
