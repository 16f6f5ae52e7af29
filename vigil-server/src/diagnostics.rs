//! Introspection payload for `/debug`
//!
//! Everything here is best effort: filesystem or environment lookups that fail
//! are reported inline as strings.

use crate::config::ServerConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use sysinfo::System;
use vigil_eye::DetectionService;

/// Environment variables echoed by `/debug`.
pub const REPORTED_ENV_VARS: [&str; 4] = ["MODEL_PATH", "PORT", "RUST_LOG", "VIGIL_PROFILE"];

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Serialize)]
pub struct RuntimeInfo {
    pub version: String,
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Serialize)]
pub struct MemoryInfo {
    pub total_mb: f64,
    pub available_mb: f64,
    pub used_mb: f64,
    pub percent: f64,
}

/// Directory contents, or the error that prevented listing them.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Listing {
    Entries(Vec<String>),
    Unavailable(String),
}

#[derive(Debug, Serialize)]
pub struct DebugReport {
    pub model_path: String,
    pub model_path_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_file_size_mb: Option<f64>,
    pub working_directory: String,
    pub runtime: RuntimeInfo,
    pub service_state: String,
    pub profile: String,
    pub max_dimension: u32,
    pub model_loaded: bool,
    pub load_error: Option<String>,
    pub env_vars: BTreeMap<String, Option<String>>,
    pub memory: MemoryInfo,
    pub working_directory_listing: Listing,
    pub model_directory_listing: Listing,
}

impl DebugReport {
    pub fn collect(service: &DetectionService, config: &ServerConfig) -> Self {
        let model_path = service.model().path();
        let health = service.health();
        let working_directory = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|e| format!("unavailable: {}", e));

        let model_directory_listing = match model_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => list_directory(dir),
            _ => list_directory(Path::new(".")),
        };

        Self {
            model_path: model_path.display().to_string(),
            model_path_exists: model_path.exists(),
            model_file_size_mb: file_size_mb(model_path),
            working_directory,
            runtime: RuntimeInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            },
            service_state: health.state.to_string(),
            profile: config.profile.to_string(),
            max_dimension: service.config().max_dimension(),
            model_loaded: health.model_loaded,
            load_error: health.load_error,
            env_vars: env_snapshot(),
            memory: memory_info(),
            working_directory_listing: list_directory(Path::new(".")),
            model_directory_listing,
        }
    }
}

pub fn file_size_mb(path: &Path) -> Option<f64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| round2(m.len() as f64 / BYTES_PER_MB))
}

pub fn env_snapshot() -> BTreeMap<String, Option<String>> {
    REPORTED_ENV_VARS
        .iter()
        .map(|name| (name.to_string(), std::env::var(name).ok()))
        .collect()
}

pub fn memory_info() -> MemoryInfo {
    let mut sys = System::new();
    sys.refresh_memory();

    let total = sys.total_memory() as f64;
    let available = sys.available_memory() as f64;
    let used = sys.used_memory() as f64;
    let percent = if total > 0.0 { used / total * 100.0 } else { 0.0 };

    MemoryInfo {
        total_mb: round2(total / BYTES_PER_MB),
        available_mb: round2(available / BYTES_PER_MB),
        used_mb: round2(used / BYTES_PER_MB),
        percent: round2(percent),
    }
}

/// Sorted entry names of `dir`.
pub fn list_directory(dir: &Path) -> Listing {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            Listing::Entries(names)
        }
        Err(e) => Listing::Unavailable(format!("Error listing {}: {}", dir.display(), e)),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
