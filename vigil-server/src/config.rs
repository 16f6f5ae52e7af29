//! Layered server configuration
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional TOML
//! file, `VIGIL_*` environment variables, the legacy `MODEL_PATH` and `PORT`
//! variables, then command-line flags.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use vigil_eye::{DetectionConfig, ResourceProfile};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MODEL_PATH: &str = "/app/models/best.onnx";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_STATIC_DIR: &str = "static";

#[derive(Error, Debug)]
pub enum ServerConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Values supplied on the command line; `None` leaves lower layers in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub model_path: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub profile: Option<String>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    #[serde(deserialize_with = "deserialize_profile")]
    pub profile: ResourceProfile,
    /// Overrides the profile's inference ceiling
    #[serde(default)]
    pub max_dimension: Option<u32>,
    /// Newline separated class names replacing the model metadata
    #[serde(default)]
    pub labels_path: Option<PathBuf>,
    /// Upper bound on a detect request; unset waits indefinitely
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    pub max_upload_bytes: usize,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            profile: ResourceProfile::Standard,
            max_dimension: None,
            labels_path: None,
            request_timeout_secs: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
        }
    }
}

impl ServerConfig {
    /// Load from every layer using the process environment.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ServerConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_from(overrides, env)
    }

    /// Load from every layer using an explicit environment map.
    pub fn load_from(
        overrides: &ConfigOverrides,
        env: HashMap<String, String>,
    ) -> Result<Self, ServerConfigError> {
        let legacy_model_path = env.get("MODEL_PATH").cloned();
        let legacy_port = env.get("PORT").cloned();

        let mut builder = Config::builder()
            .set_default("host", DEFAULT_HOST)?
            .set_default("port", DEFAULT_PORT as i64)?
            .set_default("model_path", DEFAULT_MODEL_PATH)?
            .set_default("profile", ResourceProfile::Standard.as_str())?
            .set_default("max_upload_bytes", DEFAULT_MAX_UPLOAD_BYTES as i64)?
            .set_default("static_dir", DEFAULT_STATIC_DIR)?;

        if let Some(path) = &overrides.config_file {
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                Environment::with_prefix("VIGIL")
                    .source(Some(env))
                    .try_parsing(true),
            )
            .set_override_option("model_path", legacy_model_path)?
            .set_override_option("port", legacy_port)?
            .set_override_option("model_path", overrides.model_path.clone())?
            .set_override_option("host", overrides.host.clone())?
            .set_override_option("port", overrides.port.map(i64::from))?
            .set_override_option("profile", overrides.profile.clone())?
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;
        Ok(server_config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if self.port == 0 {
            return Err(ServerConfigError::Invalid("port must be greater than zero".to_string()));
        }
        if self.max_upload_bytes == 0 {
            return Err(ServerConfigError::Invalid(
                "max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(ServerConfigError::Invalid(
                "request_timeout_secs must be greater than zero when set".to_string(),
            ));
        }
        self.detection_config()
            .validate()
            .map_err(ServerConfigError::Invalid)
    }

    /// Pipeline configuration derived from this server configuration.
    pub fn detection_config(&self) -> DetectionConfig {
        DetectionConfig {
            max_dimension: self.max_dimension,
            ..DetectionConfig::for_profile(self.profile)
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn deserialize_profile<'de, D>(deserializer: D) -> Result<ResourceProfile, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::load_from(&ConfigOverrides::default(), HashMap::new()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5000);
        assert_eq!(config.model_path, PathBuf::from("/app/models/best.onnx"));
        assert_eq!(config.profile, ResourceProfile::Standard);
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
        assert!(config.request_timeout().is_none());
        assert_eq!(config.detection_config().max_dimension(), 640);
    }

    #[test]
    fn test_legacy_env_vars() {
        let config = ServerConfig::load_from(
            &ConfigOverrides::default(),
            env(&[("MODEL_PATH", "/models/yolo.onnx"), ("PORT", "8080")]),
        )
        .unwrap();
        assert_eq!(config.model_path, PathBuf::from("/models/yolo.onnx"));
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_prefixed_env_vars() {
        let config = ServerConfig::load_from(
            &ConfigOverrides::default(),
            env(&[
                ("VIGIL_PROFILE", "Constrained"),
                ("VIGIL_REQUEST_TIMEOUT_SECS", "30"),
                ("VIGIL_MAX_DIMENSION", "512"),
            ]),
        )
        .unwrap();
        assert_eq!(config.profile, ResourceProfile::Constrained);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.detection_config().max_dimension(), 512);
    }

    #[test]
    fn test_legacy_env_beats_prefixed_and_cli_beats_both() {
        let environment = env(&[("VIGIL_PORT", "7000"), ("PORT", "7001")]);
        let config =
            ServerConfig::load_from(&ConfigOverrides::default(), environment.clone()).unwrap();
        assert_eq!(config.port, 7001);

        let overrides = ConfigOverrides {
            port: Some(9000),
            profile: Some("minimal".to_string()),
            ..Default::default()
        };
        let config = ServerConfig::load_from(&overrides, environment).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.profile, ResourceProfile::Constrained);
    }

    #[test]
    fn test_toml_file_layer() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "host = \"127.0.0.1\"\nport = 6000\nprofile = \"constrained\"\nlabels_path = \"/etc/vigil/labels.txt\""
        )
        .unwrap();

        let overrides = ConfigOverrides {
            config_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config =
            ServerConfig::load_from(&overrides, env(&[("VIGIL_HOST", "10.0.0.1")])).unwrap();
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 6000);
        assert_eq!(config.profile, ResourceProfile::Constrained);
        assert_eq!(config.labels_path, Some(PathBuf::from("/etc/vigil/labels.txt")));
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let overrides = ConfigOverrides {
            config_file: Some(PathBuf::from("/nonexistent/vigil.toml")),
            ..Default::default()
        };
        assert!(matches!(
            ServerConfig::load_from(&overrides, HashMap::new()),
            Err(ServerConfigError::Load(_))
        ));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.request_timeout_secs = Some(0);
        assert!(config.validate().is_err());

        config = ServerConfig::default();
        config.max_upload_bytes = 0;
        assert!(config.validate().is_err());

        config = ServerConfig::default();
        config.max_dimension = Some(0);
        assert!(config.validate().is_err());

        config = ServerConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_profile_rejected() {
        let result = ServerConfig::load_from(
            &ConfigOverrides::default(),
            env(&[("VIGIL_PROFILE", "turbo")]),
        );
        assert!(result.is_err());
    }
}
