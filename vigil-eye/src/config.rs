//! Configuration for vigil-eye

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default confidence threshold applied when a request does not carry one.
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
/// Default overlap threshold for the detector's duplicate suppression.
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// Deployment resource profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceProfile {
    /// Regular deployments, 640px inference ceiling
    #[default]
    Standard,
    /// Memory-constrained deployments (512MB class hosts), 416px ceiling
    Constrained,
}

impl ResourceProfile {
    /// Largest image side passed to inference under this profile.
    pub fn max_dimension(&self) -> u32 {
        match self {
            ResourceProfile::Standard => 640,
            ResourceProfile::Constrained => 416,
        }
    }

    /// Whether per-request scratch memory is released instead of kept for reuse.
    pub fn reclaim_eagerly(&self) -> bool {
        matches!(self, ResourceProfile::Constrained)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceProfile::Standard => "standard",
            ResourceProfile::Constrained => "constrained",
        }
    }
}

impl fmt::Display for ResourceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(ResourceProfile::Standard),
            "constrained" | "minimal" | "lightweight" => Ok(ResourceProfile::Constrained),
            other => Err(format!(
                "unknown resource profile '{}' (expected 'standard' or 'constrained')",
                other
            )),
        }
    }
}

/// Detection pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Resource profile
    pub profile: ResourceProfile,
    /// Explicit ceiling overriding the profile's max dimension
    pub max_dimension: Option<u32>,
    /// Confidence threshold used when a request omits one
    pub default_conf_threshold: f32,
    /// Overlap threshold used when a request omits one
    pub default_nms_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            profile: ResourceProfile::Standard,
            max_dimension: None,
            default_conf_threshold: DEFAULT_CONF_THRESHOLD,
            default_nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }
}

impl DetectionConfig {
    pub fn for_profile(profile: ResourceProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    /// Effective inference ceiling
    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
            .unwrap_or_else(|| self.profile.max_dimension())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_dimension {
            if max == 0 {
                return Err("max_dimension must be greater than zero".to_string());
            }
            if max > 8192 {
                return Err("max_dimension too large (max 8192)".to_string());
            }
        }

        if !self.default_conf_threshold.is_finite() || !self.default_nms_threshold.is_finite() {
            return Err("Default thresholds must be finite numbers".to_string());
        }

        Ok(())
    }
}
