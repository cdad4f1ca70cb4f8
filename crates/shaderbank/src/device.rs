use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ShaderStage;

/// Optional device features individual shaders may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Ray queries from compute/fragment stages plus hit-position fetch.
    RayQueryPositionFetch,
}

impl Capability {
    pub const ALL: [Capability; 1] = [Capability::RayQueryPositionFetch];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RayQueryPositionFetch => "ray-query-position-fetch",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Capability::ALL
            .iter()
            .copied()
            .find(|capability| capability.as_str() == normalized)
            .ok_or_else(|| format!("unknown capability '{raw}'"))
    }
}

/// A GPU object could not be created, or the device stopped responding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{label}: {message}")]
pub struct DeviceError {
    pub label: String,
    pub message: String,
}

impl DeviceError {
    pub fn new(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            message: message.into(),
        }
    }
}

/// The slice of a GPU device the shader registry needs.
///
/// Modules are destroyed by dropping them; `wait_idle` blocks until all
/// submitted work has completed.
pub trait ShaderDevice {
    type Module;

    fn supports(&self, capability: Capability) -> bool;

    fn create_shader_module(
        &self,
        label: &str,
        stage: ShaderStage,
        words: &[u32],
    ) -> Result<Self::Module, DeviceError>;

    fn wait_idle(&self) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capability_names() {
        assert_eq!(
            " Ray-Query-Position-Fetch ".parse::<Capability>().unwrap(),
            Capability::RayQueryPositionFetch
        );
        assert!("mesh-shading".parse::<Capability>().is_err());
    }
}
