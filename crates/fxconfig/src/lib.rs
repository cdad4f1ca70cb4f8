use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Effect preset keys recognised under `[effects.<name>]`, in chain order.
pub const KNOWN_EFFECTS: [&str; 12] = [
    "teleport",
    "color_tint",
    "inverse_bw",
    "hue_shift",
    "night_vision",
    "chromatic_aberration",
    "distorted_sides",
    "waves",
    "radial_blur",
    "vhs",
    "dither",
    "crt",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FxConfig {
    pub version: u32,
    pub shader_folder: PathBuf,
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    #[serde(default)]
    pub wipe_enabled: bool,
    #[serde(
        default = "default_watch_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub watch_interval: Duration,
    #[serde(default)]
    pub disable_capabilities: Vec<String>,
    #[serde(default)]
    pub effects: BTreeMap<String, EffectPreset>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EffectPreset {
    #[serde(default)]
    pub active: bool,
    #[serde(default, deserialize_with = "deserialize_seconds_opt")]
    pub transition_in: Option<f32>,
    #[serde(default, deserialize_with = "deserialize_seconds_opt")]
    pub transition_out: Option<f32>,
    #[serde(default)]
    pub intensity: Option<f32>,
    #[serde(default)]
    pub amplitude: Option<f32>,
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub x_multiplier: Option<f32>,
    #[serde(default)]
    pub color: Option<[f32; 3]>,
}

impl EffectPreset {
    pub fn transition_in_secs(&self) -> f32 {
        self.transition_in.unwrap_or(0.0)
    }

    pub fn transition_out_secs(&self) -> f32 {
        self.transition_out.unwrap_or(0.0)
    }
}

fn default_watch_interval() -> Duration {
    Duration::from_millis(500)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration_opt(deserializer).map(|d| d.unwrap_or_else(default_watch_interval))
}

fn deserialize_seconds_opt<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration_opt(deserializer).map(|d| d.map(|d| d.as_secs_f32()))
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Duration::try_from_secs_f64(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration {v}: {err}")))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl FxConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: FxConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a config file. Relative `shader_folder` and
    /// `manifest` paths are resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        if self.shader_folder.is_relative() {
            self.shader_folder = base.join(&self.shader_folder);
        }
        if let Some(manifest) = self.manifest.as_mut() {
            if manifest.is_relative() {
                *manifest = base.join(&*manifest);
            }
        }
    }

    pub fn effect(&self, name: &str) -> Option<&EffectPreset> {
        self.effects.get(name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.shader_folder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "shader_folder must not be empty".into(),
            ));
        }

        if self.watch_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "watch_interval must be greater than zero".into(),
            ));
        }

        for capability in &self.disable_capabilities {
            if capability.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "disable_capabilities contains an empty entry".into(),
                ));
            }
        }

        for (name, preset) in &self.effects {
            if !KNOWN_EFFECTS.contains(&name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "unknown effect '{name}'; expected one of {}",
                    KNOWN_EFFECTS.join(", ")
                )));
            }

            if let Some(intensity) = preset.intensity {
                if !(0.0..=1.0).contains(&intensity) {
                    return Err(ConfigError::Invalid(format!(
                        "effect '{name}' intensity must be within [0, 1]"
                    )));
                }
            }

            if let Some(color) = preset.color {
                if color.iter().any(|channel| channel.is_nan() || *channel < 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "effect '{name}' color channels must be non-negative"
                    )));
                }
            }
        }

        Ok(())
    }
}
