//! Shader module registry for the post-processing effect pipeline.
//!
//! The crate turns a folder of precompiled SPIR-V binaries into named GPU
//! shader modules and keeps dependents in sync when that folder changes:
//!
//! ```text
//!   ShaderManifest (builtin or TOML)
//!          │ name, file, requires
//!          ▼
//!   ShaderModuleRegistry::new ──▶ load() ──▶ ShaderDevice::create_shader_module
//!          │
//!   FolderWatcher ──changes──▶ reload() ──▶ unload/load ──▶ ShaderReloadHook::on_shader_reload
//! ```
//!
//! The registry never talks to a concrete GPU API. Backends implement
//! [`ShaderDevice`]; the `effects` crate ships the wgpu one.

mod device;
mod manifest;
mod registry;
mod stage;
mod watch;

use std::path::PathBuf;

pub use device::{Capability, DeviceError, ShaderDevice};
pub use manifest::{ShaderDescriptor, ShaderManifest, EFFECT_SHADERS};
pub use registry::{
    ShaderModuleRegistry, ShaderReloadHook, StageInfo, Subscribed, Subscription, ENTRY_POINT,
};
pub use stage::ShaderStage;
pub use watch::FolderWatcher;

#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("shader binary {path} is missing or empty")]
    ResourceNotFound { path: PathBuf },
    #[error("shader binary {path} is not valid SPIR-V: {reason}")]
    InvalidBinary { path: PathBuf, reason: String },
    #[error("shader '{name}' is not loaded")]
    MissingShader { name: String },
    #[error("cannot infer shader stage from file name '{filename}'")]
    UnknownShaderStage { filename: String },
    #[error("shader '{name}' is a {found} shader, expected {expected}")]
    StageMismatch {
        name: String,
        expected: ShaderStage,
        found: ShaderStage,
    },
    #[error("failed to parse shader manifest: {0}")]
    ManifestParse(#[from] toml::de::Error),
    #[error("invalid shader manifest: {}", .0.join("; "))]
    ManifestValidation(Vec<String>),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}
