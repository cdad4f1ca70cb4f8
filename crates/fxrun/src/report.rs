use std::fmt::Write as _;
use std::path::PathBuf;

use effects::CHAIN;
use fxconfig::FxConfig;
use serde::Serialize;
use shaderbank::{ShaderDevice, ShaderModuleRegistry};

use crate::pipelines::PipelineStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedShader {
    pub name: String,
    pub stage: String,
}

/// Outcome of loading a shader folder plus the effect chain the
/// configuration would run.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub shader_folder: PathBuf,
    pub loaded: Vec<LoadedShader>,
    pub skipped: Vec<String>,
    pub effect_order: Vec<String>,
    pub wipe_enabled: bool,
    pub pipelines: Vec<PipelineStatus>,
}

impl CheckReport {
    pub fn collect<D: ShaderDevice>(
        registry: &ShaderModuleRegistry<D>,
        config: &FxConfig,
        pipelines: &[PipelineStatus],
    ) -> Self {
        let loaded = registry
            .loaded_names()
            .into_iter()
            .map(|name| LoadedShader {
                name: name.to_string(),
                stage: registry
                    .stage(name)
                    .map(|stage| stage.to_string())
                    .unwrap_or_default(),
            })
            .collect();

        Self {
            shader_folder: registry.folder().to_path_buf(),
            loaded,
            skipped: registry.skipped().to_vec(),
            effect_order: effect_order(config),
            wipe_enabled: config.wipe_enabled,
            pipelines: pipelines.to_vec(),
        }
    }

    pub fn pipeline_failures(&self) -> usize {
        self.pipelines
            .iter()
            .filter(|status| status.error.is_some())
            .count()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "shader folder: {}", self.shader_folder.display());
        let _ = writeln!(out, "loaded {} shader(s):", self.loaded.len());
        for shader in &self.loaded {
            let _ = writeln!(out, "  {:<28} {}", shader.name, shader.stage);
        }
        if !self.skipped.is_empty() {
            let _ = writeln!(out, "skipped (unsupported capability):");
            for name in &self.skipped {
                let _ = writeln!(out, "  {name}");
            }
        }
        if self.effect_order.is_empty() {
            let _ = writeln!(out, "no effects active");
        } else {
            let _ = writeln!(out, "effect order: {}", self.effect_order.join(" -> "));
        }
        let failures = self.pipeline_failures();
        let _ = writeln!(
            out,
            "effect pipelines: {} built, {failures} failed",
            self.pipelines.len() - failures
        );
        for status in &self.pipelines {
            if let Some(error) = &status.error {
                let _ = writeln!(out, "  {:<28} {error}", status.shader);
            }
        }
        out
    }
}

/// Shaders the chain dispatches for the configured presets, in chain order.
pub fn effect_order(config: &FxConfig) -> Vec<String> {
    CHAIN
        .iter()
        .filter(|stage| stage.enabled_by(config))
        .map(|stage| stage.shader().to_string())
        .collect()
}
