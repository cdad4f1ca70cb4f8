//! The shader table as data: which named shaders exist, which binary file each
//! one is loaded from, and which device capability (if any) it needs.
//!
//! Types:
//!
//! - `ShaderManifest` is the ordered list of descriptors handed to
//!   `ShaderModuleRegistry`. It parses from TOML (`[[shader]]` entries) or comes
//!   from `ShaderManifest::builtin`, the engine's default table.
//! - `ShaderDescriptor` names one shader, its binary filename (whose suffix
//!   decides the stage), and an optional `Capability` requirement.
//!
//! Functions:
//!
//! - `ShaderManifest::validate` returns every issue at once so a broken
//!   manifest can be fixed in one pass.
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Capability, ShaderError};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShaderManifest {
    #[serde(default, rename = "shader")]
    pub shaders: Vec<ShaderDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShaderDescriptor {
    pub name: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Capability>,
}

impl ShaderDescriptor {
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            requires: None,
        }
    }

    pub fn requiring(mut self, capability: Capability) -> Self {
        self.requires = Some(capability);
        self
    }
}

const BUILTIN_SHADERS: &[(&str, &str)] = &[
    ("RGenPrimary", "RtRaygenPrimary.rgen.spv"),
    ("RGenReflRefr", "RtRaygenReflRefr.rgen.spv"),
    ("RGenDirect", "RtRaygenDirect.rgen.spv"),
    ("RGenIndirectInit", "RtRaygenIndirectInit.rgen.spv"),
    ("CmIndirectFinal", "RtRaygenIndirectFinal.comp.spv"),
    ("RGenGradients", "RtGradients.rgen.spv"),
    ("RInitialReservoirs", "RtInitialReservoirs.rgen.spv"),
    ("RVolumetric", "RtVolumetric.rgen.spv"),
    ("RMiss", "RtMiss.rmiss.spv"),
    ("RMissShadow", "RtMissShadowCheck.rmiss.spv"),
    ("RClsOpaque", "RtClsOpaque.rchit.spv"),
    ("RAlphaTest", "RtAlphaTest.rahit.spv"),
    ("CPrepareFinal", "CmPrepareFinal.comp.spv"),
    ("CLuminanceHistogram", "CmLuminanceHistogram.comp.spv"),
    ("CLuminanceAvg", "CmLuminanceAvg.comp.spv"),
    ("CVolumetricProcess", "CmVolumetricProcess.comp.spv"),
    ("ScatterAccum", "CmScatterAccum.comp.spv"),
    ("Fluid_Generate", "Fluid_Generate.comp.spv"),
    ("Fluid_VisualizeVert", "Fluid_Visualize.vert.spv"),
    ("Fluid_VisualizeFrag", "Fluid_Visualize.frag.spv"),
    ("Fluid_DepthSmooth", "Fluid_DepthSmooth.comp.spv"),
    ("FragWorld", "RsWorld_RT.frag.spv"),
    ("FragWorldClassic", "RsWorld_Classic.frag.spv"),
    ("FragSky", "RsSky.frag.spv"),
    ("FragSwapchain", "RsSwapchain.frag.spv"),
    ("VertDefault", "RsRasterizer.vert.spv"),
    ("VertDefaultMultiview", "RsRasterizerMultiview.vert.spv"),
    ("VertFullscreenQuad", "RsFullscreenQuad.vert.spv"),
    ("FragDepthCopying", "RsDepthCopying.frag.spv"),
    ("CVertexPreprocess", "CmVertexPreprocess.comp.spv"),
    ("CAntiFirefly", "CmAntiFirefly.comp.spv"),
    ("CSVGFTemporalAccum", "CmSVGFTemporalAccumulation.comp.spv"),
    ("CSVGFVarianceEstim", "CmSVGFEstimateVariance.comp.spv"),
    ("CSVGFAtrous", "CmSVGFAtrous.comp.spv"),
    ("CSVGFAtrous_Iter0", "CmSVGFAtrous_Iter0.comp.spv"),
    ("CASVGFGradientAtrous", "CmASVGFGradientAtrous.comp.spv"),
    ("CBloomDownsample", "CmBloomDownsample.comp.spv"),
    ("CBloomUpsample", "CmBloomUpsample.comp.spv"),
    ("CBloomApply", "CmBloomApply.comp.spv"),
    ("CBloomPreload", "CmBloomPreload.comp.spv"),
    ("CCheckerboard", "CmCheckerboard.comp.spv"),
    ("CCas", "CmCas.comp.spv"),
    ("VertLensFlare", "RsRasterizerLensFlare.vert.spv"),
    ("FragLensFlare", "RsRasterizerLensFlare.frag.spv"),
    ("CCullLensFlares", "CmCullLensFlares.comp.spv"),
    ("VertDecal", "RsDecal.vert.spv"),
    ("FragDecal", "RsDecal.frag.spv"),
    ("DecalNormalsCopy", "CmDecalNormalsCopy.comp.spv"),
];

/// Screen-space effect shaders; every one is a compute shader.
pub const EFFECT_SHADERS: &[(&str, &str)] = &[
    ("EffectWipe", "EfWipe.comp.spv"),
    ("EffectRadialBlur", "EfRadialBlur.comp.spv"),
    ("EffectChromaticAberration", "EfChromaticAberration.comp.spv"),
    ("EffectInverseBW", "EfInverseBW.comp.spv"),
    ("EffectDistortedSides", "EfDistortedSides.comp.spv"),
    ("EffectWaves", "EfWaves.comp.spv"),
    ("EffectColorTint", "EfColorTint.comp.spv"),
    ("EffectTeleport", "EfTeleport.comp.spv"),
    ("EffectHueShift", "EfHueShift.comp.spv"),
    ("EffectNightVision", "EfNightVision.comp.spv"),
    ("EffectCrtDemodulateEncode", "EfCrtDemodulateEncode.comp.spv"),
    ("EffectCrtDecode", "EfCrtDecode.comp.spv"),
    ("EffectVHS", "EfVHS.comp.spv"),
    ("EffectDither", "EfDither.comp.spv"),
];

impl ShaderManifest {
    /// The engine's full default table, ray tracing stages included.
    pub fn builtin() -> Self {
        let mut shaders: Vec<ShaderDescriptor> = BUILTIN_SHADERS
            .iter()
            .map(|(name, file)| ShaderDescriptor::new(*name, *file))
            .collect();
        shaders.push(
            ShaderDescriptor::new("Fluid_Particles", "Fluid_Particles.comp.spv")
                .requiring(Capability::RayQueryPositionFetch),
        );
        shaders.extend(
            EFFECT_SHADERS
                .iter()
                .map(|(name, file)| ShaderDescriptor::new(*name, *file)),
        );
        Self { shaders }
    }

    /// Only the post-processing effect shaders.
    pub fn builtin_effects() -> Self {
        Self {
            shaders: EFFECT_SHADERS
                .iter()
                .map(|(name, file)| ShaderDescriptor::new(*name, *file))
                .collect(),
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ShaderError> {
        let manifest: ShaderManifest = toml::from_str(input)?;
        let issues = manifest.validate();
        if !issues.is_empty() {
            return Err(ShaderError::ManifestValidation(issues));
        }
        Ok(manifest)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ShaderError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ShaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ShaderDescriptor> {
        self.shaders.iter().find(|shader| shader.name == name)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        for shader in &self.shaders {
            if shader.name.trim().is_empty() {
                issues.push(format!("shader with file '{}' has an empty name", shader.file));
            }
            if shader.file.trim().is_empty() {
                issues.push(format!("shader '{}' has an empty file name", shader.name));
            }
            if !seen.insert(shader.name.as_str()) {
                issues.push(format!("shader name '{}' is declared more than once", shader.name));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_valid() {
        let manifest = ShaderManifest::builtin();
        assert!(manifest.validate().is_empty());
        assert_eq!(
            manifest.descriptor("Fluid_Particles").unwrap().requires,
            Some(Capability::RayQueryPositionFetch)
        );
        assert!(manifest.descriptor("EffectWipe").is_some());
    }

    #[test]
    fn parses_toml_manifest() {
        let manifest = ShaderManifest::from_toml_str(
            r#"
[[shader]]
name = "EffectWipe"
file = "EfWipe.comp.spv"

[[shader]]
name = "Fluid_Particles"
file = "Fluid_Particles.comp.spv"
requires = "ray-query-position-fetch"
"#,
        )
        .unwrap();
        assert_eq!(manifest.shaders.len(), 2);
        assert_eq!(manifest.shaders[0], ShaderDescriptor::new("EffectWipe", "EfWipe.comp.spv"));
        assert_eq!(
            manifest.shaders[1].requires,
            Some(Capability::RayQueryPositionFetch)
        );
    }

    #[test]
    fn reports_every_issue() {
        let manifest = ShaderManifest {
            shaders: vec![
                ShaderDescriptor::new("A", "a.comp.spv"),
                ShaderDescriptor::new("A", ""),
                ShaderDescriptor::new(" ", "b.comp.spv"),
            ],
        };
        let issues = manifest.validate();
        assert_eq!(issues.len(), 3, "{issues:?}");
    }

    #[test]
    fn rejects_unknown_capability() {
        let err = ShaderManifest::from_toml_str(
            r#"
[[shader]]
name = "X"
file = "x.comp.spv"
requires = "telepathy"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ShaderError::ManifestParse(_)));
    }
}
