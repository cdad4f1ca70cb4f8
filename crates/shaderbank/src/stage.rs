use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ShaderError;

/// Pipeline stage a shader binary was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    RayGeneration,
    AnyHit,
    ClosestHit,
    Miss,
    Callable,
    Intersection,
    TessellationControl,
    TessellationEvaluation,
    Mesh,
    Task,
}

const SUFFIXES: [(&str, ShaderStage); 13] = [
    (".vert.spv", ShaderStage::Vertex),
    (".frag.spv", ShaderStage::Fragment),
    (".comp.spv", ShaderStage::Compute),
    (".rgen.spv", ShaderStage::RayGeneration),
    (".rahit.spv", ShaderStage::AnyHit),
    (".rchit.spv", ShaderStage::ClosestHit),
    (".rmiss.spv", ShaderStage::Miss),
    (".rcall.spv", ShaderStage::Callable),
    (".rint.spv", ShaderStage::Intersection),
    (".tesc.spv", ShaderStage::TessellationControl),
    (".tese.spv", ShaderStage::TessellationEvaluation),
    (".mesh.spv", ShaderStage::Mesh),
    (".task.spv", ShaderStage::Task),
];

impl ShaderStage {
    /// Infers the stage from a binary filename such as `EfWipe.comp.spv`.
    pub fn from_filename(filename: &str) -> Result<Self, ShaderError> {
        SUFFIXES
            .iter()
            .find(|(suffix, _)| filename.ends_with(suffix))
            .map(|(_, stage)| *stage)
            .ok_or_else(|| ShaderError::UnknownShaderStage {
                filename: filename.to_string(),
            })
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
            Self::RayGeneration => "ray-generation",
            Self::AnyHit => "any-hit",
            Self::ClosestHit => "closest-hit",
            Self::Miss => "miss",
            Self::Callable => "callable",
            Self::Intersection => "intersection",
            Self::TessellationControl => "tessellation-control",
            Self::TessellationEvaluation => "tessellation-evaluation",
            Self::Mesh => "mesh",
            Self::Task => "task",
        };
        f.write_str(name)
    }
}
