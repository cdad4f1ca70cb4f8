//! Compute-shader screen effects and the chain that runs them.
//!
//! ```text
//!   ShaderModuleRegistry ──stage_info──▶ EffectPipelineBase (layout + 2 pipelines)
//!          │ reload                          ▲            │ dispatch(input) -> complement
//!          └──on_shader_reload───────────────┘            ▼
//!   PostEffects::apply: teleport ─▶ color tint ─▶ ... ─▶ wipe ─▶ dither ─▶ crt
//! ```
//!
//! Effects are generic over [`EffectDevice`], so the same code drives the
//! wgpu backend and the recording device used in tests.

mod catalog;
mod chain;
mod configurable;
mod device;
mod framebuffers;
#[cfg(feature = "wgpu-backend")]
mod headless;
mod pipeline;
mod transition;
mod wipe;

#[cfg(feature = "wgpu-backend")]
mod wgpu_device;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::{
    ChromaticAberrationParams, ColorTintParams, DitherParams, NoParams, VhsParams, WavesParams,
};
pub use chain::{ChainStage, CrtParams, EffectParams, PostEffects, PostEffectsParams, CHAIN};
pub use configurable::{EffectConfigurable, EffectDescriptor};
pub use device::{ComputePipelineDesc, DispatchDesc, EffectDevice, ImageBarrier};
pub use framebuffers::{
    BlueNoiseProvider, Extent2d, FramebufferProvider, FramebufferSlot, ImageLayout,
    ResolutionState, UniformProvider,
};
pub use pipeline::{
    work_group_count, EffectArgs, EffectPipelineBase, EFFECT_GROUP_SIZE, MAX_PUSH_CONSTANT_SIZE,
};
pub use transition::{TransitionHeader, TransitionState, TransitionType, TRANSITION_HEADER_SIZE};
pub use wipe::{EffectWipe, WipeParams, WipePush, WIPE_SHADER};

#[cfg(feature = "wgpu-backend")]
pub use headless::{HeadlessTargets, HEADLESS_FORMAT};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_device::WgpuDevice;

use shaderbank::ShaderError;

#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("push constants for '{shader}' are {size} bytes, the limit is {max}")]
    PayloadTooLarge {
        shader: String,
        size: usize,
        max: usize,
    },
    #[error("custom parameters for '{shader}' must be {expected} bytes, got {found}")]
    CustomPayloadSize {
        shader: String,
        expected: usize,
        found: usize,
    },
}
