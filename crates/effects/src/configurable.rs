use std::borrow::Cow;
use std::marker::PhantomData;

use bytemuck::Pod;
use shaderbank::{ShaderError, ShaderModuleRegistry, ShaderReloadHook};

use crate::framebuffers::FramebufferSlot;
use crate::pipeline::{EffectArgs, EffectPipelineBase, MAX_PUSH_CONSTANT_SIZE};
use crate::transition::{TransitionState, TRANSITION_HEADER_SIZE};
use crate::{EffectDevice, EffectError};

/// Names the shader a configurable effect runs and the size of the custom
/// parameters appended after its transition header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectDescriptor {
    pub shader: Cow<'static, str>,
    pub custom_size: usize,
}

struct FitsPushConstants<T>(PhantomData<T>);

impl<T> FitsPushConstants<T> {
    const OK: () = assert!(
        TRANSITION_HEADER_SIZE + std::mem::size_of::<T>() <= MAX_PUSH_CONSTANT_SIZE,
        "effect parameters do not fit in 128 bytes of push constants"
    );
}

impl EffectDescriptor {
    /// Descriptor for parameters of type `T`. Oversized `T` fails to compile.
    pub const fn typed<T: Pod>(shader: &'static str) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = FitsPushConstants::<T>::OK;
        Self {
            shader: Cow::Borrowed(shader),
            custom_size: std::mem::size_of::<T>(),
        }
    }

    /// Descriptor built from data; the size is checked when the effect is
    /// constructed.
    pub fn new(shader: impl Into<Cow<'static, str>>, custom_size: usize) -> Self {
        Self {
            shader: shader.into(),
            custom_size,
        }
    }

    pub fn push_constant_size(&self) -> usize {
        TRANSITION_HEADER_SIZE + self.custom_size
    }
}

/// A single-shader effect that fades in and out around an on/off intent.
///
/// Push constants are the transition header followed by `custom_size` bytes
/// of caller parameters.
pub struct EffectConfigurable<D: EffectDevice> {
    descriptor: EffectDescriptor,
    base: EffectPipelineBase<D>,
    transition: TransitionState,
    custom: Vec<u8>,
}

impl<D: EffectDevice> EffectConfigurable<D> {
    pub fn new(
        registry: &ShaderModuleRegistry<D>,
        descriptor: EffectDescriptor,
        set_layouts: &[&D::BindGroupLayout],
    ) -> Result<Self, EffectError> {
        let size = descriptor.push_constant_size();
        if size > MAX_PUSH_CONSTANT_SIZE {
            return Err(EffectError::PayloadTooLarge {
                shader: descriptor.shader.into_owned(),
                size,
                max: MAX_PUSH_CONSTANT_SIZE,
            });
        }

        let base = EffectPipelineBase::new(registry, &descriptor.shader, set_layouts, size)?;
        Ok(Self {
            custom: vec![0; descriptor.custom_size],
            descriptor,
            base,
            transition: TransitionState::default(),
        })
    }

    /// Uses the standard set layouts: framebuffers at set 0, uniforms at set 1.
    pub fn with_standard_layouts(
        registry: &ShaderModuleRegistry<D>,
        descriptor: EffectDescriptor,
        framebuffers: &D::BindGroupLayout,
        uniform: &D::BindGroupLayout,
    ) -> Result<Self, EffectError> {
        Self::new(registry, descriptor, &[framebuffers, uniform])
    }

    pub fn set_custom<T: Pod>(&mut self, value: &T) -> Result<(), EffectError> {
        self.set_custom_bytes(bytemuck::bytes_of(value))
    }

    pub fn set_custom_bytes(&mut self, bytes: &[u8]) -> Result<(), EffectError> {
        if bytes.len() != self.custom.len() {
            return Err(EffectError::CustomPayloadSize {
                shader: self.descriptor.shader.to_string(),
                expected: self.custom.len(),
                found: bytes.len(),
            });
        }
        self.custom.copy_from_slice(bytes);
        Ok(())
    }

    pub fn setup(
        &mut self,
        args: &EffectArgs<'_, D>,
        active: bool,
        transition_in: f32,
        transition_out: f32,
    ) -> bool {
        self.transition
            .setup(active, args.current_time, transition_in, transition_out)
    }

    pub fn setup_null(&mut self) -> bool {
        self.transition.setup_null()
    }

    /// Dispatches with the framebuffer and uniform bind groups of this frame.
    pub fn apply(
        &self,
        encoder: &mut D::Encoder,
        args: &EffectArgs<'_, D>,
        input: FramebufferSlot,
    ) -> FramebufferSlot {
        let bind_groups = [
            args.framebuffers.bind_group(args.frame_index),
            args.uniform.bind_group(args.frame_index),
        ];
        self.apply_with(encoder, args, &bind_groups, input)
    }

    pub fn apply_with(
        &self,
        encoder: &mut D::Encoder,
        args: &EffectArgs<'_, D>,
        bind_groups: &[&D::BindGroup],
        input: FramebufferSlot,
    ) -> FramebufferSlot {
        let mut data = [0u8; MAX_PUSH_CONSTANT_SIZE];
        let len = self.write_push_constants(&mut data);
        self.base.dispatch(
            encoder,
            args.frame_index,
            args.framebuffers,
            args.width,
            args.height,
            input,
            bind_groups,
            &data[..len],
        )
    }

    /// Writes the header and custom parameters into `out`, returning the
    /// number of bytes used.
    pub fn write_push_constants(&self, out: &mut [u8; MAX_PUSH_CONSTANT_SIZE]) -> usize {
        let header = self.transition.header();
        out[..TRANSITION_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        let end = TRANSITION_HEADER_SIZE + self.custom.len();
        out[TRANSITION_HEADER_SIZE..end].copy_from_slice(&self.custom);
        end
    }

    pub fn transition(&self) -> &TransitionState {
        &self.transition
    }

    pub fn descriptor(&self) -> &EffectDescriptor {
        &self.descriptor
    }

    pub fn base(&self) -> &EffectPipelineBase<D> {
        &self.base
    }
}

impl<D: EffectDevice> ShaderReloadHook<D> for EffectConfigurable<D> {
    fn on_shader_reload(&mut self, registry: &ShaderModuleRegistry<D>) -> Result<(), ShaderError> {
        self.base.on_reload(registry)
    }
}
