//! Screen wipe: reveals a snapshot of the previously presented frame through
//! a strip that sweeps across the screen over a fixed time window.
//!
//! The snapshot is taken by `copy_source_if_needed` on the frame the wipe
//! begins; `setup` then decides each frame whether the window is still open.
use bytemuck::{Pod, Zeroable};
use shaderbank::{ShaderError, ShaderModuleRegistry, ShaderReloadHook};
use tracing::{trace, warn};

use crate::framebuffers::{
    BlueNoiseProvider, FramebufferProvider, FramebufferSlot, ImageLayout, ResolutionState,
    UniformProvider,
};
use crate::pipeline::{EffectArgs, EffectPipelineBase};
use crate::{EffectDevice, EffectError, ImageBarrier};

pub const WIPE_SHADER: &str = "EffectWipe";

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct WipePush {
    pub strip_width_in_pixels: u32,
    pub start_frame_id: u32,
    pub begin_time: f32,
    pub end_time: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WipeParams {
    /// Fraction of the screen width, clamped to [0, 1].
    pub strip_width: f32,
    /// Restart the wipe on this frame.
    pub begin_now: bool,
    /// Seconds.
    pub duration: f32,
}

pub struct EffectWipe<D: EffectDevice> {
    base: EffectPipelineBase<D>,
    push: WipePush,
    enabled: bool,
}

impl<D: EffectDevice> EffectWipe<D> {
    /// `enabled` is fixed for the effect's lifetime; a disabled wipe must
    /// never be handed parameters.
    pub fn new(
        registry: &ShaderModuleRegistry<D>,
        framebuffers: &dyn FramebufferProvider<D>,
        uniform: &dyn UniformProvider<D>,
        blue_noise: &dyn BlueNoiseProvider<D>,
        enabled: bool,
    ) -> Result<Self, EffectError> {
        let base = EffectPipelineBase::new(
            registry,
            WIPE_SHADER,
            &[
                framebuffers.bind_group_layout(),
                uniform.bind_group_layout(),
                blue_noise.bind_group_layout(),
            ],
            std::mem::size_of::<WipePush>(),
        )?;
        Ok(Self {
            base,
            push: WipePush::default(),
            enabled,
        })
    }

    /// Snapshots `previously_presented` into the wipe source image when
    /// `params` asks for the wipe to begin now. Copies when size and format
    /// match, otherwise blits with nearest filtering. Missing images skip the
    /// snapshot with a warning.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_source_if_needed(
        &self,
        encoder: &mut D::Encoder,
        frame_index: u32,
        framebuffers: &dyn FramebufferProvider<D>,
        previously_presented: FramebufferSlot,
        resolution: &ResolutionState,
        params: Option<&WipeParams>,
    ) {
        if !params.is_some_and(|params| params.begin_now) {
            return;
        }

        let Some(src) = framebuffers.image(previously_presented, frame_index) else {
            warn!(slot = %previously_presented, "suppressed wipe effect: previous image is invalid");
            return;
        };
        let Some(dst) = framebuffers.image(FramebufferSlot::WipeEffectSource, frame_index) else {
            warn!("suppressed wipe effect: wipe source image is invalid");
            return;
        };

        let src_size = framebuffers.size(resolution, previously_presented);
        let dst_size = framebuffers.size(resolution, FramebufferSlot::WipeEffectSource);
        let device = self.base.device();

        device.cmd_image_barrier(
            encoder,
            &[
                ImageBarrier {
                    image: src,
                    old_layout: ImageLayout::General,
                    new_layout: ImageLayout::TransferSrc,
                },
                ImageBarrier {
                    image: dst,
                    old_layout: ImageLayout::General,
                    new_layout: ImageLayout::TransferDst,
                },
            ],
        );

        let same_format = framebuffers.format(previously_presented)
            == framebuffers.format(FramebufferSlot::WipeEffectSource);
        if src_size == dst_size && same_format {
            device.cmd_copy_image(encoder, src, dst, src_size);
        } else {
            trace!(?src_size, ?dst_size, same_format, "blitting wipe source");
            device.cmd_blit_image(encoder, src, src_size, dst, dst_size);
        }

        device.cmd_image_barrier(
            encoder,
            &[
                ImageBarrier {
                    image: src,
                    old_layout: ImageLayout::TransferSrc,
                    new_layout: ImageLayout::General,
                },
                ImageBarrier {
                    image: dst,
                    old_layout: ImageLayout::TransferDst,
                    new_layout: ImageLayout::General,
                },
            ],
        );
    }

    /// Updates the push constants for this frame and reports whether the
    /// wipe should be dispatched.
    pub fn setup(
        &mut self,
        args: &EffectArgs<'_, D>,
        params: Option<&WipeParams>,
        current_frame_id: u32,
    ) -> bool {
        let Some(params) = params else {
            return false;
        };
        assert!(
            self.enabled,
            "wipe parameters supplied but the wipe effect is disabled"
        );

        self.push.strip_width_in_pixels =
            (args.width as f32 * params.strip_width.clamp(0.0, 1.0)) as u32;

        if params.begin_now {
            self.push.start_frame_id = current_frame_id;
            self.push.begin_time = args.current_time;
            self.push.end_time = args.current_time + params.duration;
        }

        self.push.strip_width_in_pixels > 0
            && self.push.begin_time < self.push.end_time
            && args.current_time < self.push.end_time
    }

    /// Dispatches with the framebuffer, uniform and blue noise bind groups.
    pub fn apply(
        &self,
        encoder: &mut D::Encoder,
        args: &EffectArgs<'_, D>,
        blue_noise: &dyn BlueNoiseProvider<D>,
        input: FramebufferSlot,
    ) -> FramebufferSlot {
        let bind_groups = [
            args.framebuffers.bind_group(args.frame_index),
            args.uniform.bind_group(args.frame_index),
            blue_noise.bind_group(),
        ];
        self.base.dispatch(
            encoder,
            args.frame_index,
            args.framebuffers,
            args.width,
            args.height,
            input,
            &bind_groups,
            bytemuck::bytes_of(&self.push),
        )
    }

    pub fn push(&self) -> &WipePush {
        &self.push
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn base(&self) -> &EffectPipelineBase<D> {
        &self.base
    }
}

impl<D: EffectDevice> ShaderReloadHook<D> for EffectWipe<D> {
    fn on_shader_reload(&mut self, registry: &ShaderModuleRegistry<D>) -> Result<(), ShaderError> {
        self.base.on_reload(registry)
    }
}
