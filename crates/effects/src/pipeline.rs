//! Shared machinery for every screen-space effect: one pipeline layout, a
//! pair of compute pipelines built from the same shader, and the dispatch
//! that threads the ping/pong framebuffer selector through the chain.
//!
//! The two pipelines differ only in specialization constant 0, which holds
//! 1 for the variant reading from the ping image and 0 for the one reading
//! from pong. Both are created and destroyed together; a base never holds
//! just one.
use shaderbank::{ShaderError, ShaderModuleRegistry, ShaderReloadHook, ShaderStage};
use tracing::{debug, trace};

use crate::framebuffers::{FramebufferProvider, FramebufferSlot, UniformProvider};
use crate::{ComputePipelineDesc, DispatchDesc, EffectDevice, EffectError};

/// Upper bound on any effect's push constant block, in bytes.
pub const MAX_PUSH_CONSTANT_SIZE: usize = 128;

/// Pixels covered by one compute work group along each axis.
pub const EFFECT_GROUP_SIZE: [u32; 2] = [16, 16];

pub fn work_group_count(size: u32, group_size: u32) -> u32 {
    size.div_ceil(group_size)
}

/// Per-frame inputs shared by every effect's setup and apply steps.
pub struct EffectArgs<'a, D: EffectDevice> {
    pub frame_index: u32,
    pub framebuffers: &'a dyn FramebufferProvider<D>,
    pub uniform: &'a dyn UniformProvider<D>,
    pub width: u32,
    pub height: u32,
    /// Seconds on the application clock.
    pub current_time: f32,
}

pub struct EffectPipelineBase<D: EffectDevice> {
    device: D,
    shader: String,
    push_constant_size: u32,
    // Declared before `layout` so pipelines are destroyed first.
    pipelines: Option<[D::Pipeline; 2]>,
    layout: D::PipelineLayout,
}

impl<D: EffectDevice> EffectPipelineBase<D> {
    /// Builds the layout from `set_layouts` plus one compute push constant
    /// range of `push_constant_size` bytes (none when zero), then both
    /// pipelines.
    pub fn new(
        registry: &ShaderModuleRegistry<D>,
        shader: &str,
        set_layouts: &[&D::BindGroupLayout],
        push_constant_size: usize,
    ) -> Result<Self, EffectError> {
        if push_constant_size > MAX_PUSH_CONSTANT_SIZE {
            return Err(EffectError::PayloadTooLarge {
                shader: shader.to_string(),
                size: push_constant_size,
                max: MAX_PUSH_CONSTANT_SIZE,
            });
        }
        let push_constant_size = push_constant_size as u32;

        let device = registry.device().clone();
        let layout = device
            .create_pipeline_layout(
                &format!("{shader} pipeline layout"),
                set_layouts,
                push_constant_size,
            )
            .map_err(ShaderError::from)?;

        let mut base = Self {
            device,
            shader: shader.to_string(),
            push_constant_size,
            pipelines: None,
            layout,
        };
        base.create_pipelines(registry)?;
        Ok(base)
    }

    fn create_pipelines(&mut self, registry: &ShaderModuleRegistry<D>) -> Result<(), ShaderError> {
        assert!(
            self.pipelines.is_none(),
            "pipelines for {} must be destroyed before they are rebuilt",
            self.shader
        );

        let info = registry.stage_info(&self.shader)?;
        if info.stage != ShaderStage::Compute {
            return Err(ShaderError::StageMismatch {
                name: self.shader.clone(),
                expected: ShaderStage::Compute,
                found: info.stage,
            });
        }

        let build = |is_source_ping: u32| {
            let label = format!(
                "{} from {}",
                self.shader,
                if is_source_ping == 1 { "Ping" } else { "Pong" }
            );
            self.device.create_compute_pipeline(&ComputePipelineDesc {
                label: &label,
                layout: &self.layout,
                module: info.module,
                entry_point: info.entry_point,
                specialization: is_source_ping,
            })
        };
        let from_pong = build(0)?;
        let from_ping = build(1)?;

        self.pipelines = Some([from_pong, from_ping]);
        debug!(shader = %self.shader, "created effect pipelines");
        Ok(())
    }

    fn destroy_pipelines(&mut self) {
        self.pipelines = None;
    }

    /// Rebuilds both pipelines from the registry's current module. If the
    /// rebuild fails the base is left with no pipelines.
    pub fn on_reload(&mut self, registry: &ShaderModuleRegistry<D>) -> Result<(), ShaderError> {
        self.destroy_pipelines();
        self.create_pipelines(registry)
    }

    /// Records one dispatch covering `width` x `height` pixels and returns
    /// the framebuffer it wrote, the complement of `input`.
    ///
    /// Panics when `input` is not a ping/pong slot, when `push_constants`
    /// exceeds the layout's range, or when a failed reload left no pipelines.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &self,
        encoder: &mut D::Encoder,
        frame_index: u32,
        framebuffers: &dyn FramebufferProvider<D>,
        width: u32,
        height: u32,
        input: FramebufferSlot,
        bind_groups: &[&D::BindGroup],
        push_constants: &[u8],
    ) -> FramebufferSlot {
        assert!(
            input.is_ping_pong(),
            "{} dispatched with {input} as input",
            self.shader
        );
        assert!(
            push_constants.len() <= self.push_constant_size as usize,
            "{} push constants are {} bytes, layout allows {}",
            self.shader,
            push_constants.len(),
            self.push_constant_size
        );
        let Some(pipelines) = self.pipelines.as_ref() else {
            panic!("{} dispatched without pipelines", self.shader);
        };

        let is_source_ping = input == FramebufferSlot::UpscaledPing;
        let groups = [
            work_group_count(width, EFFECT_GROUP_SIZE[0]),
            work_group_count(height, EFFECT_GROUP_SIZE[1]),
            1,
        ];

        framebuffers.insert_barriers(encoder, frame_index, &[input]);
        self.device.cmd_dispatch(
            encoder,
            &DispatchDesc {
                label: &self.shader,
                layout: &self.layout,
                pipeline: &pipelines[usize::from(is_source_ping)],
                bind_groups,
                push_constants,
                groups,
            },
        );
        trace!(shader = %self.shader, %input, ?groups, "dispatched effect");

        input.complement()
    }

    pub fn shader(&self) -> &str {
        &self.shader
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn push_constant_size(&self) -> usize {
        self.push_constant_size as usize
    }

    pub fn has_pipelines(&self) -> bool {
        self.pipelines.is_some()
    }
}

impl<D: EffectDevice> ShaderReloadHook<D> for EffectPipelineBase<D> {
    fn on_shader_reload(&mut self, registry: &ShaderModuleRegistry<D>) -> Result<(), ShaderError> {
        self.on_reload(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Command, Event, RecordingDevice, RecordingEncoder, TestResources};

    fn base(resources: &TestResources, shader: &str, push: usize) -> EffectPipelineBase<RecordingDevice> {
        EffectPipelineBase::new(
            &resources.registry,
            shader,
            &[
                resources.framebuffers.layout(),
                resources.uniform.layout(),
            ],
            push,
        )
        .unwrap()
    }

    #[test]
    fn work_group_count_rounds_up() {
        assert_eq!(work_group_count(1920, 16), 120);
        assert_eq!(work_group_count(1921, 16), 121);
        assert_eq!(work_group_count(0, 16), 0);
        assert_eq!(work_group_count(1, 16), 1);
    }

    #[test]
    fn creates_layout_then_both_pipelines() {
        let resources = TestResources::new();
        resources.device.clear_events();
        let base = base(&resources, "EffectWaves", 24);

        assert!(base.has_pipelines());
        assert_eq!(
            resources.device.events(),
            vec![
                Event::CreatePipelineLayout {
                    label: "EffectWaves pipeline layout".into(),
                    set_layouts: vec!["framebuffers".into(), "uniform".into()],
                    push_constant_size: 24,
                },
                Event::CreatePipeline {
                    label: "EffectWaves from Pong".into(),
                    specialization: 0,
                },
                Event::CreatePipeline {
                    label: "EffectWaves from Ping".into(),
                    specialization: 1,
                },
            ]
        );
    }

    #[test]
    fn reload_destroys_both_before_creating_both() {
        let resources = TestResources::new();
        let mut base = base(&resources, "EffectVHS", 16);
        resources.device.clear_events();

        base.on_reload(&resources.registry).unwrap();
        assert_eq!(
            resources.device.pipeline_events(),
            vec![
                Event::DestroyPipeline {
                    label: "EffectVHS from Pong".into()
                },
                Event::DestroyPipeline {
                    label: "EffectVHS from Ping".into()
                },
                Event::CreatePipeline {
                    label: "EffectVHS from Pong".into(),
                    specialization: 0,
                },
                Event::CreatePipeline {
                    label: "EffectVHS from Ping".into(),
                    specialization: 1,
                },
            ]
        );
        assert_eq!(resources.device.live_pipelines(), 2);
    }

    #[test]
    fn failed_rebuild_leaves_no_pipelines() {
        let resources = TestResources::new();
        let mut base = base(&resources, "EffectDither", 16);

        resources.device.fail_pipelines_after(1);
        let err = base.on_reload(&resources.registry).unwrap_err();
        assert!(matches!(err, ShaderError::Device(_)));
        assert!(!base.has_pipelines());
        assert_eq!(resources.device.live_pipelines(), 0);

        resources.device.fail_pipelines_after(usize::MAX);
        base.on_reload(&resources.registry).unwrap();
        assert_eq!(resources.device.live_pipelines(), 2);
    }

    #[test]
    fn drop_destroys_pipelines_before_layout() {
        let resources = TestResources::new();
        let base = base(&resources, "EffectHueShift", 12);
        resources.device.clear_events();
        drop(base);

        assert_eq!(
            resources.device.events(),
            vec![
                Event::DestroyPipeline {
                    label: "EffectHueShift from Pong".into()
                },
                Event::DestroyPipeline {
                    label: "EffectHueShift from Ping".into()
                },
                Event::DestroyPipelineLayout {
                    label: "EffectHueShift pipeline layout".into()
                },
            ]
        );
    }

    #[test]
    fn rejects_oversized_push_range() {
        let resources = TestResources::new();
        let err = EffectPipelineBase::new(&resources.registry, "EffectWaves", &[], 132)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EffectError::PayloadTooLarge { size: 132, max: 128, .. }
        ));
    }

    #[test]
    fn missing_shader_fails_construction() {
        let resources = TestResources::new();
        let err = EffectPipelineBase::new(&resources.registry, "EffectSepia", &[], 0)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EffectError::Shader(ShaderError::MissingShader { .. })
        ));
        assert_eq!(resources.device.live_pipeline_layouts(), 0);
    }

    #[test]
    fn dispatch_returns_complement_and_selects_matching_pipeline() {
        let resources = TestResources::new();
        let base = base(&resources, "EffectRadialBlur", 12);
        let mut encoder = RecordingEncoder::default();
        let bind_groups = [
            resources.framebuffers.group(),
            resources.uniform.group(),
        ];

        let out = base.dispatch(
            &mut encoder,
            1,
            &resources.framebuffers,
            1920,
            1080,
            FramebufferSlot::UpscaledPing,
            &bind_groups,
            &[0; 12],
        );
        assert_eq!(out, FramebufferSlot::UpscaledPong);

        let back = base.dispatch(
            &mut encoder,
            1,
            &resources.framebuffers,
            1920,
            1080,
            out,
            &bind_groups,
            &[],
        );
        assert_eq!(back, FramebufferSlot::UpscaledPing);

        assert_eq!(
            encoder.commands,
            vec![
                Command::FramebufferBarrier {
                    frame_index: 1,
                    slots: vec![FramebufferSlot::UpscaledPing],
                },
                Command::Dispatch {
                    label: "EffectRadialBlur".into(),
                    pipeline: "EffectRadialBlur from Ping".into(),
                    bind_groups: vec!["framebuffers".into(), "uniform".into()],
                    push_constants: vec![0; 12],
                    groups: [120, 68, 1],
                },
                Command::FramebufferBarrier {
                    frame_index: 1,
                    slots: vec![FramebufferSlot::UpscaledPong],
                },
                Command::Dispatch {
                    label: "EffectRadialBlur".into(),
                    pipeline: "EffectRadialBlur from Pong".into(),
                    bind_groups: vec!["framebuffers".into(), "uniform".into()],
                    push_constants: Vec::new(),
                    groups: [120, 68, 1],
                },
            ]
        );
    }

    #[test]
    #[should_panic(expected = "dispatched with final as input")]
    fn dispatch_rejects_non_ping_pong_input() {
        let resources = TestResources::new();
        let base = base(&resources, "EffectTeleport", 12);
        let mut encoder = RecordingEncoder::default();
        base.dispatch(
            &mut encoder,
            0,
            &resources.framebuffers,
            64,
            64,
            FramebufferSlot::Final,
            &[],
            &[],
        );
    }

    #[test]
    #[should_panic(expected = "layout allows 12")]
    fn dispatch_rejects_push_larger_than_range() {
        let resources = TestResources::new();
        let base = base(&resources, "EffectTeleport", 12);
        let mut encoder = RecordingEncoder::default();
        base.dispatch(
            &mut encoder,
            0,
            &resources.framebuffers,
            64,
            64,
            FramebufferSlot::UpscaledPong,
            &[],
            &[0; 16],
        );
    }

    #[test]
    fn stage_mismatch_is_reported() {
        let resources = TestResources::with_extra_shader("VertOnly", "VertOnly.vert.spv");
        let err = EffectPipelineBase::new(&resources.registry, "VertOnly", &[], 0)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EffectError::Shader(ShaderError::StageMismatch {
                found: ShaderStage::Vertex,
                ..
            })
        ));
    }
}
