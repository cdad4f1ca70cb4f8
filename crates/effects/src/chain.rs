//! The fixed effect chain run after upscaling.
//!
//! Order: teleport, color tint, inverse black and white, hue shift, night
//! vision, chromatic aberration, distorted sides, waves, radial blur, VHS,
//! wipe, dither, then the two CRT passes.
use bytemuck::Pod;
use fxconfig::{EffectPreset, FxConfig};
use shaderbank::{ShaderModuleRegistry, Subscribed};
use tracing::debug;

use crate::catalog::{self, ChromaticAberrationParams, ColorTintParams, DitherParams, NoParams};
use crate::catalog::{VhsParams, WavesParams};
use crate::configurable::{EffectConfigurable, EffectDescriptor};
use crate::framebuffers::{
    BlueNoiseProvider, FramebufferProvider, FramebufferSlot, ResolutionState, UniformProvider,
};
use crate::pipeline::EffectArgs;
use crate::wipe::{EffectWipe, WipeParams, WIPE_SHADER};
use crate::{EffectDevice, EffectError};

/// One step of the effect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStage {
    /// A configurable effect and the `[effects.<key>]` preset driving it.
    /// Both CRT passes share the `crt` key.
    Effect {
        key: &'static str,
        descriptor: EffectDescriptor,
    },
    Wipe,
}

impl ChainStage {
    pub fn shader(&self) -> &str {
        match self {
            Self::Effect { descriptor, .. } => &descriptor.shader,
            Self::Wipe => WIPE_SHADER,
        }
    }

    /// Whether `config` starts this stage switched on.
    pub fn enabled_by(&self, config: &FxConfig) -> bool {
        match self {
            Self::Effect { key, .. } => config.effect(key).is_some_and(|preset| preset.active),
            Self::Wipe => config.wipe_enabled,
        }
    }
}

const fn stage(key: &'static str, descriptor: EffectDescriptor) -> ChainStage {
    ChainStage::Effect { key, descriptor }
}

/// Every stage in dispatch order.
pub static CHAIN: [ChainStage; 14] = [
    stage("teleport", catalog::TELEPORT),
    stage("color_tint", catalog::COLOR_TINT),
    stage("inverse_bw", catalog::INVERSE_BW),
    stage("hue_shift", catalog::HUE_SHIFT),
    stage("night_vision", catalog::NIGHT_VISION),
    stage("chromatic_aberration", catalog::CHROMATIC_ABERRATION),
    stage("distorted_sides", catalog::DISTORTED_SIDES),
    stage("waves", catalog::WAVES),
    stage("radial_blur", catalog::RADIAL_BLUR),
    stage("vhs", catalog::VHS),
    ChainStage::Wipe,
    stage("dither", catalog::DITHER),
    stage("crt", catalog::CRT_DEMODULATE_ENCODE),
    stage("crt", catalog::CRT_DECODE),
];

/// Requested state of one configurable effect for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EffectParams<T> {
    pub active: bool,
    pub transition_in: f32,
    pub transition_out: f32,
    pub custom: T,
}

impl<T> EffectParams<T> {
    pub fn new(active: bool, transition_in: f32, transition_out: f32, custom: T) -> Self {
        Self {
            active,
            transition_in,
            transition_out,
            custom,
        }
    }
}

/// CRT has no fade; both passes follow one flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrtParams {
    pub active: bool,
}

/// Per-frame effect requests. `None` switches an effect off without a
/// fade-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostEffectsParams {
    pub teleport: Option<EffectParams<NoParams>>,
    pub color_tint: Option<EffectParams<ColorTintParams>>,
    pub inverse_bw: Option<EffectParams<NoParams>>,
    pub hue_shift: Option<EffectParams<NoParams>>,
    pub night_vision: Option<EffectParams<NoParams>>,
    pub chromatic_aberration: Option<EffectParams<ChromaticAberrationParams>>,
    pub distorted_sides: Option<EffectParams<NoParams>>,
    pub waves: Option<EffectParams<WavesParams>>,
    pub radial_blur: Option<EffectParams<NoParams>>,
    pub vhs: Option<EffectParams<VhsParams>>,
    pub wipe: Option<WipeParams>,
    pub dither: Option<EffectParams<DitherParams>>,
    pub crt: Option<CrtParams>,
}

fn preset_params<T>(preset: &EffectPreset, custom: T) -> EffectParams<T> {
    EffectParams::new(
        preset.active,
        preset.transition_in_secs(),
        preset.transition_out_secs(),
        custom,
    )
}

impl PostEffectsParams {
    /// Requests built from the `[effects.*]` presets. Effects without a
    /// preset stay off; the wipe is never started from configuration.
    pub fn from_config(config: &FxConfig) -> Self {
        let plain = |name: &str| config.effect(name).map(|preset| preset_params(preset, ()));
        let intensity = |preset: &EffectPreset| preset.intensity.unwrap_or(1.0);

        Self {
            teleport: plain("teleport"),
            color_tint: config.effect("color_tint").map(|preset| {
                preset_params(
                    preset,
                    ColorTintParams {
                        intensity: intensity(preset),
                        color: preset.color.unwrap_or([1.0, 1.0, 1.0]),
                    },
                )
            }),
            inverse_bw: plain("inverse_bw"),
            hue_shift: plain("hue_shift"),
            night_vision: plain("night_vision"),
            chromatic_aberration: config.effect("chromatic_aberration").map(|preset| {
                preset_params(
                    preset,
                    ChromaticAberrationParams {
                        intensity: intensity(preset),
                    },
                )
            }),
            distorted_sides: plain("distorted_sides"),
            waves: config.effect("waves").map(|preset| {
                preset_params(
                    preset,
                    WavesParams {
                        amplitude: preset.amplitude.unwrap_or(0.02),
                        speed: preset.speed.unwrap_or(1.0),
                        x_multiplier: preset.x_multiplier.unwrap_or(1.0),
                    },
                )
            }),
            radial_blur: plain("radial_blur"),
            vhs: config.effect("vhs").map(|preset| {
                preset_params(
                    preset,
                    VhsParams {
                        intensity: intensity(preset),
                    },
                )
            }),
            wipe: None,
            dither: config.effect("dither").map(|preset| {
                preset_params(
                    preset,
                    DitherParams {
                        intensity: intensity(preset),
                    },
                )
            }),
            crt: config
                .effect("crt")
                .map(|preset| CrtParams { active: preset.active }),
        }
    }
}

type Effect<D> = Subscribed<EffectConfigurable<D>>;

/// Every stock effect, each subscribed to shader reloads for as long as the
/// chain lives.
pub struct PostEffects<D: EffectDevice + 'static> {
    teleport: Effect<D>,
    color_tint: Effect<D>,
    inverse_bw: Effect<D>,
    hue_shift: Effect<D>,
    night_vision: Effect<D>,
    chromatic_aberration: Effect<D>,
    distorted_sides: Effect<D>,
    waves: Effect<D>,
    radial_blur: Effect<D>,
    vhs: Effect<D>,
    wipe: Subscribed<EffectWipe<D>>,
    dither: Effect<D>,
    crt_demodulate_encode: Effect<D>,
    crt_decode: Effect<D>,
}

impl<D: EffectDevice + 'static> PostEffects<D> {
    pub fn new(
        registry: &ShaderModuleRegistry<D>,
        framebuffers: &dyn FramebufferProvider<D>,
        uniform: &dyn UniformProvider<D>,
        blue_noise: &dyn BlueNoiseProvider<D>,
        wipe_enabled: bool,
    ) -> Result<Self, EffectError> {
        let effect = |descriptor: EffectDescriptor| -> Result<Effect<D>, EffectError> {
            let effect = EffectConfigurable::with_standard_layouts(
                registry,
                descriptor,
                framebuffers.bind_group_layout(),
                uniform.bind_group_layout(),
            )?;
            Ok(registry.register(effect))
        };

        let chain = Self {
            teleport: effect(catalog::TELEPORT)?,
            color_tint: effect(catalog::COLOR_TINT)?,
            inverse_bw: effect(catalog::INVERSE_BW)?,
            hue_shift: effect(catalog::HUE_SHIFT)?,
            night_vision: effect(catalog::NIGHT_VISION)?,
            chromatic_aberration: effect(catalog::CHROMATIC_ABERRATION)?,
            distorted_sides: effect(catalog::DISTORTED_SIDES)?,
            waves: effect(catalog::WAVES)?,
            radial_blur: effect(catalog::RADIAL_BLUR)?,
            vhs: effect(catalog::VHS)?,
            wipe: registry.register(EffectWipe::new(
                registry,
                framebuffers,
                uniform,
                blue_noise,
                wipe_enabled,
            )?),
            dither: effect(catalog::DITHER)?,
            crt_demodulate_encode: effect(catalog::CRT_DEMODULATE_ENCODE)?,
            crt_decode: effect(catalog::CRT_DECODE)?,
        };
        debug!(wipe_enabled, "created post effects");
        Ok(chain)
    }

    /// Snapshots the previous frame for a wipe starting this frame. Call
    /// before `apply`.
    pub fn copy_wipe_source_if_needed(
        &self,
        encoder: &mut D::Encoder,
        frame_index: u32,
        framebuffers: &dyn FramebufferProvider<D>,
        previously_presented: FramebufferSlot,
        resolution: &ResolutionState,
        params: &PostEffectsParams,
    ) {
        self.wipe.borrow().copy_source_if_needed(
            encoder,
            frame_index,
            framebuffers,
            previously_presented,
            resolution,
            params.wipe.as_ref(),
        );
    }

    /// Runs every visible effect in chain order starting from `input` and
    /// returns the framebuffer holding the result.
    pub fn apply(
        &self,
        encoder: &mut D::Encoder,
        args: &EffectArgs<'_, D>,
        blue_noise: &dyn BlueNoiseProvider<D>,
        params: &PostEffectsParams,
        current_frame_id: u32,
        input: FramebufferSlot,
    ) -> Result<FramebufferSlot, EffectError> {
        let mut current = input;

        current = run(&self.teleport, encoder, args, params.teleport.as_ref(), current)?;
        current = run(&self.color_tint, encoder, args, params.color_tint.as_ref(), current)?;
        current = run(&self.inverse_bw, encoder, args, params.inverse_bw.as_ref(), current)?;
        current = run(&self.hue_shift, encoder, args, params.hue_shift.as_ref(), current)?;
        current = run(&self.night_vision, encoder, args, params.night_vision.as_ref(), current)?;
        current = run(
            &self.chromatic_aberration,
            encoder,
            args,
            params.chromatic_aberration.as_ref(),
            current,
        )?;
        current = run(
            &self.distorted_sides,
            encoder,
            args,
            params.distorted_sides.as_ref(),
            current,
        )?;
        current = run(&self.waves, encoder, args, params.waves.as_ref(), current)?;
        current = run(&self.radial_blur, encoder, args, params.radial_blur.as_ref(), current)?;
        current = run(&self.vhs, encoder, args, params.vhs.as_ref(), current)?;

        {
            let mut wipe = self.wipe.borrow_mut();
            if wipe.setup(args, params.wipe.as_ref(), current_frame_id) {
                current = wipe.apply(encoder, args, blue_noise, current);
            }
        }

        current = run(&self.dither, encoder, args, params.dither.as_ref(), current)?;

        let crt = params.crt.map(|crt| EffectParams::new(crt.active, 0.0, 0.0, ()));
        current = run(
            &self.crt_demodulate_encode,
            encoder,
            args,
            crt.as_ref(),
            current,
        )?;
        current = run(&self.crt_decode, encoder, args, crt.as_ref(), current)?;

        Ok(current)
    }

    /// Shader names in dispatch order.
    pub fn shader_order() -> Vec<&'static str> {
        CHAIN.iter().map(ChainStage::shader).collect()
    }
}

fn run<D: EffectDevice, T: Pod>(
    effect: &Subscribed<EffectConfigurable<D>>,
    encoder: &mut D::Encoder,
    args: &EffectArgs<'_, D>,
    params: Option<&EffectParams<T>>,
    input: FramebufferSlot,
) -> Result<FramebufferSlot, EffectError> {
    let mut effect = effect.borrow_mut();
    let visible = match params {
        Some(params) => {
            effect.set_custom(&params.custom)?;
            effect.setup(
                args,
                params.active,
                params.transition_in,
                params.transition_out,
            )
        }
        None => effect.setup_null(),
    };

    Ok(if visible {
        effect.apply(encoder, args, input)
    } else {
        input
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Command, Event, RecordingDevice, RecordingEncoder, TestResources};
    use crate::{
        ChromaticAberrationParams, ColorTintParams, DitherParams, VhsParams, WavesParams,
        WipeParams,
    };

    fn chain(resources: &TestResources, wipe_enabled: bool) -> PostEffects<RecordingDevice> {
        PostEffects::new(
            &resources.registry,
            &resources.framebuffers,
            &resources.uniform,
            &resources.blue_noise,
            wipe_enabled,
        )
        .unwrap()
    }

    fn dispatched(encoder: &RecordingEncoder) -> Vec<String> {
        encoder
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::Dispatch { pipeline, .. } => Some(pipeline.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn inactive_chain_returns_input_untouched() {
        let resources = TestResources::new();
        let chain = chain(&resources, false);
        let mut encoder = RecordingEncoder::default();
        let args = resources.args(320, 240, 1.0, 0);

        let out = chain
            .apply(
                &mut encoder,
                &args,
                &resources.blue_noise,
                &PostEffectsParams::default(),
                0,
                FramebufferSlot::UpscaledPing,
            )
            .unwrap();
        assert_eq!(out, FramebufferSlot::UpscaledPing);
        assert!(encoder.commands.is_empty());
    }

    #[test]
    fn active_effects_run_in_order_and_alternate_buffers() {
        let resources = TestResources::new();
        let chain = chain(&resources, true);
        let mut encoder = RecordingEncoder::default();
        let args = resources.args(320, 240, 5.0, 0);

        let params = PostEffectsParams {
            teleport: Some(EffectParams::new(true, 0.0, 0.0, ())),
            vhs: Some(EffectParams::new(true, 0.5, 0.5, VhsParams { intensity: 0.5 })),
            wipe: Some(WipeParams {
                strip_width: 0.1,
                begin_now: true,
                duration: 2.0,
            }),
            crt: Some(CrtParams { active: true }),
            ..PostEffectsParams::default()
        };

        let out = chain
            .apply(
                &mut encoder,
                &args,
                &resources.blue_noise,
                &params,
                12,
                FramebufferSlot::UpscaledPing,
            )
            .unwrap();

        assert_eq!(
            dispatched(&encoder),
            vec![
                "EffectTeleport from Ping",
                "EffectVHS from Pong",
                "EffectWipe from Ping",
                "EffectCrtDemodulateEncode from Pong",
                "EffectCrtDecode from Ping",
            ]
        );
        assert_eq!(out, FramebufferSlot::UpscaledPong);
    }

    #[test]
    fn deactivated_effect_fades_out_but_missing_params_stop_at_once() {
        let resources = TestResources::new();
        let chain = chain(&resources, false);
        let on = PostEffectsParams {
            hue_shift: Some(EffectParams::new(true, 0.0, 1.0, ())),
            night_vision: Some(EffectParams::new(true, 0.0, 1.0, ())),
            ..PostEffectsParams::default()
        };
        let fading = PostEffectsParams {
            hue_shift: Some(EffectParams::new(false, 0.0, 1.0, ())),
            night_vision: None,
            ..PostEffectsParams::default()
        };

        let mut encoder = RecordingEncoder::default();
        let start = resources.args(64, 64, 1.0, 0);
        chain
            .apply(&mut encoder, &start, &resources.blue_noise, &on, 0, FramebufferSlot::UpscaledPing)
            .unwrap();
        assert_eq!(dispatched(&encoder).len(), 2);

        let mut encoder = RecordingEncoder::default();
        let later = resources.args(64, 64, 2.0, 1);
        chain
            .apply(&mut encoder, &later, &resources.blue_noise, &fading, 1, FramebufferSlot::UpscaledPing)
            .unwrap();
        assert_eq!(dispatched(&encoder), vec!["EffectHueShift from Ping"]);

        let mut encoder = RecordingEncoder::default();
        let done = resources.args(64, 64, 3.5, 2);
        chain
            .apply(&mut encoder, &done, &resources.blue_noise, &fading, 2, FramebufferSlot::UpscaledPing)
            .unwrap();
        assert!(dispatched(&encoder).is_empty());
    }

    #[test]
    fn reload_rebuilds_every_effect_and_drop_unsubscribes() {
        let mut resources = TestResources::new();
        let chain = chain(&resources, true);
        assert_eq!(resources.registry.subscriber_count(), 14);

        resources.device.clear_events();
        resources.registry.reload().unwrap();
        let created = resources
            .device
            .events()
            .into_iter()
            .filter(|event| matches!(event, Event::CreatePipeline { .. }))
            .count();
        assert_eq!(created, 28);
        assert_eq!(resources.device.live_pipelines(), 28);

        drop(chain);
        assert_eq!(resources.registry.subscriber_count(), 0);
        assert_eq!(resources.device.live_pipelines(), 0);
        assert_eq!(resources.device.live_pipeline_layouts(), 0);
    }

    #[test]
    fn every_active_stage_dispatches_in_chain_order() {
        let resources = TestResources::new();
        let chain = chain(&resources, true);
        let on = |custom| Some(EffectParams::new(true, 0.0, 0.0, custom));
        let params = PostEffectsParams {
            teleport: on(()),
            color_tint: Some(EffectParams::new(true, 0.0, 0.0, ColorTintParams::default())),
            inverse_bw: on(()),
            hue_shift: on(()),
            night_vision: on(()),
            chromatic_aberration: Some(EffectParams::new(
                true,
                0.0,
                0.0,
                ChromaticAberrationParams::default(),
            )),
            distorted_sides: on(()),
            waves: Some(EffectParams::new(true, 0.0, 0.0, WavesParams::default())),
            radial_blur: on(()),
            vhs: Some(EffectParams::new(true, 0.0, 0.0, VhsParams::default())),
            wipe: Some(WipeParams {
                strip_width: 0.5,
                begin_now: true,
                duration: 1.0,
            }),
            dither: Some(EffectParams::new(true, 0.0, 0.0, DitherParams::default())),
            crt: Some(CrtParams { active: true }),
        };

        let mut encoder = RecordingEncoder::default();
        let args = resources.args(64, 64, 1.0, 0);
        chain
            .apply(&mut encoder, &args, &resources.blue_noise, &params, 0, FramebufferSlot::UpscaledPing)
            .unwrap();

        let shaders: Vec<String> = dispatched(&encoder)
            .into_iter()
            .map(|label| label.split(" from ").next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(shaders, PostEffects::<RecordingDevice>::shader_order());
        assert_eq!(shaders.len(), 14);
    }

    #[test]
    fn chain_shaders_exist_in_effect_manifest() {
        for stage in &CHAIN {
            assert!(
                shaderbank::EFFECT_SHADERS
                    .iter()
                    .any(|(name, _)| *name == stage.shader()),
                "{} missing from the effect shader table",
                stage.shader()
            );
            if let ChainStage::Effect { key, .. } = stage {
                assert!(fxconfig::KNOWN_EFFECTS.contains(key), "{key}");
            }
        }
    }

    #[test]
    fn stages_enabled_by_config() {
        let config = FxConfig::from_toml_str(
            r#"
version = 1
shader_folder = "bin"
wipe_enabled = true

[effects.crt]
active = true

[effects.waves]
active = false
"#,
        )
        .unwrap();

        let enabled: Vec<&str> = CHAIN
            .iter()
            .filter(|stage| stage.enabled_by(&config))
            .map(ChainStage::shader)
            .collect();
        assert_eq!(
            enabled,
            vec!["EffectWipe", "EffectCrtDemodulateEncode", "EffectCrtDecode"]
        );
    }

    #[test]
    fn params_from_config_use_presets() {
        let config = FxConfig::from_toml_str(
            r#"
version = 1
shader_folder = "bin"

[effects.color_tint]
active = true
transition_in = "250ms"
intensity = 0.5
color = [1.0, 0.0, 0.0]

[effects.waves]
active = false
speed = 4.0

[effects.crt]
active = true
"#,
        )
        .unwrap();

        let params = PostEffectsParams::from_config(&config);
        assert_eq!(
            params.color_tint,
            Some(EffectParams::new(
                true,
                0.25,
                0.0,
                ColorTintParams {
                    intensity: 0.5,
                    color: [1.0, 0.0, 0.0],
                }
            ))
        );
        let waves = params.waves.unwrap();
        assert!(!waves.active);
        assert_eq!(waves.custom.speed, 4.0);
        assert_eq!(params.crt, Some(CrtParams { active: true }));
        assert!(params.teleport.is_none());
        assert!(params.wipe.is_none());
    }
}
