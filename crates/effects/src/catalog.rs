//! Parameter layouts and descriptors for the stock effects.
use bytemuck::{Pod, Zeroable};

use crate::configurable::EffectDescriptor;

/// Parameters for effects that only use the transition header.
pub type NoParams = ();

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ChromaticAberrationParams {
    pub intensity: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct WavesParams {
    pub amplitude: f32,
    pub speed: f32,
    pub x_multiplier: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ColorTintParams {
    pub intensity: f32,
    pub color: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct VhsParams {
    pub intensity: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct DitherParams {
    pub intensity: f32,
}

pub(crate) const TELEPORT: EffectDescriptor = EffectDescriptor::typed::<NoParams>("EffectTeleport");
pub(crate) const COLOR_TINT: EffectDescriptor =
    EffectDescriptor::typed::<ColorTintParams>("EffectColorTint");
pub(crate) const INVERSE_BW: EffectDescriptor =
    EffectDescriptor::typed::<NoParams>("EffectInverseBW");
pub(crate) const HUE_SHIFT: EffectDescriptor = EffectDescriptor::typed::<NoParams>("EffectHueShift");
pub(crate) const NIGHT_VISION: EffectDescriptor =
    EffectDescriptor::typed::<NoParams>("EffectNightVision");
pub(crate) const CHROMATIC_ABERRATION: EffectDescriptor =
    EffectDescriptor::typed::<ChromaticAberrationParams>("EffectChromaticAberration");
pub(crate) const DISTORTED_SIDES: EffectDescriptor =
    EffectDescriptor::typed::<NoParams>("EffectDistortedSides");
pub(crate) const WAVES: EffectDescriptor = EffectDescriptor::typed::<WavesParams>("EffectWaves");
pub(crate) const RADIAL_BLUR: EffectDescriptor =
    EffectDescriptor::typed::<NoParams>("EffectRadialBlur");
pub(crate) const VHS: EffectDescriptor = EffectDescriptor::typed::<VhsParams>("EffectVHS");
pub(crate) const DITHER: EffectDescriptor = EffectDescriptor::typed::<DitherParams>("EffectDither");
pub(crate) const CRT_DEMODULATE_ENCODE: EffectDescriptor =
    EffectDescriptor::typed::<NoParams>("EffectCrtDemodulateEncode");
pub(crate) const CRT_DECODE: EffectDescriptor =
    EffectDescriptor::typed::<NoParams>("EffectCrtDecode");
