//! Contracts for the image and uniform resources effects read and write.
//!
//! Effects never own framebuffers. The renderer hands them providers that
//! resolve a logical [`FramebufferSlot`] to an image, a bind group and a size
//! for the current frame.
use std::fmt;

use crate::EffectDevice;

/// Logical framebuffer images effects touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferSlot {
    UpscaledPing,
    UpscaledPong,
    Final,
    WipeEffectSource,
}

impl FramebufferSlot {
    pub fn is_ping_pong(self) -> bool {
        matches!(self, Self::UpscaledPing | Self::UpscaledPong)
    }

    /// The other half of the ping/pong pair.
    ///
    /// Panics for slots outside the pair.
    pub fn complement(self) -> Self {
        match self {
            Self::UpscaledPing => Self::UpscaledPong,
            Self::UpscaledPong => Self::UpscaledPing,
            other => panic!("{other} is not a ping/pong framebuffer"),
        }
    }
}

impl fmt::Display for FramebufferSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UpscaledPing => "upscaled-ping",
            Self::UpscaledPong => "upscaled-pong",
            Self::Final => "final",
            Self::WipeEffectSource => "wipe-effect-source",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Render and upscaled output sizes for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolutionState {
    pub render: Extent2d,
    pub upscaled: Extent2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    General,
    TransferSrc,
    TransferDst,
}

pub trait FramebufferProvider<D: EffectDevice> {
    fn bind_group_layout(&self) -> &D::BindGroupLayout;

    fn bind_group(&self, frame_index: u32) -> &D::BindGroup;

    /// `None` when the slot has no image this frame.
    fn image(&self, slot: FramebufferSlot, frame_index: u32) -> Option<&D::Image>;

    fn size(&self, resolution: &ResolutionState, slot: FramebufferSlot) -> Extent2d;

    fn format(&self, slot: FramebufferSlot) -> D::Format;

    /// Makes earlier writes to `slots` visible to the next compute dispatch.
    fn insert_barriers(&self, encoder: &mut D::Encoder, frame_index: u32, slots: &[FramebufferSlot]);
}

pub trait UniformProvider<D: EffectDevice> {
    fn bind_group_layout(&self) -> &D::BindGroupLayout;

    fn bind_group(&self, frame_index: u32) -> &D::BindGroup;
}

pub trait BlueNoiseProvider<D: EffectDevice> {
    fn bind_group_layout(&self) -> &D::BindGroupLayout;

    fn bind_group(&self) -> &D::BindGroup;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complement_swaps_ping_and_pong() {
        assert_eq!(
            FramebufferSlot::UpscaledPing.complement(),
            FramebufferSlot::UpscaledPong
        );
        assert_eq!(
            FramebufferSlot::UpscaledPong.complement(),
            FramebufferSlot::UpscaledPing
        );
        assert!(!FramebufferSlot::Final.is_ping_pong());
    }

    #[test]
    #[should_panic(expected = "not a ping/pong framebuffer")]
    fn complement_of_final_panics() {
        FramebufferSlot::Final.complement();
    }
}
