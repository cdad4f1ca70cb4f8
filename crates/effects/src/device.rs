use shaderbank::{DeviceError, ShaderDevice};

use crate::framebuffers::{Extent2d, ImageLayout};

/// The GPU surface effects record commands against.
///
/// Every created object is destroyed by dropping it. Command methods never
/// fail; recording errors surface when the encoder is submitted.
pub trait EffectDevice: ShaderDevice + Clone {
    type BindGroupLayout;
    type BindGroup;
    type PipelineLayout;
    type Pipeline;
    type Encoder;
    type Image;
    type Format: Copy + PartialEq;

    fn create_pipeline_layout(
        &self,
        label: &str,
        set_layouts: &[&Self::BindGroupLayout],
        push_constant_size: u32,
    ) -> Result<Self::PipelineLayout, DeviceError>;

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_, Self>,
    ) -> Result<Self::Pipeline, DeviceError>;

    /// Binds `bind_groups` from set 0 upward, binds the pipeline, uploads the
    /// push constants when non-empty and dispatches `groups`.
    fn cmd_dispatch(&self, encoder: &mut Self::Encoder, desc: &DispatchDesc<'_, Self>);

    fn cmd_image_barrier(&self, encoder: &mut Self::Encoder, barriers: &[ImageBarrier<'_, Self>]);

    /// Copies the top-left `extent` texels. Both images must share a format.
    fn cmd_copy_image(
        &self,
        encoder: &mut Self::Encoder,
        src: &Self::Image,
        dst: &Self::Image,
        extent: Extent2d,
    );

    /// Scales `src` onto `dst` with nearest-neighbour filtering.
    fn cmd_blit_image(
        &self,
        encoder: &mut Self::Encoder,
        src: &Self::Image,
        src_extent: Extent2d,
        dst: &Self::Image,
        dst_extent: Extent2d,
    );
}

pub struct ComputePipelineDesc<'a, D: EffectDevice + ?Sized> {
    pub label: &'a str,
    pub layout: &'a D::PipelineLayout,
    pub module: &'a D::Module,
    pub entry_point: &'a str,
    /// Value of specialization constant 0.
    pub specialization: u32,
}

pub struct DispatchDesc<'a, D: EffectDevice + ?Sized> {
    pub label: &'a str,
    pub layout: &'a D::PipelineLayout,
    pub pipeline: &'a D::Pipeline,
    pub bind_groups: &'a [&'a D::BindGroup],
    pub push_constants: &'a [u8],
    pub groups: [u32; 3],
}

pub struct ImageBarrier<'a, D: EffectDevice + ?Sized> {
    pub image: &'a D::Image,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
}
