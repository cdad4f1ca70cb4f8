//! Offscreen framebuffers, uniforms and blue noise for running effects on a
//! [`WgpuDevice`] without a window.
//!
//! Every framebuffer slot is an `R32Float` storage texture at set 0, bound in
//! slot order: ping, pong, final, wipe source.
use tracing::debug;

use crate::framebuffers::{
    BlueNoiseProvider, Extent2d, FramebufferProvider, FramebufferSlot, ResolutionState,
    UniformProvider,
};
use crate::WgpuDevice;

pub const HEADLESS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

const SLOTS: [FramebufferSlot; 4] = [
    FramebufferSlot::UpscaledPing,
    FramebufferSlot::UpscaledPong,
    FramebufferSlot::Final,
    FramebufferSlot::WipeEffectSource,
];

const UNIFORM_SIZE: u64 = 256;
const BLUE_NOISE_SIZE: u32 = 64;

fn slot_index(slot: FramebufferSlot) -> usize {
    match slot {
        FramebufferSlot::UpscaledPing => 0,
        FramebufferSlot::UpscaledPong => 1,
        FramebufferSlot::Final => 2,
        FramebufferSlot::WipeEffectSource => 3,
    }
}

fn texture_2d(
    device: &wgpu::Device,
    label: &str,
    extent: Extent2d,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: extent.width.max(1),
            height: extent.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

struct Set {
    layout: wgpu::BindGroupLayout,
    group: wgpu::BindGroup,
}

pub struct HeadlessTargets {
    extent: Extent2d,
    images: [wgpu::Texture; 4],
    framebuffers: Set,
    uniform_buffer: wgpu::Buffer,
    uniform: Set,
    blue_noise: Set,
}

impl HeadlessTargets {
    pub fn new(device: &WgpuDevice, extent: Extent2d) -> Self {
        let gpu = device.device();
        let usage = wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        let images =
            SLOTS.map(|slot| texture_2d(gpu, &slot.to_string(), extent, HEADLESS_FORMAT, usage));

        let storage_entries: Vec<_> = (0..SLOTS.len() as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::ReadWrite,
                    format: HEADLESS_FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            })
            .collect();
        let layout = gpu.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("framebuffers"),
            entries: &storage_entries,
        });
        let views: Vec<_> = images
            .iter()
            .map(|image| image.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();
        let entries: Vec<_> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        let group = gpu.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("framebuffers"),
            layout: &layout,
            entries: &entries,
        });
        let framebuffers = Set { layout, group };

        let uniform_buffer = gpu.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform"),
            size: UNIFORM_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let layout = gpu.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let group = gpu.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let uniform = Set { layout, group };

        let noise = texture_2d(
            gpu,
            "blue noise",
            Extent2d::new(BLUE_NOISE_SIZE, BLUE_NOISE_SIZE),
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        let noise_view = noise.create_view(&wgpu::TextureViewDescriptor::default());
        let layout = gpu.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blue noise"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let group = gpu.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blue noise"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&noise_view),
            }],
        });
        let blue_noise = Set { layout, group };

        debug!(?extent, "created headless targets");
        Self {
            extent,
            images,
            framebuffers,
            uniform_buffer,
            uniform,
            blue_noise,
        }
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// The uniform buffer bound at set 1.
    pub fn uniform_buffer(&self) -> &wgpu::Buffer {
        &self.uniform_buffer
    }

    pub fn resolution(&self) -> ResolutionState {
        ResolutionState {
            render: self.extent,
            upscaled: self.extent,
        }
    }

    pub fn texture(&self, slot: FramebufferSlot) -> &wgpu::Texture {
        &self.images[slot_index(slot)]
    }
}

impl FramebufferProvider<WgpuDevice> for HeadlessTargets {
    fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.framebuffers.layout
    }

    fn bind_group(&self, _frame_index: u32) -> &wgpu::BindGroup {
        &self.framebuffers.group
    }

    fn image(&self, slot: FramebufferSlot, _frame_index: u32) -> Option<&wgpu::Texture> {
        Some(self.texture(slot))
    }

    fn size(&self, _resolution: &ResolutionState, _slot: FramebufferSlot) -> Extent2d {
        self.extent
    }

    fn format(&self, _slot: FramebufferSlot) -> wgpu::TextureFormat {
        HEADLESS_FORMAT
    }

    fn insert_barriers(
        &self,
        _encoder: &mut wgpu::CommandEncoder,
        _frame_index: u32,
        _slots: &[FramebufferSlot],
    ) {
    }
}

impl UniformProvider<WgpuDevice> for HeadlessTargets {
    fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.uniform.layout
    }

    fn bind_group(&self, _frame_index: u32) -> &wgpu::BindGroup {
        &self.uniform.group
    }
}

impl BlueNoiseProvider<WgpuDevice> for HeadlessTargets {
    fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.blue_noise.layout
    }

    fn bind_group(&self) -> &wgpu::BindGroup {
        &self.blue_noise.group
    }
}
