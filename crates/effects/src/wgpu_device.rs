//! wgpu backend for the shader registry and effects.
//!
//! SPIR-V binaries are passed straight through with `ShaderSource::SpirV`.
//! wgpu tracks image state itself, so explicit barriers and layout
//! transitions are recorded as no-ops.
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use shaderbank::{Capability, DeviceError, ShaderDevice, ShaderStage};
use tracing::{debug, trace, warn};

use crate::framebuffers::Extent2d;
use crate::{ComputePipelineDesc, DispatchDesc, EffectDevice, ImageBarrier};

fn capability_features(capability: Capability) -> wgpu::Features {
    match capability {
        Capability::RayQueryPositionFetch => {
            wgpu::Features::EXPERIMENTAL_RAY_QUERY
                | wgpu::Features::EXPERIMENTAL_RAY_HIT_VERTEX_RETURN
        }
    }
}

/// Stages wgpu can build pipelines from.
fn stage_supported(stage: ShaderStage) -> bool {
    matches!(
        stage,
        ShaderStage::Vertex | ShaderStage::Fragment | ShaderStage::Compute
    )
}

const BLIT_SHADER: &str = r#"
struct BlitParams {
    scale: vec2<f32>,
    src_max: vec2<f32>,
};

@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var<uniform> params: BlitParams;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = min(floor(position.xy * params.scale), params.src_max);
    return textureLoad(source, vec2<i32>(texel), 0);
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct BlitParams {
    scale: [f32; 2],
    src_max: [f32; 2],
}

impl BlitParams {
    /// Maps destination pixels inside `dst` onto source texels inside `src`.
    fn new(src: Extent2d, dst: Extent2d) -> Self {
        Self {
            scale: [
                src.width as f32 / dst.width as f32,
                src.height as f32 / dst.height as f32,
            ],
            src_max: [
                src.width.saturating_sub(1) as f32,
                src.height.saturating_sub(1) as f32,
            ],
        }
    }
}

/// Nearest-neighbour region blit for one destination format.
struct Blitter {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

impl Blitter {
    fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("rtfx blit"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BLIT_SHADER)),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rtfx blit"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rtfx blit"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("rtfx blit"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });
        debug!(?format, "created blit pipeline");
        Self { layout, pipeline }
    }
}

#[derive(Clone)]
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    features: wgpu::Features,
    blitters: Arc<Mutex<HashMap<wgpu::TextureFormat, Arc<Blitter>>>>,
}

impl WgpuDevice {
    /// Opens the best available adapter without a surface. Capabilities in
    /// `disabled` are never requested even when the adapter has them.
    pub fn headless(disabled: &[Capability]) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| DeviceError::new("adapter", err.to_string()))?;

        let info = adapter.get_info();
        let available = adapter.features();
        let mut required = wgpu::Features::empty();
        if available.contains(wgpu::Features::PUSH_CONSTANTS) {
            required |= wgpu::Features::PUSH_CONSTANTS;
        } else {
            warn!(adapter = %info.name, "adapter has no push constant support; effects will fail to build");
        }

        for capability in Capability::ALL {
            let features = capability_features(capability);
            if disabled.contains(&capability) {
                debug!(%capability, "capability disabled by configuration");
            } else if available.contains(features) {
                required |= features;
            }
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("rtfx device"),
            required_features: required,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| DeviceError::new("device", err.to_string()))?;

        debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            features = ?required,
            "opened headless GPU device"
        );
        Ok(Self::from_parts(device, queue))
    }

    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let features = device.features();
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            features,
            blitters: Arc::default(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn blitter(&self, format: wgpu::TextureFormat) -> Arc<Blitter> {
        let mut blitters = self.blitters.lock().unwrap_or_else(PoisonError::into_inner);
        blitters
            .entry(format)
            .or_insert_with(|| Arc::new(Blitter::new(&self.device, format)))
            .clone()
    }

    /// Runs `create` inside a validation error scope.
    fn scoped<T>(
        &self,
        label: &str,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(DeviceError::new(label, err.to_string())),
            None => Ok(value),
        }
    }
}

impl ShaderDevice for WgpuDevice {
    type Module = wgpu::ShaderModule;

    fn supports(&self, capability: Capability) -> bool {
        self.features.contains(capability_features(capability))
    }

    fn create_shader_module(
        &self,
        label: &str,
        stage: ShaderStage,
        words: &[u32],
    ) -> Result<Self::Module, DeviceError> {
        if !stage_supported(stage) {
            return Err(DeviceError::new(
                label,
                format!("{stage} shaders are not supported by the wgpu backend"),
            ));
        }
        self.scoped(label, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::SpirV(Cow::Borrowed(words)),
            })
        })
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|err| DeviceError::new("device", err.to_string()))
    }
}

impl EffectDevice for WgpuDevice {
    type BindGroupLayout = wgpu::BindGroupLayout;
    type BindGroup = wgpu::BindGroup;
    type PipelineLayout = wgpu::PipelineLayout;
    type Pipeline = wgpu::ComputePipeline;
    type Encoder = wgpu::CommandEncoder;
    type Image = wgpu::Texture;
    type Format = wgpu::TextureFormat;

    fn create_pipeline_layout(
        &self,
        label: &str,
        set_layouts: &[&wgpu::BindGroupLayout],
        push_constant_size: u32,
    ) -> Result<wgpu::PipelineLayout, DeviceError> {
        let push = wgpu::PushConstantRange {
            stages: wgpu::ShaderStages::COMPUTE,
            range: 0..push_constant_size,
        };
        let ranges = if push_constant_size > 0 {
            std::slice::from_ref(&push)
        } else {
            &[]
        };

        self.scoped(label, |device| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: set_layouts,
                push_constant_ranges: ranges,
            })
        })
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_, Self>,
    ) -> Result<wgpu::ComputePipeline, DeviceError> {
        let constants = [("0", f64::from(desc.specialization))];
        self.scoped(desc.label, |device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: Some(desc.layout),
                module: desc.module,
                entry_point: Some(desc.entry_point),
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    zero_initialize_workgroup_memory: true,
                },
                cache: None,
            })
        })
    }

    fn cmd_dispatch(&self, encoder: &mut wgpu::CommandEncoder, desc: &DispatchDesc<'_, Self>) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(desc.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(desc.pipeline);
        for (index, group) in desc.bind_groups.iter().enumerate() {
            pass.set_bind_group(index as u32, Some(*group), &[]);
        }
        if !desc.push_constants.is_empty() {
            pass.set_push_constants(0, desc.push_constants);
        }
        let [x, y, z] = desc.groups;
        pass.dispatch_workgroups(x, y, z);
    }

    fn cmd_image_barrier(&self, _encoder: &mut wgpu::CommandEncoder, barriers: &[ImageBarrier<'_, Self>]) {
        trace!(count = barriers.len(), "image barriers are tracked by wgpu");
    }

    fn cmd_copy_image(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        src: &wgpu::Texture,
        dst: &wgpu::Texture,
        extent: Extent2d,
    ) {
        encoder.copy_texture_to_texture(
            src.as_image_copy(),
            dst.as_image_copy(),
            wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn cmd_blit_image(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        src: &wgpu::Texture,
        src_extent: Extent2d,
        dst: &wgpu::Texture,
        dst_extent: Extent2d,
    ) {
        let dst_extent = Extent2d::new(
            dst_extent.width.min(dst.width()),
            dst_extent.height.min(dst.height()),
        );
        let src_extent = Extent2d::new(
            src_extent.width.min(src.width()),
            src_extent.height.min(src.height()),
        );
        let empty = |extent: Extent2d| extent.width == 0 || extent.height == 0;
        if empty(src_extent) || empty(dst_extent) {
            trace!(?src_extent, ?dst_extent, "skipping empty blit");
            return;
        }

        let blitter = self.blitter(dst.format());
        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("rtfx blit params"),
                contents: bytemuck::bytes_of(&BlitParams::new(src_extent, dst_extent)),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let src_view = src.create_view(&wgpu::TextureViewDescriptor::default());
        let dst_view = dst.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("rtfx blit"),
            layout: &blitter.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("rtfx blit"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &dst_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&blitter.pipeline);
        pass.set_bind_group(0, Some(&bind_group), &[]);
        pass.set_viewport(
            0.0,
            0.0,
            dst_extent.width as f32,
            dst_extent.height as f32,
            0.0,
            1.0,
        );
        pass.set_scissor_rect(0, 0, dst_extent.width, dst_extent.height);
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_raster_and_compute_stages_are_buildable() {
        assert!(stage_supported(ShaderStage::Compute));
        assert!(stage_supported(ShaderStage::Fragment));
        assert!(!stage_supported(ShaderStage::RayGeneration));
        assert!(!stage_supported(ShaderStage::Mesh));
    }

    #[test]
    fn ray_query_capability_needs_both_features() {
        let features = capability_features(Capability::RayQueryPositionFetch);
        assert!(features.contains(wgpu::Features::EXPERIMENTAL_RAY_QUERY));
        assert!(features.contains(wgpu::Features::EXPERIMENTAL_RAY_HIT_VERTEX_RETURN));
    }

    #[test]
    fn blit_params_scale_source_region_onto_destination_region() {
        let params = BlitParams::new(Extent2d::new(64, 4), Extent2d::new(32, 4));
        assert_eq!(params.scale, [2.0, 1.0]);
        assert_eq!(params.src_max, [63.0, 3.0]);

        let upscale = BlitParams::new(Extent2d::new(16, 9), Extent2d::new(64, 36));
        assert_eq!(upscale.scale, [0.25, 0.25]);
        assert_eq!(std::mem::size_of::<BlitParams>(), 16);
    }

    fn r32_texture(device: &WgpuDevice, width: u32, height: u32, values: &[f32]) -> wgpu::Texture {
        let texture = device.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("blit test"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        device.queue().write_texture(
            texture.as_image_copy(),
            bytemuck::cast_slice(values),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            texture.size(),
        );
        texture
    }

    /// Reads back the first row of a 64-texel wide R32Float texture.
    fn read_first_row(device: &WgpuDevice, texture: &wgpu::Texture) -> Vec<f32> {
        let buffer = device.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("blit readback"),
            size: 256,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_encoder("blit readback");
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(256),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 64,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        device.submit(encoder);
        buffer.slice(..).map_async(wgpu::MapMode::Read, |_| {});
        device.wait_idle().unwrap();
        let values = bytemuck::pod_collect_to_vec(&buffer.slice(..).get_mapped_range()[..]);
        buffer.unmap();
        values
    }

    #[test]
    fn blit_honours_source_and_destination_extents() {
        let Ok(device) = WgpuDevice::headless(&Capability::ALL) else {
            return;
        };
        let ramp: Vec<f32> = (0..64 * 4).map(|i| (i % 64) as f32).collect();
        let src = r32_texture(&device, 64, 4, &ramp);
        let dst = r32_texture(&device, 64, 4, &[-1.0; 64 * 4]);

        for _ in 0..2 {
            let mut encoder = device.create_encoder("blit test");
            device.cmd_blit_image(
                &mut encoder,
                &src,
                Extent2d::new(64, 4),
                &dst,
                Extent2d::new(32, 4),
            );
            device.submit(encoder);
        }
        assert_eq!(device.blitters.lock().unwrap().len(), 1);

        let row = read_first_row(&device, &dst);
        for (x, value) in row.iter().enumerate() {
            if x < 32 {
                assert_eq!(*value, (2 * x + 1) as f32, "texel {x}");
            } else {
                assert_eq!(*value, -1.0, "texel {x} outside the destination extent");
            }
        }
    }

    #[test]
    fn headless_device_waits_idle_when_available() {
        let Ok(device) = WgpuDevice::headless(&Capability::ALL) else {
            return;
        };
        assert!(!device.supports(Capability::RayQueryPositionFetch));
        device.wait_idle().unwrap();
    }
}
