//! A GPU-free device that records every object lifetime and command, plus
//! in-memory providers and a ready-made registry for effect tests.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::rc::Rc;

use shaderbank::{
    Capability, DeviceError, ShaderDescriptor, ShaderDevice, ShaderManifest, ShaderModuleRegistry,
    ShaderStage,
};

use crate::framebuffers::{
    BlueNoiseProvider, Extent2d, FramebufferProvider, FramebufferSlot, ImageLayout,
    ResolutionState, UniformProvider,
};
use crate::pipeline::EffectArgs;
use crate::{ComputePipelineDesc, DispatchDesc, EffectDevice, ImageBarrier};

/// Object lifetime events, in the order the device saw them.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateModule {
        label: String,
        stage: ShaderStage,
    },
    DestroyModule {
        label: String,
    },
    CreatePipelineLayout {
        label: String,
        set_layouts: Vec<String>,
        push_constant_size: u32,
    },
    DestroyPipelineLayout {
        label: String,
    },
    CreatePipeline {
        label: String,
        specialization: u32,
    },
    DestroyPipeline {
        label: String,
    },
    WaitIdle,
}

/// Commands recorded into a [`RecordingEncoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FramebufferBarrier {
        frame_index: u32,
        slots: Vec<FramebufferSlot>,
    },
    ImageBarrier {
        image: String,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
    Dispatch {
        label: String,
        pipeline: String,
        bind_groups: Vec<String>,
        push_constants: Vec<u8>,
        groups: [u32; 3],
    },
    Copy {
        src: String,
        dst: String,
        extent: Extent2d,
    },
    Blit {
        src: String,
        src_extent: Extent2d,
        dst: String,
        dst_extent: Extent2d,
    },
}

#[derive(Debug, Default)]
pub struct RecordingEncoder {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
enum Kind {
    Module,
    PipelineLayout,
    Pipeline,
}

#[derive(Default)]
struct Shared {
    events: RefCell<Vec<Event>>,
    live: [Cell<i64>; 3],
    capabilities: RefCell<Vec<Capability>>,
    pipeline_budget: Cell<usize>,
}

impl Shared {
    fn live(&self, kind: Kind) -> &Cell<i64> {
        &self.live[kind as usize]
    }
}

/// A GPU object owned by the recording device; dropping it logs its
/// destruction.
pub struct Recorded {
    label: String,
    kind: Kind,
    shared: Rc<Shared>,
}

impl Recorded {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for Recorded {
    fn drop(&mut self) {
        let label = std::mem::take(&mut self.label);
        let event = match self.kind {
            Kind::Module => Event::DestroyModule { label },
            Kind::PipelineLayout => Event::DestroyPipelineLayout { label },
            Kind::Pipeline => Event::DestroyPipeline { label },
        };
        self.shared.events.borrow_mut().push(event);
        let live = self.shared.live(self.kind);
        live.set(live.get() - 1);
    }
}

#[derive(Clone)]
pub struct RecordingDevice {
    shared: Rc<Shared>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(Shared {
                pipeline_budget: Cell::new(usize::MAX),
                ..Shared::default()
            }),
        }
    }

    pub fn with_capabilities(capabilities: &[Capability]) -> Self {
        let device = Self::new();
        device
            .shared
            .capabilities
            .borrow_mut()
            .extend_from_slice(capabilities);
        device
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.events.borrow().clone()
    }

    /// Pipeline create/destroy events only.
    pub fn pipeline_events(&self) -> Vec<Event> {
        self.shared
            .events
            .borrow()
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    Event::CreatePipeline { .. } | Event::DestroyPipeline { .. }
                )
            })
            .cloned()
            .collect()
    }

    pub fn clear_events(&self) {
        self.shared.events.borrow_mut().clear();
    }

    /// Lets `count` more pipelines be created, then fails every creation
    /// until reset with `usize::MAX`.
    pub fn fail_pipelines_after(&self, count: usize) {
        self.shared.pipeline_budget.set(count);
    }

    pub fn live_modules(&self) -> i64 {
        self.live(Kind::Module)
    }

    pub fn live_pipeline_layouts(&self) -> i64 {
        self.live(Kind::PipelineLayout)
    }

    pub fn live_pipelines(&self) -> i64 {
        self.live(Kind::Pipeline)
    }

    fn live(&self, kind: Kind) -> i64 {
        self.shared.live(kind).get()
    }

    fn create(&self, kind: Kind, label: &str, event: Event) -> Recorded {
        self.shared.events.borrow_mut().push(event);
        let live = self.shared.live(kind);
        live.set(live.get() + 1);
        Recorded {
            label: label.to_string(),
            kind,
            shared: self.shared.clone(),
        }
    }
}

impl ShaderDevice for RecordingDevice {
    type Module = Recorded;

    fn supports(&self, capability: Capability) -> bool {
        self.shared.capabilities.borrow().contains(&capability)
    }

    fn create_shader_module(
        &self,
        label: &str,
        stage: ShaderStage,
        _words: &[u32],
    ) -> Result<Self::Module, DeviceError> {
        Ok(self.create(
            Kind::Module,
            label,
            Event::CreateModule {
                label: label.to_string(),
                stage,
            },
        ))
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        self.shared.events.borrow_mut().push(Event::WaitIdle);
        Ok(())
    }
}

impl EffectDevice for RecordingDevice {
    type BindGroupLayout = String;
    type BindGroup = String;
    type PipelineLayout = Recorded;
    type Pipeline = Recorded;
    type Encoder = RecordingEncoder;
    type Image = String;
    type Format = &'static str;

    fn create_pipeline_layout(
        &self,
        label: &str,
        set_layouts: &[&String],
        push_constant_size: u32,
    ) -> Result<Recorded, DeviceError> {
        Ok(self.create(
            Kind::PipelineLayout,
            label,
            Event::CreatePipelineLayout {
                label: label.to_string(),
                set_layouts: set_layouts.iter().map(|layout| layout.to_string()).collect(),
                push_constant_size,
            },
        ))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_, Self>,
    ) -> Result<Recorded, DeviceError> {
        let budget = self.shared.pipeline_budget.get();
        if budget == 0 {
            return Err(DeviceError::new(desc.label, "pipeline creation failed"));
        }
        self.shared.pipeline_budget.set(budget.saturating_sub(1));
        Ok(self.create(
            Kind::Pipeline,
            desc.label,
            Event::CreatePipeline {
                label: desc.label.to_string(),
                specialization: desc.specialization,
            },
        ))
    }

    fn cmd_dispatch(&self, encoder: &mut RecordingEncoder, desc: &DispatchDesc<'_, Self>) {
        encoder.commands.push(Command::Dispatch {
            label: desc.label.to_string(),
            pipeline: desc.pipeline.label().to_string(),
            bind_groups: desc.bind_groups.iter().map(|group| group.to_string()).collect(),
            push_constants: desc.push_constants.to_vec(),
            groups: desc.groups,
        });
    }

    fn cmd_image_barrier(&self, encoder: &mut RecordingEncoder, barriers: &[ImageBarrier<'_, Self>]) {
        encoder
            .commands
            .extend(barriers.iter().map(|barrier| Command::ImageBarrier {
                image: barrier.image.clone(),
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
            }));
    }

    fn cmd_copy_image(
        &self,
        encoder: &mut RecordingEncoder,
        src: &String,
        dst: &String,
        extent: Extent2d,
    ) {
        encoder.commands.push(Command::Copy {
            src: src.clone(),
            dst: dst.clone(),
            extent,
        });
    }

    fn cmd_blit_image(
        &self,
        encoder: &mut RecordingEncoder,
        src: &String,
        src_extent: Extent2d,
        dst: &String,
        dst_extent: Extent2d,
    ) {
        encoder.commands.push(Command::Blit {
            src: src.clone(),
            src_extent,
            dst: dst.clone(),
            dst_extent,
        });
    }
}

const ALL_SLOTS: [FramebufferSlot; 4] = [
    FramebufferSlot::UpscaledPing,
    FramebufferSlot::UpscaledPong,
    FramebufferSlot::Final,
    FramebufferSlot::WipeEffectSource,
];

/// Framebuffers named after their slot, sized to the upscaled resolution
/// unless overridden.
pub struct TestFramebuffers {
    layout: String,
    group: String,
    images: HashMap<FramebufferSlot, String>,
    sizes: HashMap<FramebufferSlot, Extent2d>,
    formats: HashMap<FramebufferSlot, &'static str>,
}

impl Default for TestFramebuffers {
    fn default() -> Self {
        Self {
            layout: "framebuffers".into(),
            group: "framebuffers".into(),
            images: ALL_SLOTS
                .iter()
                .map(|slot| (*slot, slot.to_string()))
                .collect(),
            sizes: HashMap::new(),
            formats: HashMap::new(),
        }
    }
}

impl TestFramebuffers {
    pub fn layout(&self) -> &String {
        &self.layout
    }

    pub fn group(&self) -> &String {
        &self.group
    }

    pub fn set_size(&mut self, slot: FramebufferSlot, size: Extent2d) {
        self.sizes.insert(slot, size);
    }

    pub fn set_format(&mut self, slot: FramebufferSlot, format: &'static str) {
        self.formats.insert(slot, format);
    }

    pub fn remove_image(&mut self, slot: FramebufferSlot) {
        self.images.remove(&slot);
    }
}

impl FramebufferProvider<RecordingDevice> for TestFramebuffers {
    fn bind_group_layout(&self) -> &String {
        &self.layout
    }

    fn bind_group(&self, _frame_index: u32) -> &String {
        &self.group
    }

    fn image(&self, slot: FramebufferSlot, _frame_index: u32) -> Option<&String> {
        self.images.get(&slot)
    }

    fn size(&self, resolution: &ResolutionState, slot: FramebufferSlot) -> Extent2d {
        self.sizes.get(&slot).copied().unwrap_or(resolution.upscaled)
    }

    fn format(&self, slot: FramebufferSlot) -> &'static str {
        self.formats.get(&slot).copied().unwrap_or("rgba8")
    }

    fn insert_barriers(
        &self,
        encoder: &mut RecordingEncoder,
        frame_index: u32,
        slots: &[FramebufferSlot],
    ) {
        encoder.commands.push(Command::FramebufferBarrier {
            frame_index,
            slots: slots.to_vec(),
        });
    }
}

/// A uniform or blue noise resource with a single named layout and group.
pub struct NamedSet {
    name: String,
}

impl NamedSet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn layout(&self) -> &String {
        &self.name
    }

    pub fn group(&self) -> &String {
        &self.name
    }
}

impl UniformProvider<RecordingDevice> for NamedSet {
    fn bind_group_layout(&self) -> &String {
        &self.name
    }

    fn bind_group(&self, _frame_index: u32) -> &String {
        &self.name
    }
}

impl BlueNoiseProvider<RecordingDevice> for NamedSet {
    fn bind_group_layout(&self) -> &String {
        &self.name
    }

    fn bind_group(&self) -> &String {
        &self.name
    }
}

/// Writes a minimal SPIR-V header for every shader in `manifest`.
pub fn write_stub_binaries(folder: &std::path::Path, manifest: &ShaderManifest) {
    let words = [0x0723_0203u32, 0x0001_0500, 0, 1, 0];
    let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_ne_bytes()).collect();
    for shader in &manifest.shaders {
        fs::write(folder.join(&shader.file), &bytes)
            .unwrap_or_else(|err| panic!("failed to write {}: {err}", shader.file));
    }
}

/// A recording device with every effect shader loaded plus test providers.
pub struct TestResources {
    pub device: RecordingDevice,
    pub registry: ShaderModuleRegistry<RecordingDevice>,
    pub framebuffers: TestFramebuffers,
    pub uniform: NamedSet,
    pub blue_noise: NamedSet,
    pub folder: tempfile::TempDir,
}

impl Default for TestResources {
    fn default() -> Self {
        Self::new()
    }
}

impl TestResources {
    pub fn new() -> Self {
        Self::with_manifest(ShaderManifest::builtin_effects())
    }

    pub fn with_extra_shader(name: &str, file: &str) -> Self {
        let mut manifest = ShaderManifest::builtin_effects();
        manifest.shaders.push(ShaderDescriptor::new(name, file));
        Self::with_manifest(manifest)
    }

    pub fn with_manifest(manifest: ShaderManifest) -> Self {
        let folder = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
        write_stub_binaries(folder.path(), &manifest);
        let device = RecordingDevice::new();
        let registry = ShaderModuleRegistry::new(device.clone(), folder.path(), &manifest)
            .unwrap_or_else(|err| panic!("failed to load stub shaders: {err}"));
        Self {
            device,
            registry,
            framebuffers: TestFramebuffers::default(),
            uniform: NamedSet::new("uniform"),
            blue_noise: NamedSet::new("blue-noise"),
            folder,
        }
    }

    pub fn args(
        &self,
        width: u32,
        height: u32,
        current_time: f32,
        frame_index: u32,
    ) -> EffectArgs<'_, RecordingDevice> {
        EffectArgs {
            frame_index,
            framebuffers: &self.framebuffers,
            uniform: &self.uniform,
            width,
            height,
            current_time,
        }
    }

    pub fn resolution(&self, width: u32, height: u32) -> ResolutionState {
        let extent = Extent2d::new(width, height);
        ResolutionState {
            render: extent,
            upscaled: extent,
        }
    }
}
