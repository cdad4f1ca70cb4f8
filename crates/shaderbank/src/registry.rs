//! Owns every loaded shader module and tells dependents when they have been
//! replaced.
//!
//! Types:
//!
//! - `ShaderModuleRegistry` maps shader names to GPU modules created from the
//!   manifest's binaries. Its contents are replaced wholesale by `reload`.
//! - `StageInfo` is what a pipeline build needs from a loaded shader.
//! - `ShaderReloadHook` is implemented by anything holding pipelines built from
//!   registry modules.
//! - `Subscription` is the guard returned by `subscribe`; dropping it removes
//!   the hook from the registry's slot table.
//! - `Subscribed` bundles a hook with its guard for owners that do not need
//!   to share the hook any further.
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::{Capability, ShaderDevice, ShaderError, ShaderManifest, ShaderStage};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Entry point every shader binary is compiled with.
pub const ENTRY_POINT: &str = "main";

#[derive(Debug, Clone)]
struct TableEntry {
    name: String,
    file: String,
    requires: Option<Capability>,
    stage: ShaderStage,
}

struct LoadedModule<M> {
    module: M,
    stage: ShaderStage,
}

/// A loaded shader, ready to be plugged into a pipeline.
pub struct StageInfo<'a, M> {
    pub name: &'a str,
    pub module: &'a M,
    pub stage: ShaderStage,
    pub entry_point: &'static str,
}

pub trait ShaderReloadHook<D: ShaderDevice> {
    /// Called synchronously from `ShaderModuleRegistry::reload` after the new
    /// modules are loaded and while the device is idle.
    fn on_shader_reload(&mut self, registry: &ShaderModuleRegistry<D>) -> Result<(), ShaderError>;
}

type HookRef<D> = Rc<RefCell<dyn ShaderReloadHook<D>>>;

struct Slot<D: ShaderDevice> {
    generation: u64,
    hook: Option<HookRef<D>>,
}

struct SubscriberSlots<D: ShaderDevice> {
    slots: Vec<Slot<D>>,
    free: Vec<usize>,
}

impl<D: ShaderDevice> SubscriberSlots<D> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, hook: HookRef<D>) -> (usize, u64) {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.generation += 1;
            slot.hook = Some(hook);
            (index, slot.generation)
        } else {
            self.slots.push(Slot {
                generation: 0,
                hook: Some(hook),
            });
            (self.slots.len() - 1, 0)
        }
    }

    fn live(&self) -> Vec<HookRef<D>> {
        self.slots
            .iter()
            .filter_map(|slot| slot.hook.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.hook.is_some()).count()
    }
}

trait ReleaseSlot {
    fn release(&mut self, index: usize, generation: u64);
}

impl<D: ShaderDevice> ReleaseSlot for SubscriberSlots<D> {
    fn release(&mut self, index: usize, generation: u64) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.generation == generation && slot.hook.take().is_some() {
                self.free.push(index);
            }
        }
    }
}

/// Keeps a hook registered for reload notifications until dropped.
#[must_use = "dropping a Subscription unsubscribes the hook immediately"]
pub struct Subscription {
    table: Weak<RefCell<dyn ReleaseSlot>>,
    index: usize,
    generation: u64,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.borrow_mut().release(self.index, self.generation);
        }
    }
}

/// A reload hook together with the subscription that keeps it registered.
pub struct Subscribed<H> {
    hook: Rc<RefCell<H>>,
    _subscription: Subscription,
}

impl<H> Subscribed<H> {
    pub fn borrow(&self) -> Ref<'_, H> {
        self.hook.borrow()
    }

    /// Panics if called from inside the hook's own reload callback.
    pub fn borrow_mut(&self) -> RefMut<'_, H> {
        self.hook.borrow_mut()
    }
}

pub struct ShaderModuleRegistry<D: ShaderDevice> {
    device: D,
    folder: PathBuf,
    table: Vec<TableEntry>,
    modules: HashMap<String, LoadedModule<D::Module>>,
    skipped: Vec<String>,
    subscribers: Rc<RefCell<SubscriberSlots<D>>>,
}

impl<D: ShaderDevice> ShaderModuleRegistry<D> {
    /// Resolves every manifest entry's stage, then loads all modules.
    pub fn new(
        device: D,
        folder: impl Into<PathBuf>,
        manifest: &ShaderManifest,
    ) -> Result<Self, ShaderError> {
        let issues = manifest.validate();
        if !issues.is_empty() {
            return Err(ShaderError::ManifestValidation(issues));
        }

        let table = manifest
            .shaders
            .iter()
            .map(|shader| {
                Ok(TableEntry {
                    name: shader.name.clone(),
                    file: shader.file.clone(),
                    requires: shader.requires,
                    stage: ShaderStage::from_filename(&shader.file)?,
                })
            })
            .collect::<Result<Vec<_>, ShaderError>>()?;

        let mut registry = Self {
            device,
            folder: folder.into(),
            table,
            modules: HashMap::new(),
            skipped: Vec::new(),
            subscribers: Rc::new(RefCell::new(SubscriberSlots::new())),
        };
        registry.load()?;
        Ok(registry)
    }

    /// Loads every table entry the device can support. On error nothing from
    /// this pass is kept.
    pub fn load(&mut self) -> Result<(), ShaderError> {
        let mut modules = HashMap::with_capacity(self.table.len());
        let mut skipped = Vec::new();

        for entry in &self.table {
            if let Some(capability) = entry.requires {
                if !self.device.supports(capability) {
                    warn!(
                        shader = %entry.file,
                        %capability,
                        "skipping shader, capability is not supported by the device"
                    );
                    skipped.push(entry.name.clone());
                    continue;
                }
            }

            let path = self.folder.join(&entry.file);
            let words = read_spirv(&path)?;
            let module = self
                .device
                .create_shader_module(&entry.name, entry.stage, &words)?;
            debug!(shader = %entry.name, stage = %entry.stage, path = %path.display(), "loaded shader module");
            modules.insert(
                entry.name.clone(),
                LoadedModule {
                    module,
                    stage: entry.stage,
                },
            );
        }

        self.modules = modules;
        self.skipped = skipped;
        info!(
            loaded = self.modules.len(),
            skipped = self.skipped.len(),
            folder = %self.folder.display(),
            "loaded shader modules"
        );
        Ok(())
    }

    /// Destroys every loaded module. Safe to call when nothing is loaded.
    pub fn unload(&mut self) {
        let count = self.modules.len();
        self.modules.clear();
        self.skipped.clear();
        debug!(count, "unloaded shader modules");
    }

    /// Replaces every module with a fresh load from disk and rebuilds all
    /// subscribers. The device is idle on entry to and exit from the
    /// destructive window.
    pub fn reload(&mut self) -> Result<(), ShaderError> {
        self.device.wait_idle()?;

        self.unload();
        self.load()?;
        self.notify_subscribers()?;

        self.device.wait_idle()?;
        info!(subscribers = self.subscriber_count(), "shader reload complete");
        Ok(())
    }

    /// Runs every live hook. The first failing hook aborts the notification.
    pub fn notify_subscribers(&self) -> Result<(), ShaderError> {
        let hooks = self.subscribers.borrow().live();
        for hook in hooks {
            hook.borrow_mut().on_shader_reload(self)?;
        }
        Ok(())
    }

    pub fn subscribe<H>(&self, hook: Rc<RefCell<H>>) -> Subscription
    where
        H: ShaderReloadHook<D> + 'static,
        D: 'static,
    {
        let hook: HookRef<D> = hook;
        let (index, generation) = self.subscribers.borrow_mut().insert(hook);
        let table: Rc<RefCell<dyn ReleaseSlot>> = self.subscribers.clone();
        Subscription {
            table: Rc::downgrade(&table),
            index,
            generation,
        }
    }

    /// Takes ownership of `hook` and subscribes it.
    pub fn register<H>(&self, hook: H) -> Subscribed<H>
    where
        H: ShaderReloadHook<D> + 'static,
        D: 'static,
    {
        let hook = Rc::new(RefCell::new(hook));
        let subscription = self.subscribe(hook.clone());
        Subscribed {
            hook,
            _subscription: subscription,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn module(&self, name: &str) -> Option<&D::Module> {
        self.modules.get(name).map(|loaded| &loaded.module)
    }

    pub fn stage(&self, name: &str) -> Option<ShaderStage> {
        self.modules.get(name).map(|loaded| loaded.stage)
    }

    pub fn stage_info(&self, name: &str) -> Result<StageInfo<'_, D::Module>, ShaderError> {
        let (name, loaded) = self
            .modules
            .get_key_value(name)
            .ok_or_else(|| ShaderError::MissingShader {
                name: name.to_string(),
            })?;
        Ok(StageInfo {
            name: name.as_str(),
            module: &loaded.module,
            stage: loaded.stage,
            entry_point: ENTRY_POINT,
        })
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Loaded shader names, sorted.
    pub fn loaded_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Names skipped by the last load because of a missing capability.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

fn read_spirv(path: &Path) -> Result<Vec<u32>, ShaderError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ShaderError::ResourceNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ShaderError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if bytes.is_empty() {
        return Err(ShaderError::ResourceNotFound {
            path: path.to_path_buf(),
        });
    }
    if bytes.len() % 4 != 0 {
        return Err(ShaderError::InvalidBinary {
            path: path.to_path_buf(),
            reason: format!("size {} is not a multiple of 4", bytes.len()),
        });
    }

    let mut words: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes);
    match words[0] {
        SPIRV_MAGIC => {}
        magic if magic == SPIRV_MAGIC.swap_bytes() => {
            debug!(path = %path.display(), "byte-swapping SPIR-V written in the other endianness");
            for word in &mut words {
                *word = word.swap_bytes();
            }
        }
        magic => {
            return Err(ShaderError::InvalidBinary {
                path: path.to_path_buf(),
                reason: format!("bad magic number {magic:#010x}"),
            })
        }
    }
    Ok(words)
}
