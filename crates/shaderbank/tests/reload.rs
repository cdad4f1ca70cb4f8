use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use shaderbank::{
    Capability, DeviceError, ShaderDevice, ShaderError, ShaderManifest, ShaderModuleRegistry,
    ShaderReloadHook, ShaderStage,
};

type Log = Rc<RefCell<Vec<String>>>;

#[derive(Clone)]
struct LoggingDevice {
    log: Log,
    capabilities: Vec<Capability>,
}

impl LoggingDevice {
    fn new(capabilities: Vec<Capability>) -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            capabilities,
        }
    }

    fn events(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

struct LoggedModule {
    name: String,
    log: Log,
}

impl Drop for LoggedModule {
    fn drop(&mut self) {
        self.log.borrow_mut().push(format!("destroy {}", self.name));
    }
}

impl ShaderDevice for LoggingDevice {
    type Module = LoggedModule;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn create_shader_module(
        &self,
        label: &str,
        _stage: ShaderStage,
        _words: &[u32],
    ) -> Result<Self::Module, DeviceError> {
        self.log.borrow_mut().push(format!("create {label}"));
        Ok(LoggedModule {
            name: label.to_string(),
            log: self.log.clone(),
        })
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        self.log.borrow_mut().push("wait idle".into());
        Ok(())
    }
}

struct Rebuilder {
    log: Log,
    id: usize,
}

impl ShaderReloadHook<LoggingDevice> for Rebuilder {
    fn on_shader_reload(
        &mut self,
        registry: &ShaderModuleRegistry<LoggingDevice>,
    ) -> Result<(), ShaderError> {
        let info = registry.stage_info("EffectWaves")?;
        assert_eq!(info.stage, ShaderStage::Compute);
        self.log.borrow_mut().push(format!("notify {}", self.id));
        Ok(())
    }
}

fn write_binaries(folder: &Path, manifest: &ShaderManifest) {
    let words = [0x0723_0203u32, 0x0001_0500, 0, 8, 0];
    for shader in &manifest.shaders {
        fs::write(folder.join(&shader.file), spirv_bytes(&words)).unwrap();
    }
}

fn spirv_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

#[test]
fn builtin_table_skips_capability_gated_shaders() {
    let manifest = ShaderManifest::builtin();
    let dir = tempfile::tempdir().unwrap();
    write_binaries(dir.path(), &manifest);

    let device = LoggingDevice::new(Vec::new());
    let registry = ShaderModuleRegistry::new(device, dir.path(), &manifest).unwrap();

    assert_eq!(registry.skipped(), ["Fluid_Particles".to_string()]);
    assert_eq!(registry.loaded_names().len(), manifest.shaders.len() - 1);
    assert_eq!(registry.stage("RGenPrimary"), Some(ShaderStage::RayGeneration));
    assert!(registry.module("Fluid_Particles").is_none());

    let capable = LoggingDevice::new(vec![Capability::RayQueryPositionFetch]);
    let registry = ShaderModuleRegistry::new(capable, dir.path(), &manifest).unwrap();
    assert!(registry.skipped().is_empty());
    assert!(registry.is_loaded("Fluid_Particles"));
}

#[test]
fn missing_binary_aborts_with_resource_not_found() {
    let manifest = ShaderManifest::builtin_effects();
    let dir = tempfile::tempdir().unwrap();
    write_binaries(dir.path(), &manifest);
    fs::remove_file(dir.path().join("EfDither.comp.spv")).unwrap();

    let err = ShaderModuleRegistry::new(LoggingDevice::new(Vec::new()), dir.path(), &manifest)
        .err()
        .unwrap();
    match err {
        ShaderError::ResourceNotFound { path } => {
            assert_eq!(path, dir.path().join("EfDither.comp.spv"))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn reload_notifies_only_live_subscribers() {
    let manifest = ShaderManifest::builtin_effects();
    let dir = tempfile::tempdir().unwrap();
    write_binaries(dir.path(), &manifest);

    let device = LoggingDevice::new(Vec::new());
    let mut registry = ShaderModuleRegistry::new(device.clone(), dir.path(), &manifest).unwrap();

    let first = registry.register(Rebuilder {
        log: device.log.clone(),
        id: 1,
    });
    let second = registry.register(Rebuilder {
        log: device.log.clone(),
        id: 2,
    });
    let third = registry.register(Rebuilder {
        log: device.log.clone(),
        id: 3,
    });
    drop(second);

    for _ in 0..2 {
        device.log.borrow_mut().clear();
        registry.reload().unwrap();
        let notified: Vec<String> = device
            .events()
            .into_iter()
            .filter(|event| event.starts_with("notify"))
            .collect();
        assert_eq!(notified, vec!["notify 1", "notify 3"]);
    }

    assert_eq!(first.borrow().id, 1);
    assert_eq!(third.borrow().id, 3);
    assert_eq!(registry.subscriber_count(), 2);
}

#[test]
fn reload_destroys_before_recreating_inside_idle_waits() {
    let manifest = ShaderManifest::builtin_effects();
    let dir = tempfile::tempdir().unwrap();
    write_binaries(dir.path(), &manifest);

    let device = LoggingDevice::new(Vec::new());
    let mut registry = ShaderModuleRegistry::new(device.clone(), dir.path(), &manifest).unwrap();
    let _hook = registry.register(Rebuilder {
        log: device.log.clone(),
        id: 7,
    });
    device.log.borrow_mut().clear();

    registry.reload().unwrap();
    let events = device.events();
    let count = manifest.shaders.len();

    assert_eq!(events.first().map(String::as_str), Some("wait idle"));
    assert_eq!(events.last().map(String::as_str), Some("wait idle"));
    assert!(events[1..=count].iter().all(|e| e.starts_with("destroy ")));
    assert!(events[count + 1..=2 * count]
        .iter()
        .all(|e| e.starts_with("create ")));
    assert_eq!(events[2 * count + 1], "notify 7");
    assert_eq!(events.len(), 2 * count + 3);
}
