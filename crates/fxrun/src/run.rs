use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use effects::{Extent2d, HeadlessTargets, WgpuDevice};
use fxconfig::FxConfig;
use shaderbank::{Capability, FolderWatcher, ShaderManifest, ShaderModuleRegistry};
use tracing_subscriber::EnvFilter;

use crate::cli::{CheckArgs, Cli, Command, WatchArgs};
use crate::paths::AppPaths;
use crate::pipelines::EffectSet;
use crate::report::CheckReport;

const WATCH_POLL: Duration = Duration::from_secs(1);

/// Offscreen framebuffer size used to build effect pipelines.
const TARGET_EXTENT: Extent2d = Extent2d::new(640, 360);

pub fn run(args: Cli) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    tracing::debug!(config = %paths.config_dir().display(), "resolved fxrun paths");

    match &args.command {
        Command::Paths => {
            print_paths(&paths, &args);
            Ok(())
        }
        Command::Check(check) => {
            let config = resolve_config(&args, &paths)?;
            let registry = open_registry(&config)?;
            run_check(&registry, &config, check)
        }
        Command::Watch(watch) => {
            let config = resolve_config(&args, &paths)?;
            let mut registry = open_registry(&config)?;
            run_watch(&mut registry, &config, watch)
        }
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_paths(paths: &AppPaths, args: &Cli) {
    let config_file = args.config.clone().unwrap_or_else(|| paths.config_file());
    println!("config dir:     {}", paths.config_dir().display());
    println!(
        "config file:    {}{}",
        config_file.display(),
        if config_file.exists() { "" } else { " (missing)" }
    );
    println!("shader folder:  {}", paths.default_shader_folder().display());
}

/// Loads the explicit `--config` file, else the default one if it exists,
/// else falls back to built-in settings under the config directory.
pub fn resolve_config(args: &Cli, paths: &AppPaths) -> Result<FxConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let path = paths.config_file();
            if path.exists() {
                load_config(&path)?
            } else {
                tracing::info!(path = %path.display(), "no configuration file; using defaults");
                default_config(paths)
            }
        }
    };

    if let Some(folder) = &args.shader_folder {
        config.shader_folder = folder.clone();
    }
    Ok(config)
}

fn load_config(path: &Path) -> Result<FxConfig> {
    let config = FxConfig::load(path)
        .with_context(|| format!("failed to load configuration {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded configuration");
    Ok(config)
}

fn default_config(paths: &AppPaths) -> FxConfig {
    FxConfig {
        version: 1,
        shader_folder: paths.default_shader_folder(),
        manifest: None,
        wipe_enabled: false,
        watch_interval: Duration::from_millis(500),
        disable_capabilities: Vec::new(),
        effects: BTreeMap::new(),
    }
}

pub fn disabled_capabilities(config: &FxConfig) -> Result<Vec<Capability>> {
    config
        .disable_capabilities
        .iter()
        .map(|raw| {
            raw.parse::<Capability>()
                .map_err(|err| anyhow::anyhow!(err))
                .context("invalid disable_capabilities entry")
        })
        .collect()
}

pub fn load_manifest(config: &FxConfig) -> Result<ShaderManifest> {
    match &config.manifest {
        Some(path) => ShaderManifest::load(path)
            .with_context(|| format!("failed to load shader manifest {}", path.display())),
        None => Ok(ShaderManifest::builtin_effects()),
    }
}

fn open_registry(config: &FxConfig) -> Result<ShaderModuleRegistry<WgpuDevice>> {
    let disabled = disabled_capabilities(config)?;
    let manifest = load_manifest(config)?;
    let device =
        WgpuDevice::headless(&disabled).context("failed to open a headless GPU device")?;

    ShaderModuleRegistry::new(device, &config.shader_folder, &manifest).with_context(|| {
        format!(
            "failed to load shaders from {}",
            config.shader_folder.display()
        )
    })
}

fn build_effects(
    registry: &ShaderModuleRegistry<WgpuDevice>,
    config: &FxConfig,
) -> EffectSet<WgpuDevice> {
    let targets = HeadlessTargets::new(registry.device(), TARGET_EXTENT);
    let effect_set = EffectSet::build(registry, &targets, &targets, &targets, config.wipe_enabled);
    tracing::info!(
        built = effect_set.statuses().len() - effect_set.failures(),
        failed = effect_set.failures(),
        "built effect pipelines"
    );
    effect_set
}

fn run_check(
    registry: &ShaderModuleRegistry<WgpuDevice>,
    config: &FxConfig,
    args: &CheckArgs,
) -> Result<()> {
    let effect_set = build_effects(registry, config);
    let report = CheckReport::collect(registry, config, effect_set.statuses());
    if args.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
        println!("{json}");
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

fn run_watch(
    registry: &mut ShaderModuleRegistry<WgpuDevice>,
    config: &FxConfig,
    args: &WatchArgs,
) -> Result<()> {
    if !registry.folder().is_dir() {
        bail!(
            "shader folder {} does not exist",
            registry.folder().display()
        );
    }

    let effect_set = build_effects(registry, config);
    let watcher = FolderWatcher::spawn(registry.folder(), config.watch_interval)
        .context("failed to start shader folder watcher")?;
    tracing::info!(
        folder = %watcher.folder().display(),
        interval = ?config.watch_interval,
        "watching for shader changes"
    );

    let mut reloads = 0usize;
    loop {
        let changes = watcher.wait_changes(WATCH_POLL);
        if changes.is_empty() {
            continue;
        }
        for path in &changes {
            tracing::debug!(path = %path.display(), "shader binary changed");
        }

        match registry.reload() {
            Ok(()) => tracing::info!(
                changed = changes.len(),
                loaded = registry.loaded_names().len(),
                pipelines = effect_set.with_pipelines(),
                "reloaded shaders"
            ),
            Err(err) => tracing::warn!(
                error = %err,
                pipelines = effect_set.with_pipelines(),
                "shader reload failed; waiting for the next change"
            ),
        }

        reloads += 1;
        if args.max_reloads > 0 && reloads >= args.max_reloads {
            tracing::info!(reloads, "reload limit reached; exiting");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    fn paths_in(root: &Path) -> AppPaths {
        AppPaths::from_raw(root.to_path_buf())
    }

    #[test]
    fn explicit_config_and_folder_override() {
        let root = TempDir::new().unwrap();
        let config_path = root.path().join("custom.toml");
        fs::write(
            &config_path,
            "version = 1\nshader_folder = \"spv\"\nwipe_enabled = true\n",
        )
        .unwrap();

        let args = Cli::try_parse_from([
            "fxrun",
            "check",
            "--config",
            config_path.to_str().unwrap(),
        ])
        .unwrap();
        let config = resolve_config(&args, &paths_in(root.path())).unwrap();
        assert_eq!(config.shader_folder, root.path().join("spv"));
        assert!(config.wipe_enabled);

        let args = Cli::try_parse_from([
            "fxrun",
            "check",
            "--config",
            config_path.to_str().unwrap(),
            "--shader-folder",
            "/tmp/elsewhere",
        ])
        .unwrap();
        let config = resolve_config(&args, &paths_in(root.path())).unwrap();
        assert_eq!(config.shader_folder, Path::new("/tmp/elsewhere"));
    }

    #[test]
    fn missing_default_config_falls_back_to_builtin_settings() {
        let root = TempDir::new().unwrap();
        let paths = paths_in(root.path());
        let args = Cli::try_parse_from(["fxrun", "check"]).unwrap();
        if args.config.is_some() {
            return;
        }

        let config = resolve_config(&args, &paths).unwrap();
        assert_eq!(config.shader_folder, root.path().join("shaders"));
        assert!(config.manifest.is_none());
        assert_eq!(
            load_manifest(&config).unwrap().shaders,
            ShaderManifest::builtin_effects().shaders
        );
    }

    #[test]
    fn parses_disabled_capabilities() {
        let mut config = default_config(&paths_in(Path::new("/tmp")));
        config.disable_capabilities = vec!["ray-query-position-fetch".into()];
        assert_eq!(
            disabled_capabilities(&config).unwrap(),
            vec![Capability::RayQueryPositionFetch]
        );

        config.disable_capabilities = vec!["mesh-shading".into()];
        let err = disabled_capabilities(&config).unwrap_err();
        assert!(format!("{err:#}").contains("unknown capability 'mesh-shading'"));
    }
}
