use effects::{
    BlueNoiseProvider, ChainStage, EffectConfigurable, EffectDevice, EffectError, EffectWipe,
    FramebufferProvider, UniformProvider, CHAIN,
};
use serde::Serialize;
use shaderbank::{ShaderModuleRegistry, Subscribed};

/// Whether one chain shader produced a working pipeline pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub shader: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineStatus {
    fn from_result<T>(shader: &str, result: &Result<T, EffectError>) -> Self {
        Self {
            shader: shader.to_string(),
            error: result.as_ref().err().map(|err| err.to_string()),
        }
    }
}

/// Every chain effect that built, subscribed to the registry so reloads
/// rebuild their pipelines.
pub struct EffectSet<D: EffectDevice + 'static> {
    configurable: Vec<Subscribed<EffectConfigurable<D>>>,
    wipe: Option<Subscribed<EffectWipe<D>>>,
    statuses: Vec<PipelineStatus>,
}

impl<D: EffectDevice + 'static> EffectSet<D> {
    /// Builds each chain stage in order. A stage that fails is recorded and
    /// left out; the rest still build.
    pub fn build(
        registry: &ShaderModuleRegistry<D>,
        framebuffers: &dyn FramebufferProvider<D>,
        uniform: &dyn UniformProvider<D>,
        blue_noise: &dyn BlueNoiseProvider<D>,
        wipe_enabled: bool,
    ) -> Self {
        let mut set = Self {
            configurable: Vec::new(),
            wipe: None,
            statuses: Vec::with_capacity(CHAIN.len()),
        };

        for stage in &CHAIN {
            match stage {
                ChainStage::Effect { descriptor, .. } => {
                    let result = EffectConfigurable::with_standard_layouts(
                        registry,
                        descriptor.clone(),
                        framebuffers.bind_group_layout(),
                        uniform.bind_group_layout(),
                    );
                    set.record(stage, &result);
                    if let Ok(effect) = result {
                        set.configurable.push(registry.register(effect));
                    }
                }
                ChainStage::Wipe => {
                    let result =
                        EffectWipe::new(registry, framebuffers, uniform, blue_noise, wipe_enabled);
                    set.record(stage, &result);
                    set.wipe = result.ok().map(|wipe| registry.register(wipe));
                }
            }
        }
        set
    }

    fn record<T>(&mut self, stage: &ChainStage, result: &Result<T, EffectError>) {
        let status = PipelineStatus::from_result(stage.shader(), result);
        match &status.error {
            Some(error) => {
                tracing::warn!(shader = %status.shader, %error, "effect pipeline failed to build")
            }
            None => tracing::debug!(shader = %status.shader, "effect pipeline built"),
        }
        self.statuses.push(status);
    }

    pub fn statuses(&self) -> &[PipelineStatus] {
        &self.statuses
    }

    pub fn failures(&self) -> usize {
        self.statuses
            .iter()
            .filter(|status| status.error.is_some())
            .count()
    }

    /// Built effects currently holding pipelines. A failed reload leaves
    /// the effect it stopped at without them.
    pub fn with_pipelines(&self) -> usize {
        let configurable = self
            .configurable
            .iter()
            .filter(|effect| effect.borrow().base().has_pipelines())
            .count();
        let wipe = self
            .wipe
            .as_ref()
            .is_some_and(|wipe| wipe.borrow().base().has_pipelines());
        configurable + usize::from(wipe)
    }
}
