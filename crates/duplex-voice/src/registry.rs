//! Provider and connection registries.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::config::GatewayConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::providers::mock::{MockGeneration, MockRecognition, MockSynthesis};
use crate::providers::openai::{OpenAiGeneration, OpenAiRecognition, OpenAiSynthesis};
use crate::providers::{GenerationProvider, RecognitionProvider, SynthesisProvider};
use crate::session::ConnectionSession;

/// Live sessions, keyed by connection id.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<String, Arc<ConnectionSession>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<ConnectionSession>) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// The three pluggable pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Recognition,
    Synthesis,
    Generation,
}

impl FromStr for Capability {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recognition" => Ok(Capability::Recognition),
            "synthesis" => Ok(Capability::Synthesis),
            "generation" => Ok(Capability::Generation),
            other => Err(VoiceError::Protocol(format!(
                "unknown capability: {other}"
            ))),
        }
    }
}

type Factory<T> = Arc<dyn Fn(&GatewayConfig) -> VoiceResult<Arc<T>> + Send + Sync>;

struct Slot<T: ?Sized> {
    factories: HashMap<String, Factory<T>>,
    active: RwLock<Option<(String, Arc<T>)>>,
}

impl<T: ?Sized> Slot<T> {
    fn new() -> Self {
        Self {
            factories: HashMap::new(),
            active: RwLock::new(None),
        }
    }

    fn register(
        &mut self,
        name: &str,
        factory: impl Fn(&GatewayConfig) -> VoiceResult<Arc<T>> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    fn build(&self, name: &str, config: &GatewayConfig) -> VoiceResult<Arc<T>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| VoiceError::UnknownProvider(name.to_string()))?;
        factory(config)
    }

    fn activate(&self, name: &str, provider: Arc<T>) {
        if let Ok(mut active) = self.active.write() {
            *active = Some((name.to_string(), provider));
        }
    }

    fn get(&self, capability: &str) -> VoiceResult<Arc<T>> {
        self.active
            .read()
            .ok()
            .and_then(|a| a.as_ref().map(|(_, p)| Arc::clone(p)))
            .ok_or_else(|| {
                VoiceError::ProviderSetup(format!("no active {capability} provider"))
            })
    }

    fn active_name(&self) -> Option<String> {
        self.active
            .read()
            .ok()
            .and_then(|a| a.as_ref().map(|(n, _)| n.clone()))
    }
}

/// Factory registry for the pipeline stages.
///
/// Built-in providers are registered at construction; the configured names
/// are resolved and initialized once at startup via [`ProviderRegistry::initialize`].
/// Pipelines re-fetch the active provider per use, so a runtime swap takes
/// effect on the next operation without touching live sessions.
pub struct ProviderRegistry {
    config: Arc<GatewayConfig>,
    recognition: Slot<dyn RecognitionProvider>,
    synthesis: Slot<dyn SynthesisProvider>,
    generation: Slot<dyn GenerationProvider>,
}

impl ProviderRegistry {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        let mut registry = Self {
            config,
            recognition: Slot::new(),
            synthesis: Slot::new(),
            generation: Slot::new(),
        };
        registry.register_recognition("mock", |_| Ok(Arc::new(MockRecognition::new()) as _));
        registry.register_synthesis("mock", |_| Ok(Arc::new(MockSynthesis::new()) as _));
        registry.register_generation("mock", |_| Ok(Arc::new(MockGeneration::new()) as _));
        registry
            .register_recognition("openai", |cfg| Ok(Arc::new(OpenAiRecognition::from_env(cfg)?) as _));
        registry.register_synthesis("openai", |_| Ok(Arc::new(OpenAiSynthesis::from_env()?) as _));
        registry.register_generation("openai", |_| Ok(Arc::new(OpenAiGeneration::from_env()?) as _));
        registry
    }

    pub fn register_recognition(
        &mut self,
        name: &str,
        factory: impl Fn(&GatewayConfig) -> VoiceResult<Arc<dyn RecognitionProvider>> + Send + Sync + 'static,
    ) {
        self.recognition.register(name, factory);
    }

    pub fn register_synthesis(
        &mut self,
        name: &str,
        factory: impl Fn(&GatewayConfig) -> VoiceResult<Arc<dyn SynthesisProvider>> + Send + Sync + 'static,
    ) {
        self.synthesis.register(name, factory);
    }

    pub fn register_generation(
        &mut self,
        name: &str,
        factory: impl Fn(&GatewayConfig) -> VoiceResult<Arc<dyn GenerationProvider>> + Send + Sync + 'static,
    ) {
        self.generation.register(name, factory);
    }

    /// Resolve and activate a provider without running its initialize hook.
    /// Used by tests and by callers that initialize separately.
    pub fn set_active_recognition(&self, name: &str) -> VoiceResult<()> {
        let provider = self.recognition.build(name, &self.config)?;
        self.recognition.activate(name, provider);
        Ok(())
    }

    pub fn set_active_synthesis(&self, name: &str) -> VoiceResult<()> {
        let provider = self.synthesis.build(name, &self.config)?;
        self.synthesis.activate(name, provider);
        Ok(())
    }

    pub fn set_active_generation(&self, name: &str) -> VoiceResult<()> {
        let provider = self.generation.build(name, &self.config)?;
        self.generation.activate(name, provider);
        Ok(())
    }

    /// Resolve the configured provider names and run their initialize hooks.
    pub async fn initialize(&self) -> VoiceResult<()> {
        let cfg = Arc::clone(&self.config);

        let recognition = self.recognition.build(&cfg.recognition_provider, &cfg)?;
        recognition.initialize(&cfg).await?;
        self.recognition.activate(&cfg.recognition_provider, recognition);

        let synthesis = self.synthesis.build(&cfg.synthesis_provider, &cfg)?;
        synthesis.initialize(&cfg).await?;
        self.synthesis.activate(&cfg.synthesis_provider, synthesis);

        let generation = self.generation.build(&cfg.generation_provider, &cfg)?;
        generation.initialize(&cfg).await?;
        self.generation.activate(&cfg.generation_provider, generation);

        tracing::info!(
            recognition = %cfg.recognition_provider,
            synthesis = %cfg.synthesis_provider,
            generation = %cfg.generation_provider,
            "providers initialized"
        );
        Ok(())
    }

    /// Swap the active provider for one capability at runtime.
    pub async fn change_provider(&self, capability: Capability, name: &str) -> VoiceResult<()> {
        match capability {
            Capability::Recognition => {
                let provider = self.recognition.build(name, &self.config)?;
                provider.initialize(&self.config).await?;
                self.recognition.activate(name, provider);
            }
            Capability::Synthesis => {
                let provider = self.synthesis.build(name, &self.config)?;
                provider.initialize(&self.config).await?;
                self.synthesis.activate(name, provider);
            }
            Capability::Generation => {
                let provider = self.generation.build(name, &self.config)?;
                provider.initialize(&self.config).await?;
                self.generation.activate(name, provider);
            }
        }
        tracing::info!(?capability, provider = name, "active provider changed");
        Ok(())
    }

    pub fn recognition(&self) -> VoiceResult<Arc<dyn RecognitionProvider>> {
        self.recognition.get("recognition")
    }

    pub fn synthesis(&self) -> VoiceResult<Arc<dyn SynthesisProvider>> {
        self.synthesis.get("synthesis")
    }

    pub fn generation(&self) -> VoiceResult<Arc<dyn GenerationProvider>> {
        self.generation.get("generation")
    }

    /// Active provider names as (recognition, synthesis, generation).
    pub fn active_names(&self) -> (Option<String>, Option<String>, Option<String>) {
        (
            self.recognition.active_name(),
            self.synthesis.active_name(),
            self.generation.active_name(),
        )
    }

    /// Convenience for tests and embedding: mock providers everywhere.
    pub fn with_mocks(config: Arc<GatewayConfig>) -> VoiceResult<Self> {
        let registry = Self::new(config);
        registry.set_active_recognition("mock")?;
        registry.set_active_synthesis("mock")?;
        registry.set_active_generation("mock")?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    #[test]
    fn unknown_provider_name_is_rejected() {
        let registry = ProviderRegistry::new(Arc::new(GatewayConfig::default()));
        assert!(matches!(
            registry.set_active_generation("no-such-provider"),
            Err(VoiceError::UnknownProvider(_))
        ));
    }

    #[test]
    fn getters_fail_before_activation() {
        let registry = ProviderRegistry::new(Arc::new(GatewayConfig::default()));
        assert!(registry.generation().is_err());
        registry.set_active_generation("mock").unwrap();
        assert!(registry.generation().is_ok());
    }

    #[tokio::test]
    async fn initialize_activates_configured_defaults() {
        let registry = ProviderRegistry::new(Arc::new(GatewayConfig::default()));
        tokio_test::assert_ok!(registry.initialize().await);
        let (rec, syn, gen) = registry.active_names();
        assert_eq!(rec.as_deref(), Some("mock"));
        assert_eq!(syn.as_deref(), Some("mock"));
        assert_eq!(gen.as_deref(), Some("mock"));
    }

    #[test]
    fn capability_parses_from_str() {
        assert_eq!("recognition".parse::<Capability>().unwrap(), Capability::Recognition);
        assert!("telepathy".parse::<Capability>().is_err());
    }

    #[test]
    fn connection_registry_tracks_sessions() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new("c1", Arc::new(GatewayConfig::default()), tx);
        registry.add(session);
        assert_eq!(registry.count(), 1);
        registry.remove("c1");
        assert_eq!(registry.count(), 0);
    }
}
