//! Gateway configuration.
//!
//! Values are resolved in three layers: built-in defaults, an optional TOML
//! file, then environment variables prefixed with `DUPLEX` (double underscore
//! as the separator, e.g. `DUPLEX__PORT=9000`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{VoiceError, VoiceResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Name reported in status payloads
    pub app_name: String,
    /// TCP port the gateway listens on
    pub port: u16,
    /// System prompt pinned at the head of every conversation
    pub system_prompt: String,
    /// Maximum retained user/assistant turns (system prompt excluded)
    pub max_history: usize,
    /// Mean-amplitude threshold above which a frame counts as speech (0.0..1.0)
    pub vad_threshold: f32,
    /// Expected sample rate of inbound PCM16 mono audio
    pub input_sample_rate: u32,
    /// Seconds between heartbeat pings
    pub heartbeat_interval_secs: u64,
    /// Consecutive missed pongs before a connection is torn down
    pub heartbeat_max_misses: u32,
    /// Budget for a recognizer session to start
    pub recognizer_start_timeout_secs: u64,
    /// Budget for a recognizer session to stop before it is forcibly released
    pub recognizer_stop_timeout_secs: u64,
    /// Budget for synthesizing a single sentence
    pub synthesis_timeout_secs: u64,
    /// Active provider names, resolved against the registry at startup
    pub recognition_provider: String,
    pub synthesis_provider: String,
    pub generation_provider: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            app_name: "duplex-gateway".to_string(),
            port: 8010,
            system_prompt: "You are a helpful voice assistant. Keep replies short \
                            and conversational; they will be spoken aloud."
                .to_string(),
            max_history: 20,
            vad_threshold: 0.02,
            input_sample_rate: 16_000,
            heartbeat_interval_secs: 30,
            heartbeat_max_misses: 2,
            recognizer_start_timeout_secs: 5,
            recognizer_stop_timeout_secs: 3,
            synthesis_timeout_secs: 10,
            recognition_provider: "mock".to_string(),
            synthesis_provider: "mock".to_string(),
            generation_provider: "mock".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from defaults, an optional TOML file, and the environment.
    pub fn load() -> VoiceResult<Self> {
        let defaults = GatewayConfig::default();
        let file_path =
            std::env::var("DUPLEX_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());

        let built = Config::builder()
            .set_default("app_name", defaults.app_name.clone())
            .and_then(|b| b.set_default("port", defaults.port))
            .and_then(|b| b.set_default("system_prompt", defaults.system_prompt.clone()))
            .and_then(|b| b.set_default("max_history", defaults.max_history as u64))
            .and_then(|b| b.set_default("vad_threshold", defaults.vad_threshold as f64))
            .and_then(|b| b.set_default("input_sample_rate", defaults.input_sample_rate))
            .and_then(|b| b.set_default("heartbeat_interval_secs", defaults.heartbeat_interval_secs))
            .and_then(|b| b.set_default("heartbeat_max_misses", defaults.heartbeat_max_misses))
            .and_then(|b| {
                b.set_default(
                    "recognizer_start_timeout_secs",
                    defaults.recognizer_start_timeout_secs,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "recognizer_stop_timeout_secs",
                    defaults.recognizer_stop_timeout_secs,
                )
            })
            .and_then(|b| b.set_default("synthesis_timeout_secs", defaults.synthesis_timeout_secs))
            .and_then(|b| {
                b.set_default("recognition_provider", defaults.recognition_provider.clone())
            })
            .and_then(|b| b.set_default("synthesis_provider", defaults.synthesis_provider.clone()))
            .and_then(|b| {
                b.set_default("generation_provider", defaults.generation_provider.clone())
            })
            .map_err(|e| VoiceError::Config(e.to_string()))?
            .add_source(File::with_name(&file_path).required(false))
            .add_source(Environment::with_prefix("DUPLEX").separator("__"))
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;

        let cfg: GatewayConfig = built
            .try_deserialize()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> VoiceResult<()> {
        if self.max_history == 0 {
            return Err(VoiceError::Config("max_history must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(VoiceError::Config(
                "vad_threshold must be within 0.0..=1.0".into(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(VoiceError::Config(
                "heartbeat_interval_secs must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = GatewayConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.port, 8010);
        assert_eq!(cfg.max_history, 20);
        assert_eq!(cfg.recognition_provider, "mock");
    }

    #[test]
    fn rejects_out_of_range_vad_threshold() {
        let cfg = GatewayConfig {
            vad_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(VoiceError::Config(_))));
    }
}
