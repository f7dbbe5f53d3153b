//! Session Settings
//!
//! The explicit session context handed to the orchestrator. Everything the
//! exchange pipeline needs to know about the user's current choices lives
//! here; nothing is read from globals.
//!
//! # Design Philosophy
//!
//! Settings are built once from [`GptermConfig`] and afterwards only change
//! through orchestrator methods, so a change (new model, code format on) is
//! always paired with its consequence (new ceiling, ledger reset).

use crate::config::{GptermConfig, ModelProfile};
use crate::streaming::SpeechBoundary;

/// Per-session choices that shape every exchange
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    /// Active model
    pub model: ModelProfile,
    /// Sampling temperature (0.0-1.0)
    pub temperature: f32,
    /// Where speech is cut into utterances
    pub speech_boundary: SpeechBoundary,
    /// Speak responses
    pub use_voice: bool,
    /// Speech engine shows the text, console skips prose
    pub voice_over: bool,
    /// Code-format directive is part of the conversation
    pub use_code_format: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&GptermConfig::default())
    }
}

impl SessionSettings {
    /// Build the session context from loaded configuration
    #[must_use]
    pub fn from_config(config: &GptermConfig) -> Self {
        Self {
            model: config.active_profile(),
            temperature: config.temperature.clamp(0.0, 1.0),
            speech_boundary: config.voice_stop.into(),
            use_voice: config.use_voice,
            voice_over: config.voice_over,
            use_code_format: config.use_code_format,
        }
    }

    /// Token ceiling of the active model
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.model.ceiling()
    }

    /// Write the session's choices back into `config` for saving
    pub fn store_into(&self, config: &mut GptermConfig) {
        config.model.clone_from(&self.model.alias);
        config.temperature = self.temperature;
        config.voice_stop = self.speech_boundary.into();
        config.use_voice = self.use_voice;
        config.voice_over = self.voice_over;
        config.use_code_format = self.use_code_format;
    }
}
