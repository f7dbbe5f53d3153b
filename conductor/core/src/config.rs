//! TOML Configuration File Support
//!
//! Persisted settings for the terminal client, stored at
//! `~/.config/gpterm/config.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller)
//! 2. Environment variables (`GPTERM_MODEL`, `GPTERM_TEMPERATURE`, `GPTERM_API_BASE`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! color_theme = "dark"
//! use_code_format = true
//! use_voice = false
//! voice_name = "Karen"
//! voice_stop = "period"
//! model = "chatgpt"
//! temperature = 0.75
//!
//! [models.local]
//! id = "mistral-7b-instruct"
//! context_tokens = 8192
//! api = "chat"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{ApiStyle, DEFAULT_API_BASE};
use crate::streaming::SpeechBoundary;

/// Tokens kept free below a model's context window
pub const CONTEXT_SAFETY_GAP: usize = 10;

/// Context window assumed for unknown models
pub const FALLBACK_CONTEXT_TOKENS: usize = 2048;

/// Default file holding the API key
pub const DEFAULT_API_KEY_PATH: &str = "~/.openai-api-key";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading or saving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to write config file
    #[error("Failed to write config file at {path}: {source}")]
    WriteError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// No API key in any of the supported places
    #[error("No API key found: pass --api-key, set {API_KEY_ENV}, or write it to {path}")]
    MissingApiKey {
        /// Key file that was checked
        path: PathBuf,
    },
}

// =============================================================================
// Setting Types
// =============================================================================

/// Terminal color theme
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    /// Light text on a dark background
    #[default]
    Dark,
    /// Dark text on a light background
    Light,
}

impl ThemeMode {
    /// The other theme
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }
}

impl FromStr for ThemeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            other => Err(format!("unknown theme '{other}' (expected dark or light)")),
        }
    }
}

impl std::fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where speech is cut into utterances, as written in the config file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStop {
    /// After every period or newline
    #[default]
    Period,
    /// After every newline
    Newline,
}

impl VoiceStop {
    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Period => "period",
            Self::Newline => "newline",
        }
    }
}

impl std::fmt::Display for VoiceStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<VoiceStop> for SpeechBoundary {
    fn from(stop: VoiceStop) -> Self {
        match stop {
            VoiceStop::Period => Self::Sentence,
            VoiceStop::Newline => Self::Line,
        }
    }
}

impl From<SpeechBoundary> for VoiceStop {
    fn from(boundary: SpeechBoundary) -> Self {
        match boundary {
            SpeechBoundary::Sentence => Self::Period,
            SpeechBoundary::Line => Self::Newline,
        }
    }
}

/// A model the client can talk to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Short name used in the config and `/model`
    #[serde(skip)]
    pub alias: String,
    /// Service model identifier
    pub id: String,
    /// Context window in tokens
    pub context_tokens: usize,
    /// Request shape
    #[serde(default)]
    pub api: ApiStyle,
}

impl ModelProfile {
    fn new(alias: &str, id: &str, context_tokens: usize, api: ApiStyle) -> Self {
        Self {
            alias: alias.to_string(),
            id: id.to_string(),
            context_tokens,
            api,
        }
    }

    /// Token ceiling for prompt plus response
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.context_tokens.saturating_sub(CONTEXT_SAFETY_GAP)
    }

    /// Built-in profile for `alias`, if there is one
    #[must_use]
    pub fn builtin(alias: &str) -> Option<Self> {
        let profile = match alias {
            "chatgpt" => Self::new(alias, "gpt-3.5-turbo", 4096, ApiStyle::Chat),
            "davinci" => Self::new(alias, "text-davinci-003", 4096, ApiStyle::Completions),
            "curie" => Self::new(alias, "text-curie-001", 2048, ApiStyle::Completions),
            "babbage" => Self::new(alias, "text-babbage-001", 2048, ApiStyle::Completions),
            "ada" => Self::new(alias, "text-ada-001", 2048, ApiStyle::Completions),
            _ => return None,
        };
        Some(profile)
    }

    /// Aliases of the built-in profiles
    #[must_use]
    pub fn builtin_aliases() -> &'static [&'static str] {
        &["chatgpt", "davinci", "curie", "babbage", "ada"]
    }

    /// Profile for a raw model id nobody described
    #[must_use]
    pub fn passthrough(id: &str) -> Self {
        Self::new(id, id, FALLBACK_CONTEXT_TOKENS, ApiStyle::Completions)
    }
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Persisted client settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GptermConfig {
    /// Color theme
    pub color_theme: ThemeMode,
    /// Ask the model to put code in fenced blocks and highlight it
    pub use_code_format: bool,
    /// Show advanced commands in `/help`
    pub display_advanced: bool,
    /// Speak responses
    pub use_voice: bool,
    /// Voice passed to the speech engine
    pub voice_name: String,
    /// Let the speech engine show the text instead of printing it
    pub voice_over: bool,
    /// Utterance boundary
    pub voice_stop: VoiceStop,
    /// Active model alias (or raw model id)
    pub model: String,
    /// Sampling temperature (0.0-1.0)
    pub temperature: f32,
    /// Service base URL
    pub api_base: String,
    /// Extra or overriding model profiles, keyed by alias
    pub models: BTreeMap<String, ModelProfile>,
}

impl Default for GptermConfig {
    fn default() -> Self {
        Self {
            color_theme: ThemeMode::Dark,
            use_code_format: false,
            display_advanced: false,
            use_voice: cfg!(target_os = "macos"),
            voice_name: "Karen".to_string(),
            voice_over: false,
            voice_stop: VoiceStop::Period,
            model: "chatgpt".to_string(),
            temperature: 0.75,
            api_base: DEFAULT_API_BASE.to_string(),
            models: BTreeMap::new(),
        }
    }
}

impl GptermConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a model alias: config table first, then built-ins, then raw id
    #[must_use]
    pub fn profile(&self, alias: &str) -> ModelProfile {
        if let Some(profile) = self.models.get(alias) {
            return ModelProfile {
                alias: alias.to_string(),
                ..profile.clone()
            };
        }
        ModelProfile::builtin(alias).unwrap_or_else(|| ModelProfile::passthrough(alias))
    }

    /// Profile of the active model
    #[must_use]
    pub fn active_profile(&self) -> ModelProfile {
        self.profile(&self.model)
    }

    /// Every alias that resolves to a described profile
    #[must_use]
    pub fn known_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = ModelProfile::builtin_aliases()
            .iter()
            .map(|a| (*a).to_string())
            .collect();
        for alias in self.models.keys() {
            if !aliases.contains(alias) {
                aliases.push(alias.clone());
            }
        }
        aliases
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "temperature must be between 0 and 1, got {}",
                self.temperature
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".to_string()));
        }
        if let Some((alias, _)) = self.models.iter().find(|(_, p)| p.context_tokens <= CONTEXT_SAFETY_GAP) {
            return Err(ConfigError::ValidationError(format!(
                "model '{alias}' has a context window smaller than {CONTEXT_SAFETY_GAP} tokens"
            )));
        }
        Ok(())
    }

    /// Write the configuration as pretty TOML, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/gpterm/config.toml` or the platform equivalent.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("gpterm").join("config.toml"))
}

/// Load configuration from a specific path plus environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed or
/// validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GptermConfig, ConfigError> {
    let mut config = read_config_file(path.as_deref())?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Parse the config file without environment overrides
fn read_config_file(path: Option<&Path>) -> Result<GptermConfig, ConfigError> {
    let Some(config_path) = path else {
        return Ok(GptermConfig::default());
    };

    if !config_path.exists() {
        tracing::debug!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return Ok(GptermConfig::default());
    }

    let toml_content = std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.to_path_buf(),
        source: e,
    })?;
    let config: GptermConfig = toml::from_str(&toml_content)?;

    tracing::debug!(
        path = %config_path.display(),
        model = %config.model,
        "Loaded configuration from file"
    );
    Ok(config)
}

/// Apply environment overrides read through `lookup`
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides<F>(config: &mut GptermConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(model) = lookup("GPTERM_MODEL").filter(|m| !m.trim().is_empty()) {
        config.model = model.trim().to_string();
    }
    if let Some(raw) = lookup("GPTERM_TEMPERATURE") {
        match raw.trim().parse::<f32>() {
            Ok(t) if (0.0..=1.0).contains(&t) => config.temperature = t,
            _ => tracing::warn!(value = %raw, "Ignoring invalid GPTERM_TEMPERATURE"),
        }
    }
    if let Some(base) = lookup("GPTERM_API_BASE").filter(|b| !b.trim().is_empty()) {
        config.api_base = base.trim().to_string();
    }
}

// =============================================================================
// API Key Resolution
// =============================================================================

/// Expand a leading `~` and any `$VAR` / `${VAR}` references
///
/// Unknown variables expand to nothing.
#[must_use]
pub fn expand_path(raw: &str) -> PathBuf {
    expand_path_with(raw, dirs::home_dir(), |key| std::env::var(key).ok())
}

fn expand_path_with<F>(raw: &str, home: Option<PathBuf>, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let mut expanded = String::with_capacity(raw.len());
    let mut rest = raw;

    if let Some(home) = home {
        if rest == "~" {
            return home;
        }
        if let Some(stripped) = rest.strip_prefix("~/") {
            expanded.push_str(&home.to_string_lossy());
            expanded.push('/');
            rest = stripped;
        }
    }

    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            expanded.push(c);
            continue;
        }

        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if braced && chars.peek() == Some(&'}') {
            chars.next();
        }

        if name.is_empty() {
            expanded.push('$');
        } else if let Some(value) = lookup(&name) {
            expanded.push_str(&value);
        }
    }

    PathBuf::from(expanded)
}

/// Find the API key: explicit value, then environment, then key file
///
/// # Errors
///
/// Returns [`ConfigError::MissingApiKey`] if no source yields a non-empty
/// key, or [`ConfigError::ReadError`] if the key file exists but cannot be
/// read.
pub fn resolve_api_key(
    explicit: Option<&str>,
    env_value: Option<String>,
    key_path: &Path,
) -> Result<String, ConfigError> {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    if let Some(key) = env_value.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    if key_path.exists() {
        let content = std::fs::read_to_string(key_path).map_err(|e| ConfigError::ReadError {
            path: key_path.to_path_buf(),
            source: e,
        })?;
        let key = content.trim();
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    Err(ConfigError::MissingApiKey {
        path: key_path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = GptermConfig::default();

        assert_eq!(config.model, "chatgpt");
        assert_eq!(config.voice_name, "Karen");
        assert_eq!(config.voice_stop, VoiceStop::Period);
        assert_eq!(config.color_theme, ThemeMode::Dark);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert!((config.temperature - 0.75).abs() < f32::EPSILON);
        assert_eq!(config.use_voice, cfg!(target_os = "macos"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("gpterm/config.toml"));
        }
    }

    // =========================================================================
    // Model Profile Tests
    // =========================================================================

    #[test]
    fn test_builtin_profiles() {
        let config = GptermConfig::default();

        let chat = config.profile("chatgpt");
        assert_eq!(chat.id, "gpt-3.5-turbo");
        assert_eq!(chat.api, ApiStyle::Chat);
        assert_eq!(chat.ceiling(), 4086);

        let ada = config.profile("ada");
        assert_eq!(ada.id, "text-ada-001");
        assert_eq!(ada.ceiling(), 2038);
    }

    #[test]
    fn test_unknown_alias_passes_through() {
        let profile = GptermConfig::default().profile("gpt-4o-mini");
        assert_eq!(profile.id, "gpt-4o-mini");
        assert_eq!(profile.context_tokens, FALLBACK_CONTEXT_TOKENS);
        assert_eq!(profile.api, ApiStyle::Completions);
    }

    #[test]
    fn test_config_table_overrides_builtin() {
        let mut config = GptermConfig::default();
        config.models.insert(
            "davinci".to_string(),
            ModelProfile::new("", "text-davinci-002", 4000, ApiStyle::Completions),
        );

        let profile = config.profile("davinci");
        assert_eq!(profile.alias, "davinci");
        assert_eq!(profile.id, "text-davinci-002");
        assert_eq!(profile.ceiling(), 3990);
    }

    #[test]
    fn test_voice_stop_maps_to_boundary() {
        assert_eq!(SpeechBoundary::from(VoiceStop::Period), SpeechBoundary::Sentence);
        assert_eq!(SpeechBoundary::from(VoiceStop::Newline), SpeechBoundary::Line);
        assert_eq!(VoiceStop::from(SpeechBoundary::Line), VoiceStop::Newline);
    }

    #[test]
    fn test_theme_parse() {
        assert_eq!("LIGHT".parse::<ThemeMode>(), Ok(ThemeMode::Light));
        assert_eq!(ThemeMode::Light.toggled(), ThemeMode::Dark);
        assert!("blue".parse::<ThemeMode>().is_err());
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_partial_toml() {
        let toml_content = r#"
color_theme = "light"
voice_stop = "newline"
model = "local"

[models.local]
id = "mistral-7b-instruct"
context_tokens = 8192
api = "chat"
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = read_config_file(Some(file.path())).unwrap();
        assert_eq!(config.color_theme, ThemeMode::Light);
        assert_eq!(config.voice_stop, VoiceStop::Newline);
        assert_eq!(config.voice_name, "Karen");

        let profile = config.active_profile();
        assert_eq!(profile.id, "mistral-7b-instruct");
        assert_eq!(profile.api, ApiStyle::Chat);
        assert!(config.known_aliases().contains(&"local".to_string()));
    }

    #[test]
    fn test_missing_file_graceful() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_config_file(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config, GptermConfig::default());
    }

    #[test]
    fn test_malformed_toml_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"model = [unclosed").unwrap();

        let result = read_config_file(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_reports_bad_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"color_theme = 7").unwrap();

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_out_of_range_temperature_rejected() {
        let config = GptermConfig {
            temperature: 1.5,
            ..GptermConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = GptermConfig {
            use_code_format: true,
            voice_over: true,
            model: "davinci".to_string(),
            temperature: 0.25,
            ..GptermConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = read_config_file(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    // =========================================================================
    // Environment Override Tests
    // =========================================================================

    #[test]
    fn test_env_overrides() {
        let mut config = GptermConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            "GPTERM_MODEL" => Some("ada".to_string()),
            "GPTERM_TEMPERATURE" => Some("0.2".to_string()),
            "GPTERM_API_BASE" => Some("http://localhost:8080/v1".to_string()),
            _ => None,
        });

        assert_eq!(config.model, "ada");
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.api_base, "http://localhost:8080/v1");
    }

    #[test]
    fn test_invalid_env_temperature_ignored() {
        let mut config = GptermConfig::default();
        apply_env_overrides(&mut config, |key| {
            (key == "GPTERM_TEMPERATURE").then(|| "hot".to_string())
        });
        assert!((config.temperature - 0.75).abs() < f32::EPSILON);

        apply_env_overrides(&mut config, no_env);
        assert_eq!(config, GptermConfig::default());
    }

    // =========================================================================
    // API Key Tests
    // =========================================================================

    #[test]
    fn test_expand_path() {
        let home = Some(PathBuf::from("/home/me"));
        let lookup = |key: &str| (key == "KEYS").then(|| "secrets".to_string());

        assert_eq!(
            expand_path_with("~/.openai-api-key", home.clone(), lookup),
            PathBuf::from("/home/me/.openai-api-key")
        );
        assert_eq!(
            expand_path_with("/etc/$KEYS/${KEYS}/key", home.clone(), lookup),
            PathBuf::from("/etc/secrets/secrets/key")
        );
        assert_eq!(
            expand_path_with("/tmp/$MISSING/key", home, lookup),
            PathBuf::from("/tmp//key")
        );
    }

    #[test]
    fn test_api_key_priority() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"sk-file\n").unwrap();

        let key = resolve_api_key(Some("sk-cli"), Some("sk-env".to_string()), file.path()).unwrap();
        assert_eq!(key, "sk-cli");

        let key = resolve_api_key(None, Some("sk-env".to_string()), file.path()).unwrap();
        assert_eq!(key, "sk-env");

        let key = resolve_api_key(Some("  "), None, file.path()).unwrap();
        assert_eq!(key, "sk-file");
    }

    #[test]
    fn test_missing_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_api_key(None, None, &dir.path().join("missing"));
        assert!(matches!(result, Err(ConfigError::MissingApiKey { .. })));
    }
}
