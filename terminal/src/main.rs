//! GPTerm - Interact with OpenAI completion models from the terminal
//!
//! Streams responses as they arrive, highlights code blocks, and speaks
//! prose sentence by sentence through `say`.
//!
//! # Usage
//!
//! ```bash
//! # Key from the environment
//! OPENAI_API_KEY=sk-... gpterm
//!
//! # Key from a file, light terminal
//! gpterm --api-key-path ~/.keys/openai --theme light
//!
//! # Verbose logging to stderr
//! gpterm --debug 2> gpterm.log
//! ```

mod interrupt;
mod render;
mod shell;
mod speech;
mod theme;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gpterm_core::config::{expand_path, resolve_api_key, DEFAULT_API_KEY_PATH};
use gpterm_core::{
    default_config_path, load_config_from_path, GptermConfig, OpenAiBackend, SessionSettings,
    StreamOrchestrator, ThemeMode,
};
use tracing::{debug, error};

use shell::Shell;

/// GPTerm - chat with a GPT model from the terminal
#[derive(Parser, Debug)]
#[command(name = "gpterm")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// File holding the OpenAI API key
    #[arg(long, value_name = "PATH", default_value = DEFAULT_API_KEY_PATH)]
    api_key_path: String,

    /// Color theme matching the terminal background (light or dark)
    #[arg(long)]
    theme: Option<ThemeMode>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "GPTERM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("gpterm={level},gpterm_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = match load_config_from_path(config_path.clone()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration, using defaults");
            eprintln!("gpterm: {e}; using default settings");
            GptermConfig::default()
        }
    };
    if let Some(theme) = args.theme {
        config.color_theme = theme;
    }

    let key_path = expand_path(&args.api_key_path);
    let api_key = resolve_api_key(args.api_key.as_deref(), None, &key_path)
        .context("No OpenAI API key found (use --api-key, OPENAI_API_KEY or --api-key-path)")?;

    let backend = OpenAiBackend::new(&config.api_base, api_key)?;
    let settings = SessionSettings::from_config(&config);
    debug!(
        model = %settings.model.id,
        ceiling = settings.ceiling(),
        api_base = %config.api_base,
        "Starting session"
    );

    let conductor = StreamOrchestrator::new(backend, settings);
    Shell::new(conductor, config, config_path)?.run().await?;
    Ok(())
}
