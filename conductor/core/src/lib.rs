//! GPTerm Core - Headless Streaming Exchange Engine
//!
//! This crate provides the conversation and streaming logic for gpterm,
//! completely independent of any terminal. It can drive the interactive
//! shell, a scripted harness, or tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Terminal Surface                          │
//! │   ┌────────────┐   ┌──────────────┐   ┌──────────────────────┐   │
//! │   │   Shell    │   │ ConsoleRender │   │  `say` SpeechSink    │   │
//! │   │ (commands) │   │  (syntect)    │   │ (tokio::process)     │   │
//! │   └─────┬──────┘   └──────▲───────┘   └──────────▲───────────┘   │
//! └─────────┼─────────────────┼──────────────────────┼───────────────┘
//!           │ prompt          │ Segment              │ Segment
//! ┌─────────┼─────────────────┼──────────────────────┼───────────────┐
//! │         ▼           GPTERM CORE                  │               │
//! │  ┌─────────────────────────────────────────────────────────────┐ │
//! │  │                   StreamOrchestrator                         │ │
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐ │ │
//! │  │  │ Conversation │  │   Response   │  │ CompletionSource   │ │ │
//! │  │  │    Ledger    │  │  Classifier  │  │     (OpenAI)       │ │ │
//! │  │  └──────────────┘  └──────────────┘  └────────────────────┘ │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamOrchestrator`]: Runs prompt/response exchanges
//! - [`ConversationLedger`]: Transcript and token budget
//! - [`ResponseStreamClassifier`]: Fragment-to-segment state machine
//! - [`CompletionSource`]: Remote completion service abstraction
//! - [`RenderSink`] / [`SpeechSink`]: Output consumers
//! - [`GptermConfig`] / [`SessionSettings`]: Persisted and live settings
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use gpterm_core::{
//!     backend::OpenAiBackend, CollectingSink, GptermConfig, SessionSettings, StreamOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GptermConfig::default();
//!     let backend = OpenAiBackend::new(&config.api_base, std::env::var("OPENAI_API_KEY")?)?;
//!     let mut conductor = StreamOrchestrator::new(backend, SessionSettings::from_config(&config));
//!
//!     let mut render = CollectingSink::new();
//!     let outcome = conductor.exchange("Tell me a joke", &mut render, None).await?;
//!     println!("{}", outcome.response);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Completion source trait and the OpenAI backend
//! - [`commands`]: Shell command parsing and help metadata
//! - [`conductor`]: The stream orchestrator
//! - [`config`]: TOML configuration, model profiles, API key lookup
//! - [`estimator`]: Pluggable token estimation
//! - [`ledger`]: Conversation transcript and budget
//! - [`session`]: Live session settings
//! - [`sinks`]: Render and speech sink traits
//! - [`streaming`]: Response classifier and speech queue
//!
//! # No Terminal Dependencies
//!
//! This crate has **zero** dependencies on crossterm, syntect, or any other
//! terminal library. It's pure logic that can be used anywhere.

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod commands;
pub mod conductor;
pub mod config;
pub mod estimator;
pub mod ledger;
pub mod session;
pub mod sinks;
pub mod streaming;

// Re-exports for convenience
pub use backend::{
    ApiStyle, CompletionRequest, CompletionSource, FragmentStream, OpenAiBackend, StreamingToken,
};
pub use commands::{help_text, parse_line, CommandSpec, InputLine, ShellCommand, COMMANDS};
pub use conductor::{
    AbortHandle, ConductorError, ExchangeOutcome, ExchangeStatus, StreamOrchestrator, Submission,
    CODE_FORMAT_DIRECTIVE, STREAM_ENDED_UNEXPECTEDLY,
};
pub use estimator::{CharRatioEstimator, TokenEstimator};
pub use ledger::{ConversationLedger, MessageRole, TranscriptEntry};
pub use session::SessionSettings;
pub use sinks::{CollectingSink, CollectingSpeech, RenderSink, SpeechError, SpeechSink};
pub use streaming::{
    ClassifierState, ResponseStreamClassifier, Segment, SegmentKind, SpeechBoundary, SpeechQueue,
    SpeechReport,
};

// Config exports
pub use config::{
    default_config_path, load_config_from_path, ConfigError, GptermConfig,
    ModelProfile, ThemeMode, VoiceStop,
};
