//! Interactive Shell
//!
//! Reads lines from stdin, dispatches commands, and submits everything else
//! to the orchestrator. Ctrl-C cancels the request or response in flight,
//! discards a `/block` being typed, or asks to confirm exit when idle.

use std::io::Stdout;
use std::path::PathBuf;
use std::sync::Arc;

use gpterm_core::{
    default_config_path, help_text, parse_line, CommandSpec, CompletionSource, ExchangeStatus,
    GptermConfig, InputLine, SessionSettings, ShellCommand, SpeechSink, StreamOrchestrator,
    CODE_FORMAT_DIRECTIVE,
};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::process::Command;

use crate::interrupt::Interrupts;
use crate::render::ConsoleRenderer;
use crate::speech::{list_voices, validate_voice, SaySpeech};

/// Line that ends a `/block` input
const BLOCK_TERMINATOR: &str = ".";

/// Shell failures that end the session
#[derive(Debug, Error)]
pub enum ShellError {
    /// Stdin could not be read
    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),

    /// The Ctrl-C handler could not be installed
    #[error("failed to listen for Ctrl-C: {0}")]
    Signal(std::io::Error),
}

/// Whether the loop keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

enum Input {
    Line(Option<String>),
    Interrupt,
}

/// The interactive session
pub struct Shell<S: CompletionSource> {
    conductor: StreamOrchestrator<S>,
    config: GptermConfig,
    config_path: Option<PathBuf>,
    console: ConsoleRenderer<Stdout>,
    speech: Arc<SaySpeech>,
    input: Lines<BufReader<Stdin>>,
    interrupts: Interrupts,
}

impl<S: CompletionSource> Shell<S> {
    /// Build a shell around an orchestrator and the loaded configuration
    ///
    /// Subscribes to Ctrl-C for the whole session.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Signal`] if the handler cannot be installed.
    pub fn new(
        conductor: StreamOrchestrator<S>,
        config: GptermConfig,
        config_path: Option<PathBuf>,
    ) -> Result<Self, ShellError> {
        let interrupts = Interrupts::listen().map_err(ShellError::Signal)?;
        let console = ConsoleRenderer::new(std::io::stdout(), config.color_theme);
        let speech = Arc::new(SaySpeech::new(
            config.voice_name.clone(),
            conductor.settings().voice_over,
        ));

        Ok(Self {
            conductor,
            config,
            config_path,
            console,
            speech,
            input: BufReader::new(tokio::io::stdin()).lines(),
            interrupts,
        })
    }

    /// Run until `/exit`, confirmed Ctrl-C, or end of input
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Input`] if stdin fails.
    pub async fn run(mut self) -> Result<(), ShellError> {
        self.console.banner();
        if self.conductor.settings().use_code_format {
            self.submit_directive().await;
        }

        loop {
            self.console.prompt(self.conductor.remaining_budget());

            let input = match self.interrupts.race(self.input.next_line()).await {
                Some(line) => Input::Line(line?),
                None => Input::Interrupt,
            };

            match input {
                Input::Line(None) => break,
                Input::Line(Some(line)) => {
                    if self.handle_line(&line).await? == Flow::Exit {
                        break;
                    }
                }
                Input::Interrupt => {
                    self.console.plain("\n");
                    if self.confirm_exit().await? {
                        break;
                    }
                }
            }
        }

        self.console.plain("\n");
        tracing::debug!("Shell exited");
        Ok(())
    }

    async fn confirm_exit(&mut self) -> Result<bool, ShellError> {
        self.console.plain("Exit GPTerm (y/n)? ");
        let Some(answer) = self.interrupts.race(self.input.next_line()).await else {
            return Ok(true);
        };
        Ok(answer?.map_or(true, |a| a.trim().eq_ignore_ascii_case("y")))
    }

    async fn handle_line(&mut self, line: &str) -> Result<Flow, ShellError> {
        match parse_line(line) {
            InputLine::Empty => {}
            InputLine::Usage(message) => self.console.info(&message),
            InputLine::Prompt(prompt) => self.submit_prompt(&prompt).await,
            InputLine::Command(command) => return self.handle_command(command).await,
        }
        Ok(Flow::Continue)
    }

    async fn handle_command(&mut self, command: ShellCommand) -> Result<Flow, ShellError> {
        tracing::debug!(?command, "Shell command");

        match command {
            ShellCommand::Help => {
                let settings = self.conductor.settings();
                let text = help_text(self.config.display_advanced, |spec| {
                    setting_value(&self.config, settings, spec)
                });
                self.console.info(&text);
            }
            ShellCommand::Exit => return Ok(Flow::Exit),
            ShellCommand::Save => self.save(),
            ShellCommand::Context => {
                let context = self.conductor.ledger().rendered_text();
                self.console.info(&format!("Context:\n{}", context.trim()));
            }
            ShellCommand::Reset => {
                self.conductor.reset();
                self.console.notice("Chat context reset");
                if self.conductor.settings().use_code_format {
                    self.submit_directive().await;
                }
            }
            ShellCommand::Block => {
                match self.read_block().await? {
                    Some(block) if !block.trim().is_empty() => self.submit_prompt(&block).await,
                    Some(_) => {}
                    None => {
                        self.console.plain("\n");
                        self.console.notice("block discarded");
                    }
                }
            }
            ShellCommand::Theme => {
                self.config.color_theme = self.config.color_theme.toggled();
                self.console.set_theme(self.config.color_theme);
                self.console.info(&format!("Color theme = {}", self.config.color_theme));
            }
            ShellCommand::Code => {
                let on = !self.conductor.settings().use_code_format;
                self.conductor.set_code_format(on);
                self.config.use_code_format = on;
                self.console.info(&format!("Code format = {}", on_off(on)));
                if on {
                    self.submit_directive().await;
                }
            }
            ShellCommand::Voice => {
                let on = self.conductor.toggle_voice();
                self.config.use_voice = on;
                self.console.info(&format!("Voice = {}", on_off(on)));
            }
            ShellCommand::Advanced => {
                self.config.display_advanced = !self.config.display_advanced;
                self.console.info(&format!(
                    "Display advanced commands = {}",
                    on_off(self.config.display_advanced)
                ));
            }
            ShellCommand::VoiceName(None) => {
                match list_voices().await {
                    Ok(voices) => self.console.plain(&voices),
                    Err(e) => self.console.error(&format!("cannot list voices: {e}")),
                }
                self.console.info("Command format: /voice-name <speaker_name>");
            }
            ShellCommand::VoiceName(Some(name)) => {
                if validate_voice(&name).await {
                    self.config.voice_name.clone_from(&name);
                    self.rebuild_speech();
                    self.console.info(&format!("Voice name = {name}"));
                } else {
                    self.console.error(&format!("unknown voice '{name}'"));
                }
            }
            ShellCommand::VoiceOver => {
                let on = self.conductor.toggle_voice_over();
                self.config.voice_over = on;
                self.rebuild_speech();
                self.console.info(&format!("voice over = {}", on_off(on)));
            }
            ShellCommand::VoiceStop => {
                let boundary = self.conductor.settings().speech_boundary.toggled();
                self.conductor.set_speech_boundary(boundary);
                self.config.voice_stop = boundary.into();
                self.console.info(&format!("voice stop = {}", self.config.voice_stop));
            }
            ShellCommand::Model(None) => {
                let aliases = self.config.known_aliases().join(", ");
                self.console.info(&format!(
                    "Command format: /model <alias or model id>\nKnown models: {aliases}"
                ));
            }
            ShellCommand::Model(Some(alias)) => {
                let profile = self.config.profile(&alias);
                let message = format!("Model = {} ({})", profile.alias, profile.id);
                self.config.model.clone_from(&profile.alias);
                self.conductor.set_model(profile);
                self.console.info(&message);
            }
            ShellCommand::Temperature(None) => {
                self.console
                    .info("Command format: /temperature <value between 0 and 1>");
            }
            ShellCommand::Temperature(Some(value)) => match self.conductor.set_temperature(value) {
                Ok(()) => {
                    self.config.temperature = value;
                    self.console.info(&format!("Temperature = {value}"));
                }
                Err(e) => self.console.error(&e.to_string()),
            },
            ShellCommand::Shell(command) => self.run_shell(&command).await,
        }

        Ok(Flow::Continue)
    }

    fn save(&mut self) {
        self.conductor.settings().store_into(&mut self.config);

        let Some(path) = self.config_path.clone().or_else(default_config_path) else {
            self.console.error("no configuration directory available");
            return;
        };

        match self.config.save(&path) {
            Ok(()) => self.console.info("Settings saved to disk"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to save settings");
                self.console.error(&e.to_string());
            }
        }
    }

    fn rebuild_speech(&mut self) {
        self.speech = Arc::new(SaySpeech::new(
            self.config.voice_name.clone(),
            self.conductor.settings().voice_over,
        ));
    }

    /// `None` when interrupted
    async fn read_block(&mut self) -> Result<Option<String>, ShellError> {
        self.console
            .info("Enter your block, end with a line containing only '.'");

        let mut lines = Vec::new();
        loop {
            let Some(line) = self.interrupts.race(self.input.next_line()).await else {
                return Ok(None);
            };
            match line? {
                Some(line) if line.trim() == BLOCK_TERMINATOR => break,
                Some(line) => lines.push(line),
                None => break,
            }
        }
        Ok(Some(lines.join("\n")))
    }

    async fn run_shell(&mut self, command: &str) {
        match Command::new("sh").arg("-c").arg(command).status().await {
            Ok(status) if !status.success() => {
                self.console.error(&format!("command exited with {status}"));
            }
            Ok(_) => self.console.plain("\n"),
            Err(e) => self.console.error(&format!("cannot run command: {e}")),
        }
    }

    async fn submit_directive(&mut self) {
        let directive = CODE_FORMAT_DIRECTIVE.trim_start();
        self.console.message(directive);
        self.submit_prompt(directive).await;
    }

    async fn submit_prompt(&mut self, prompt: &str) {
        let submission = match self.interrupts.race(self.conductor.submit(prompt)).await {
            Some(Ok(submission)) => submission,
            Some(Err(e)) => {
                self.console.error(&e.to_string());
                return;
            }
            None => {
                tracing::debug!("Interrupted while opening the request");
                self.console.plain("\n");
                self.console.notice("request aborted");
                return;
            }
        };

        if submission.context_reset {
            self.console.notice("reached max tokens. resetting chat context");
        }

        let abort = self.conductor.abort_handle();
        let speech: Arc<dyn SpeechSink> = self.speech.clone();
        let outcome = self
            .interrupts
            .guard(
                self.conductor
                    .drive(submission, &mut self.console, Some(speech)),
                &abort,
            )
            .await;

        tracing::debug!(
            status = ?outcome.status,
            fragments = outcome.fragments,
            spoken = outcome.speech.spoken,
            "Exchange finished"
        );

        match outcome.status {
            ExchangeStatus::Completed => {}
            ExchangeStatus::Aborted => self.console.notice("response aborted"),
            ExchangeStatus::Failed(message) => self.console.error(&message),
        }
        if let Some(failure) = outcome.speech.failure {
            self.console.error(&format!("speech stopped: {failure}"));
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Current value shown beside a command in `/help`
fn setting_value(
    config: &GptermConfig,
    settings: &SessionSettings,
    spec: &CommandSpec,
) -> Option<String> {
    let value = match spec.name {
        "/theme" => config.color_theme.to_string(),
        "/code" => on_off(settings.use_code_format).to_string(),
        "/voice" => on_off(settings.use_voice).to_string(),
        "/advanced" => on_off(config.display_advanced).to_string(),
        "/voice-name" => config.voice_name.clone(),
        "/voice-over" => on_off(settings.voice_over).to_string(),
        "/voice-stop" => gpterm_core::VoiceStop::from(settings.speech_boundary).to_string(),
        "/model" => settings.model.alias.clone(),
        "/temperature" => settings.temperature.to_string(),
        _ => return None,
    };
    Some(value)
}
