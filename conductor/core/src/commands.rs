//! Shell Command Model
//!
//! Parses an input line into a [`ShellCommand`] or a prompt. Each command is
//! a tagged variant with its own handler on the surface side; the static
//! [`COMMANDS`] table carries the help metadata.
//!
//! # Parsing Rules
//!
//! - A line starting with `!` is a shell passthrough.
//! - A line starting with a known `/word` is a command.
//! - Commands without an argument reject extra words with a usage hint.
//! - Anything else, unknown `/words` included, is a prompt.

/// Help metadata for one command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command word, including the slash
    pub name: &'static str,
    /// Only listed when advanced commands are displayed
    pub advanced: bool,
    /// Accepts an argument
    pub takes_arg: bool,
    /// One-line description for `/help`
    pub description: &'static str,
}

const fn spec(
    name: &'static str,
    advanced: bool,
    takes_arg: bool,
    description: &'static str,
) -> CommandSpec {
    CommandSpec {
        name,
        advanced,
        takes_arg,
        description,
    }
}

/// Every command, in help order
pub static COMMANDS: &[CommandSpec] = &[
    spec("/help", false, false, "List available commands"),
    spec("/exit", false, false, "Exit GPTerm"),
    spec("/save", false, false, "Save current settings"),
    spec("/context", false, false, "Print the current chat context (conversation) to screen"),
    spec("/reset", false, false, "Reset the chat context"),
    spec("/block", false, false, "Enter a multi-line input"),
    spec("/theme", false, false, "Toggle color theme to match background: light or dark"),
    spec("/code", false, false, "Toggle code format on/off (toggling will reset context)"),
    spec("/voice", false, false, "Toggle voice on/off"),
    spec("/advanced", false, false, "Toggle display of advanced commands"),
    spec("/voice-name", true, true, "Set the voice to be used"),
    spec("/voice-over", true, false, "Toggle voice over highlighting"),
    spec("/voice-stop", true, false, "Toggle voice stop: period or newline"),
    spec("/model", true, true, "Set the model by alias or raw model id"),
    spec(
        "/temperature",
        true,
        true,
        "Provide a value between 0 and 1. Higher for more creative responses. Lower for more standard.",
    ),
];

/// Alternate spelling of `/exit`
const EXIT_ALIAS: &str = "/abort";

/// A parsed shell command
#[derive(Clone, Debug, PartialEq)]
pub enum ShellCommand {
    /// List commands and settings
    Help,
    /// Leave the shell
    Exit,
    /// Persist settings
    Save,
    /// Print the rendered transcript
    Context,
    /// Clear the conversation
    Reset,
    /// Read a multi-line prompt
    Block,
    /// Toggle dark/light theme
    Theme,
    /// Toggle code format
    Code,
    /// Toggle speech
    Voice,
    /// Toggle advanced commands in help
    Advanced,
    /// Set the voice, or list voices when `None`
    VoiceName(Option<String>),
    /// Toggle voice-over mode
    VoiceOver,
    /// Toggle period/newline speech boundary
    VoiceStop,
    /// Set the model, or show usage when `None`
    Model(Option<String>),
    /// Set the temperature; `None` if missing or out of range
    Temperature(Option<f32>),
    /// Run a shell command
    Shell(String),
}

impl ShellCommand {
    /// Help metadata; `None` for shell passthrough
    #[must_use]
    pub fn spec(&self) -> Option<&'static CommandSpec> {
        let name = match self {
            Self::Help => "/help",
            Self::Exit => "/exit",
            Self::Save => "/save",
            Self::Context => "/context",
            Self::Reset => "/reset",
            Self::Block => "/block",
            Self::Theme => "/theme",
            Self::Code => "/code",
            Self::Voice => "/voice",
            Self::Advanced => "/advanced",
            Self::VoiceName(_) => "/voice-name",
            Self::VoiceOver => "/voice-over",
            Self::VoiceStop => "/voice-stop",
            Self::Model(_) => "/model",
            Self::Temperature(_) => "/temperature",
            Self::Shell(_) => return None,
        };
        find_spec(name)
    }
}

/// What an input line turned out to be
#[derive(Clone, Debug, PartialEq)]
pub enum InputLine {
    /// Blank line
    Empty,
    /// A command to run
    Command(ShellCommand),
    /// A known command used with the wrong shape
    Usage(String),
    /// Text to send to the model
    Prompt(String),
}

/// Look up a command by its word
#[must_use]
pub fn find_spec(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name == name)
}

/// Classify one line of input
#[must_use]
pub fn parse_line(line: &str) -> InputLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return InputLine::Empty;
    }

    if let Some(shell) = trimmed.strip_prefix('!') {
        let shell = shell.trim();
        if shell.is_empty() {
            return InputLine::Usage("Command format: !<shell command>".to_string());
        }
        return InputLine::Command(ShellCommand::Shell(shell.to_string()));
    }

    if !trimmed.starts_with('/') {
        return InputLine::Prompt(line.to_string());
    }

    let (word, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (trimmed, ""),
    };
    let word = if word == EXIT_ALIAS { "/exit" } else { word };

    let Some(spec) = find_spec(word) else {
        return InputLine::Prompt(line.to_string());
    };

    if !spec.takes_arg && !rest.is_empty() {
        return InputLine::Usage(format!("Command format: {}", spec.name));
    }

    let arg = (!rest.is_empty()).then(|| rest.to_string());
    let command = match spec.name {
        "/help" => ShellCommand::Help,
        "/exit" => ShellCommand::Exit,
        "/save" => ShellCommand::Save,
        "/context" => ShellCommand::Context,
        "/reset" => ShellCommand::Reset,
        "/block" => ShellCommand::Block,
        "/theme" => ShellCommand::Theme,
        "/code" => ShellCommand::Code,
        "/voice" => ShellCommand::Voice,
        "/advanced" => ShellCommand::Advanced,
        "/voice-name" => ShellCommand::VoiceName(arg),
        "/voice-over" => ShellCommand::VoiceOver,
        "/voice-stop" => ShellCommand::VoiceStop,
        "/model" => ShellCommand::Model(arg.filter(|a| !a.contains(char::is_whitespace))),
        "/temperature" => ShellCommand::Temperature(parse_temperature(rest)),
        _ => return InputLine::Prompt(line.to_string()),
    };

    InputLine::Command(command)
}

fn parse_temperature(raw: &str) -> Option<f32> {
    raw.parse::<f32>()
        .ok()
        .filter(|t| (0.0..=1.0).contains(t))
}

/// Render the `/help` listing
///
/// `value_of` supplies the current setting shown next to a command, if any.
#[must_use]
pub fn help_text<F>(advanced: bool, value_of: F) -> String
where
    F: Fn(&CommandSpec) -> Option<String>,
{
    let listed: Vec<&CommandSpec> = COMMANDS.iter().filter(|c| advanced || !c.advanced).collect();
    let width = listed.iter().map(|c| c.name.len()).max().unwrap_or(0) + 1;

    let mut out = String::from("GPTerm commands:\n");
    for command in listed {
        let state = value_of(command).map(|v| format!("= {v}")).unwrap_or_default();
        out.push_str(&format!(
            "{:<width$} {:<14} # {}\n",
            command.name, state, command.description
        ));
    }

    if advanced {
        out.push_str(&format!("{:<width$} {:<14} # Run a shell command\n", "!<cmd>", ""));
        out.push_str(&format!(
            "{:<width$} {:<14} # Exit GPTerm or abort a response\n",
            "ctrl+c", ""
        ));
    }

    out.trim_end().to_string()
}
