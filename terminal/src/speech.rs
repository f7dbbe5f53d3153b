//! Speech through the macOS `say` command
//!
//! Each speech segment becomes one `say` invocation, awaited to completion so
//! utterances never overlap. Arguments are passed directly to the process,
//! never through a shell.

use async_trait::async_trait;
use gpterm_core::{Segment, SpeechError, SpeechSink};
use tokio::process::Command;

const SAY: &str = "say";

/// Speaks segments with `say -v <voice>`
#[derive(Clone, Debug)]
pub struct SaySpeech {
    voice: String,
    voice_over: bool,
}

impl SaySpeech {
    /// Create a sink for `voice`; `voice_over` makes `say` echo the text
    pub fn new(voice: impl Into<String>, voice_over: bool) -> Self {
        Self {
            voice: voice.into(),
            voice_over,
        }
    }
}

/// Build the `say` argument list for one utterance
///
/// Returns `None` when there is nothing to say.
pub fn say_args(voice: &str, voice_over: bool, text: &str) -> Option<Vec<String>> {
    let cleaned = text.replace('`', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    let mut args = Vec::with_capacity(4);
    if voice_over {
        args.push("-i".to_string());
    }
    args.push("-v".to_string());
    args.push(voice.to_string());
    // Text starting with '-' would be read as a flag
    if cleaned.starts_with('-') {
        args.push(format!("\\{cleaned}"));
    } else {
        args.push(cleaned.to_string());
    }
    Some(args)
}

#[async_trait]
impl SpeechSink for SaySpeech {
    async fn speak(&self, segment: &Segment) -> Result<(), SpeechError> {
        let Some(args) = say_args(&self.voice, self.voice_over, &segment.text) else {
            return Ok(());
        };

        tracing::trace!(voice = %self.voice, text = %segment.text, "Speaking");
        let status = Command::new(SAY).args(&args).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(SpeechError::Exit {
                status: status.to_string(),
            })
        }
    }
}

/// List the voices `say` knows about
///
/// # Errors
///
/// Fails if `say` cannot be run.
pub async fn list_voices() -> std::io::Result<String> {
    let output = Command::new(SAY).args(["-v", "?"]).output().await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether `say` accepts `name` as a voice
pub async fn validate_voice(name: &str) -> bool {
    match Command::new(SAY).args(["-v", name, ""]).output().await {
        Ok(output) => output.status.success() && output.stderr.is_empty(),
        Err(e) => {
            tracing::debug!(error = %e, "Could not run say");
            false
        }
    }
}
