//! Local playback through an external command.
//!
//! The command is run with `sh -c` and receives the WAV bytes on stdin,
//! e.g. `aplay -q` or `paplay`. Its exit status is reported to the caller,
//! which logs it; playback failures never reach the bus.

use crate::{Result, WavenetError};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayCommand {
    command: String,
}

impl PlayCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Pipe `wav` into the command and wait for it to exit.
    pub async fn play(&self, wav: &[u8]) -> Result<ExitStatus> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(target: "player", command = %self.command, bytes = wav.len(), "Running play command");
        let mut child = cmd.spawn().map_err(|e| {
            WavenetError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to start play command `{}`: {}", self.command, e),
            ))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A player that exits early closes the pipe; the exit status tells the rest
            if let Err(e) = stdin.write_all(wav).await {
                debug!(target: "player", error = %e, "Play command closed stdin early");
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            debug!(
                target: "player",
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Play command stderr"
            );
        }
        Ok(output.status)
    }
}
