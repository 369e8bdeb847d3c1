//! External command execution.
//!
//! Every pipeline stage is an invocation of an external raster/vector
//! utility. Stages are modelled as typed [`StageCommand`] values and run
//! through the [`CommandRunner`] trait, which keeps the stage chain
//! declarative and testable without spawning processes.

use std::future::Future;
use std::process::Stdio;
use thiserror::Error;
use tracing::debug;

/// A typed external-process invocation: program plus argument vector.
///
/// No shell is involved; arguments are passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl StageCommand {
    pub fn new(program: &'static str, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            program,
            args: args.into_iter().collect(),
        }
    }

    /// Single-line rendering for logs.
    pub fn rendered(&self) -> String {
        let mut line = String::from(self.program);
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

impl std::fmt::Display for StageCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.rendered())
    }
}

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started (missing binary, permissions).
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited non-zero.
    #[error("{program} exited with status {code}")]
    ExitStatus { program: &'static str, code: i32 },

    /// The program was terminated by a signal.
    #[error("{program} terminated by signal")]
    Signalled { program: &'static str },
}

/// Capability to execute a [`StageCommand`] and report success or failure.
///
/// Production uses [`ProcessRunner`]; tests substitute recording or failing
/// implementations.
pub trait CommandRunner: Send + Sync + 'static {
    /// Runs the command to completion, blocking the calling task until the
    /// external process exits.
    fn run(&self, cmd: StageCommand) -> impl Future<Output = Result<(), CommandError>> + Send;
}

/// Runs stage commands as real child processes.
///
/// Child output is discarded below verbosity 2, matching the quiet default
/// of the progress display; at verbosity 2+ it is inherited so operators can
/// watch the underlying tools.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    show_output: bool,
}

impl ProcessRunner {
    pub fn new(verbosity: u8) -> Self {
        Self {
            show_output: verbosity > 1,
        }
    }

    fn stdio(&self) -> Stdio {
        if self.show_output {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: StageCommand) -> Result<(), CommandError> {
        debug!(command = %cmd, "Running stage command");

        let status = tokio::process::Command::new(cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(self.stdio())
            .stderr(self.stdio())
            .status()
            .await
            .map_err(|source| CommandError::Spawn {
                program: cmd.program,
                source,
            })?;

        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(CommandError::ExitStatus {
                program: cmd.program,
                code,
            }),
            None => Err(CommandError::Signalled {
                program: cmd.program,
            }),
        }
    }
}
