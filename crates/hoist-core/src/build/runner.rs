//! Subprocess runner for platform build tools.

use std::path::Path;
use std::process::Command;

use tracing::debug;

/// Captured output of a completed tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Failure modes of a tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("'{program}' was not found on PATH")]
    NotFound { program: String },

    #[error("'{program}' exited with {status:?}")]
    Failed {
        program: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to run '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Best human-readable detail for error reporting: stderr, falling back
    /// to stdout (npm and pip write diagnostics there).
    pub fn detail(&self) -> Option<String> {
        match self {
            ToolError::Failed { stdout, stderr, .. } => {
                let text = if stderr.trim().is_empty() { stdout } else { stderr };
                Some(tail(text, 20))
            }
            _ => None,
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Runs build tools in a working directory, capturing output.
///
/// Abstracted so the pipeline can be exercised without real toolchains.
pub trait ToolRunner {
    fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<ToolOutput, ToolError>;
}

/// Runner that spawns real processes, blocking the calling thread.
#[derive(Debug, Default)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<ToolOutput, ToolError> {
        debug!(program, ?args, cwd = %cwd.display(), "running build tool");
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ToolError::NotFound {
                        program: program.to_string(),
                    }
                } else {
                    ToolError::Io {
                        program: program.to_string(),
                        source: e,
                    }
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: program.to_string(),
                status: output.status.code(),
                stdout,
                stderr,
            });
        }
        Ok(ToolOutput { stdout, stderr })
    }
}
