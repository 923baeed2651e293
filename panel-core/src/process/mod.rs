//! External process execution.
//!
//! Every tool this core drives (ACME client, dump/restore, archive and
//! export tools) goes through [`ProcessRunner`] so managers can be exercised
//! against a fake in tests. Arguments are passed as discrete argv entries and
//! pipelines are wired in-process; nothing is interpreted by a shell.

use crate::utils::errors::{OrchestratorError, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// One program invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment. Used for credentials so they never show up in argv.
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Program and arguments, for logs. Environment is deliberately omitted.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(false);
        cmd
    }
}

/// Commands connected stdout -> stdin, optionally reading the first stage's
/// stdin from a file and writing the last stage's stdout into a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<CommandSpec>,
    pub stdin_file: Option<PathBuf>,
    pub stdout_file: Option<PathBuf>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipe(mut self, command: CommandSpec) -> Self {
        self.commands.push(command);
        self
    }

    pub fn read_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_file = Some(path.into());
        self
    }

    pub fn write_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }

    pub fn display(&self) -> String {
        let mut out = self
            .commands
            .iter()
            .map(CommandSpec::display)
            .collect::<Vec<_>>()
            .join(" | ");
        if let Some(input) = &self.stdin_file {
            out = format!("{out} < {}", input.display());
        }
        if let Some(output) = &self.stdout_file {
            out = format!("{out} > {}", output.display());
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs a single command to completion. A non-zero exit is an error.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;

    /// Runs a pipeline to completion. Fails if any stage exits non-zero.
    async fn run_pipeline(&self, pipeline: &Pipeline) -> Result<CommandOutput>;

    /// Whether `program` can be resolved on `PATH`.
    async fn is_available(&self, program: &str) -> bool;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(command = %command.display(), "Executing command");

        let output = command
            .to_command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| OrchestratorError::process(&command.program, None, e.to_string()))?;

        let result = CommandOutput {
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !output.status.success() {
            return Err(OrchestratorError::process(
                &command.program,
                result.status_code,
                result.stderr.trim(),
            ));
        }

        Ok(result)
    }

    async fn run_pipeline(&self, pipeline: &Pipeline) -> Result<CommandOutput> {
        if pipeline.commands.is_empty() {
            return Ok(CommandOutput::default());
        }
        tracing::debug!(pipeline = %pipeline.display(), "Executing pipeline");

        let last = pipeline.commands.len() - 1;
        let mut children: Vec<(String, Child)> = Vec::with_capacity(pipeline.commands.len());
        let mut upstream: Option<Stdio> = match &pipeline.stdin_file {
            Some(path) => Some(Stdio::from(std::fs::File::open(path)?)),
            None => None,
        };

        for (idx, spec) in pipeline.commands.iter().enumerate() {
            let mut cmd = spec.to_command();
            cmd.stdin(upstream.take().unwrap_or_else(Stdio::null));
            cmd.stderr(Stdio::piped());

            if idx == last {
                match &pipeline.stdout_file {
                    Some(path) => cmd.stdout(Stdio::from(std::fs::File::create(path)?)),
                    None => cmd.stdout(Stdio::piped()),
                };
            } else {
                cmd.stdout(Stdio::piped());
            }

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    for (_, started) in children.iter_mut() {
                        let _ = started.start_kill();
                    }
                    return Err(OrchestratorError::process(&spec.program, None, e.to_string()));
                }
            };

            if idx != last {
                let stdout = child.stdout.take().ok_or_else(|| {
                    OrchestratorError::process(&spec.program, None, "stdout was not captured")
                })?;
                upstream = Some(stdout.try_into().map_err(|e: std::io::Error| {
                    OrchestratorError::process(&spec.program, None, e.to_string())
                })?);
            }
            children.push((spec.program.clone(), child));
        }

        // Drain every stage concurrently so a chatty stage cannot fill its pipe
        // and stall the others.
        let finished = join_all(children.into_iter().map(|(program, mut child)| async move {
            let mut stdout = String::new();
            let mut stderr = String::new();
            let out_pipe = child.stdout.take();
            let err_pipe = child.stderr.take();
            let read_out = async {
                if let Some(mut pipe) = out_pipe {
                    let _ = pipe.read_to_string(&mut stdout).await;
                }
            };
            let read_err = async {
                if let Some(mut pipe) = err_pipe {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
            };
            tokio::join!(read_out, read_err);
            let status = child.wait().await;
            (program, status, stdout, stderr)
        }))
        .await;

        let mut stdout_last = String::new();
        let mut stderr_all = String::new();
        let mut first_failure: Option<OrchestratorError> = None;

        for (program, status, stdout, stderr) in finished {
            let status =
                status.map_err(|e| OrchestratorError::process(&program, None, e.to_string()))?;
            if !status.success() && first_failure.is_none() {
                first_failure = Some(OrchestratorError::process(
                    &program,
                    status.code(),
                    stderr.trim(),
                ));
            }
            stderr_all.push_str(&stderr);
            stdout_last = stdout;
        }

        if let Some(err) = first_failure {
            return Err(err);
        }

        Ok(CommandOutput {
            status_code: Some(0),
            stdout: stdout_last,
            stderr: stderr_all,
        })
    }

    async fn is_available(&self, program: &str) -> bool {
        self.run(&CommandSpec::new("which").arg(program)).await.is_ok()
    }
}
