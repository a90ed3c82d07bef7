//! Spawning worker processes.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use labelbench_core::types::JobId;
use tokio::process::{Child, Command};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker exited before it could be registered")]
    NoPid,
}

/// Starts one worker process serving `job_ids` in order.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, job_ids: &[JobId]) -> Result<Child, LaunchError>;
}

/// Runs `program [args..] --job-id <id> [--job-id <id> ..]`.
///
/// The child inherits the server's environment, so `DATABASE_URL` and
/// `DATASETS_DIR` reach the worker unchanged. Output goes to the server's
/// stderr.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Arguments placed before the `--job-id` flags.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn command(&self, job_ids: &[JobId]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for id in job_ids {
            command.arg("--job-id").arg(id.to_string());
        }
        command
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command
    }
}

#[async_trait]
impl WorkerLauncher for CommandLauncher {
    async fn launch(&self, job_ids: &[JobId]) -> Result<Child, LaunchError> {
        let child = self.command(job_ids).spawn()?;
        tracing::debug!(
            program = %self.program.display(),
            pid = child.id(),
            jobs = job_ids.len(),
            "Worker spawned",
        );
        Ok(child)
    }
}
