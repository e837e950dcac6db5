// process.rs - External process interface
//
// Fire-and-collect-stdout process spawning for helpers such as kpsewhich.
// Calls are async and bounded by a timeout so a hung tool never blocks the
// engine.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// Spawns an external program and returns its standard output
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// `tokio::process` implementation
#[derive(Debug, Clone)]
pub struct TokioProcessSpawner {
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl Default for TokioProcessSpawner {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            working_dir: None,
        }
    }
}

impl TokioProcessSpawner {
    /// Default timeout for helper calls (10 seconds).
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the working directory for spawned processes
    pub fn with_working_dir(mut self, path: PathBuf) -> Self {
        self.working_dir = Some(path);
        self
    }
}

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let start = std::time::Instant::now();

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(wd) = &self.working_dir {
            cmd.current_dir(wd);
        }
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {program}: {e}"))?;
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| anyhow!("Failed to execute {program}: {e}"))?,
            Err(_) => {
                return Err(anyhow!("{program} timed out after {:?}", self.timeout));
            }
        };

        log::trace!("{} {:?} finished in {:?}", program, args, start.elapsed());

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{program} failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
