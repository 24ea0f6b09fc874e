//! Process lifecycle backends behind one small trait.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to launch {command}: {source}")]
    Launch { command: String, #[source] source: std::io::Error },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),
    #[error("kubectl {verb} failed: {stderr}")]
    Kubectl { verb: String, stderr: String },
    #[error("unexpected kubectl output: {0}")]
    Decode(String),
    #[error("pod {pod} exited with status {status}")]
    PodExited { pod: String, status: i32 },
    #[error("no pod backend configured for service {0}")]
    NoBackend(String),
    #[error("empty command for service {0}")]
    EmptyCommand(String),
}

/// Start, stop and poll one managed process.
#[async_trait]
pub trait Spawner: Send {
    /// Returns the address the process is reachable at, when the backend
    /// assigns one.
    async fn start(&mut self) -> Result<Option<String>, SpawnError>;

    async fn stop(&mut self) -> Result<(), SpawnError>;

    /// `None` while running, else the exit status.
    async fn poll(&mut self) -> Result<Option<i32>, SpawnError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessLaunch {
    pub name: String,
    pub command: Vec<String>,
    pub cwd: Option<String>,
    /// Complete child environment; nothing else is inherited.
    pub env: BTreeMap<String, String>,
    pub user: Option<String>,
}

/// Time a stopped process gets to exit after SIGTERM before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

pub struct SubprocessSpawner {
    launch: ProcessLaunch,
    child: Option<Child>,
    stop_grace: Duration,
}

impl SubprocessSpawner {
    pub fn new(launch: ProcessLaunch) -> Self { Self { launch, child: None, stop_grace: DEFAULT_STOP_GRACE } }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn pid(&self) -> Option<u32> { self.child.as_ref().and_then(Child::id) }
}

#[async_trait]
impl Spawner for SubprocessSpawner {
    async fn start(&mut self) -> Result<Option<String>, SpawnError> {
        let (program, args) = self
            .launch
            .command
            .split_first()
            .ok_or_else(|| SpawnError::EmptyCommand(self.launch.name.clone()))?;
        if let Some(user) = &self.launch.user {
            warn!(service = %self.launch.name, user = %user, "running service as the hub user; user switching is not supported");
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(&self.launch.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &self.launch.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|source| SpawnError::Launch { command: program.clone(), source })?;
        info!(service = %self.launch.name, pid = ?child.id(), command = ?self.launch.command, "service process started");
        self.child = Some(child);
        Ok(None)
    }

    async fn stop(&mut self) -> Result<(), SpawnError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!(service = %self.launch.name, pid, error = %e, "failed to send SIGTERM");
            }
        }
        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(service = %self.launch.name, ?status, "service process stopped");
            }
            Err(_) => {
                warn!(service = %self.launch.name, grace = ?self.stop_grace, "service ignored SIGTERM, killing");
                child.kill().await?;
            }
        }
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<i32>, SpawnError> {
        match self.child.as_mut() {
            None => Ok(Some(0)),
            // Killed by a signal: no code, report a generic failure.
            Some(child) => Ok(child.try_wait()?.map(|status| status.code().unwrap_or(1))),
        }
    }
}

/// Scripted spawner for tests: fixed address, queued poll results.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default, Clone)]
    pub struct ScriptedSpawner {
        pub calls: Arc<Mutex<Vec<&'static str>>>,
        pub polls: Arc<Mutex<VecDeque<Option<i32>>>>,
        pub address: Option<String>,
        pub fail_start: bool,
    }

    impl ScriptedSpawner {
        pub fn with_polls(polls: impl IntoIterator<Item = Option<i32>>) -> Self {
            Self { polls: Arc::new(Mutex::new(polls.into_iter().collect())), ..Self::default() }
        }

        pub fn calls(&self) -> Vec<&'static str> { self.calls.lock().unwrap().clone() }
    }

    #[async_trait]
    impl Spawner for ScriptedSpawner {
        async fn start(&mut self) -> Result<Option<String>, SpawnError> {
            self.calls.lock().unwrap().push("start");
            if self.fail_start {
                return Err(SpawnError::EmptyCommand("scripted".into()));
            }
            Ok(self.address.clone())
        }

        async fn stop(&mut self) -> Result<(), SpawnError> {
            self.calls.lock().unwrap().push("stop");
            Ok(())
        }

        async fn poll(&mut self) -> Result<Option<i32>, SpawnError> {
            self.calls.lock().unwrap().push("poll");
            Ok(self.polls.lock().unwrap().pop_front().flatten())
        }
    }
}
