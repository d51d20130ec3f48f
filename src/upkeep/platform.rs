use crate::upkeep::context::Context;
use crate::upkeep::errors::Interrupt;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Termination mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Ask the process to exit (SIGTERM)
    Cooperative,
    /// Kill the process unconditionally (SIGKILL)
    Forceful,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Cooperative => write!(f, "cooperative"),
            Termination::Forceful => write!(f, "forceful"),
        }
    }
}

/// A command line to launch, with its environment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Launch {
    pub cmd: String,
    pub dir: String,
    pub env: HashMap<String, String>,
}

impl Launch {
    pub fn new<S: Into<String>>(cmd: S, dir: S, env: Option<HashMap<String, String>>) -> Launch {
        Launch {
            cmd: cmd.into(),
            dir: dir.into(),
            env: env.unwrap_or_default(),
        }
    }
}

/// Process capabilities the lifecycle logic needs from the operating system.
/// Nothing above this trait touches a signal number or an OS handle.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Pids of all processes whose name matches `name`, lowest first
    async fn find_by_name(&self, name: &str) -> Result<Vec<i32>>;

    /// Pid of the process listening on `port`, if any
    async fn find_by_port(&self, port: u16) -> Result<Option<i32>>;

    /// Whether `pid` still refers to a live (non-zombie) process
    async fn is_alive(&self, pid: i32) -> bool;

    /// Whether something accepts connections on the local `port`
    async fn accepts_connections(&self, port: u16) -> bool;

    async fn terminate(&self, pid: i32, mode: Termination) -> Result<()>;

    /// Launch `cmd` detached from the caller and return its pid. The
    /// caller keeps no handle on the child.
    async fn spawn_detached(&self, cmd: &Launch) -> Result<i32>;
}

/// Why an external command did not succeed
#[derive(Clone, Debug, PartialEq)]
pub enum Failure {
    /// The command could not be started
    Spawn(String),
    /// The command exited with a non-zero status (None when killed by a signal)
    Exit(Option<i32>),
    /// The command was killed because the context ended
    Interrupted(Interrupt),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Spawn(err) => write!(f, "failed to spawn command: {}", err),
            Failure::Exit(Some(code)) => write!(f, "exit status {}", code),
            Failure::Exit(None) => write!(f, "terminated by signal"),
            Failure::Interrupted(reason) => write!(f, "command killed: {}", reason),
        }
    }
}

/// A failed external command with whatever output it produced
#[derive(Clone, Debug, PartialEq)]
pub struct CommandFailure {
    pub failure: Failure,
    pub output: String,
}

impl CommandFailure {
    pub fn new(failure: Failure, output: String) -> Self {
        Self { failure, output }
    }
}

/// Runs an opaque external command to completion, capturing stdout and
/// stderr together. The command is killed if `ctx` ends first.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        ctx: &Context,
        program: &str,
        args: &[String],
    ) -> std::result::Result<String, CommandFailure>;
}
