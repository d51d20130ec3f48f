use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a process handle was found
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discovery {
    /// Process owns the listening socket on the configured port
    ByPort,
    /// Process name matched the configured target name
    ByName,
}

impl fmt::Display for Discovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discovery::ByPort => write!(f, "port"),
            Discovery::ByName => write!(f, "process_name"),
        }
    }
}

/// A located process. Handles are never cached: the process may exit
/// between two operations, so every operation queries a fresh one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: i32,
    pub discovery: Discovery,
}

impl ProcessHandle {
    pub fn new(pid: i32, discovery: Discovery) -> Self {
        Self { pid, discovery }
    }
}

/// Result of one update run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOutcome {
    /// The primary source installed the update
    Primary,
    /// The primary source failed and the fallback source succeeded
    Fallback,
    /// Both sources failed
    Failed,
}

impl UpdateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOutcome::Primary => "primary",
            UpdateOutcome::Fallback => "fallback",
            UpdateOutcome::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, UpdateOutcome::Failed)
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which update source an attempt ran against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Primary,
    Fallback,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Primary => write!(f, "primary"),
            Source::Fallback => write!(f, "fallback"),
        }
    }
}

/// Diagnostic events emitted while an update runs
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Periodic progress signal while the update command is running
    Heartbeat { elapsed: Duration, timeout: Duration },
    /// An update command finished
    AttemptFinished {
        source: Source,
        success: bool,
        output: String,
    },
    /// The run reached its terminal state
    Outcome(UpdateOutcome),
}

/// Receiver of diagnostic events. Purely additive: it has no way to push
/// back on the caller.
pub trait Observer: Send + Sync {
    fn event(&self, event: &Event);
}

/// Observer that writes events to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn event(&self, event: &Event) {
        match event {
            Event::Heartbeat { elapsed, timeout } => info!(
                "update in progress - heartbeat (elapsed: {}s, timeout: {}s)",
                elapsed.as_secs(),
                timeout.as_secs()
            ),
            Event::AttemptFinished {
                source,
                success,
                output,
            } => info!(
                "{} update command completed (success: {}, output_length: {}): {}",
                source,
                success,
                output.len(),
                output
            ),
            Event::Outcome(outcome) => info!("update finished with outcome '{}'", outcome),
        }
    }
}
