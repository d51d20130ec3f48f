use std::time::Duration;
use thiserror::Error;

/// Reason a wait was cut short by the caller rather than by the operation itself
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Errors that can occur while supervising an update cycle
#[derive(Error, Debug)]
pub enum UpkeepError {
    /// Enumerating processes or connections failed at the OS level
    #[error("failed to detect target process: {message}")]
    Detection { message: String },

    /// The process was still alive after forceful termination
    #[error("process {pid} did not terminate after forceful termination")]
    StopTimeout { pid: i32 },

    /// The terminate call itself failed
    #[error("failed to terminate process {pid}: {message}")]
    StopCommand { pid: i32, message: String },

    /// No liveness signal appeared before the startup deadline
    #[error("target not running after {timeout:?}")]
    StartTimeout { timeout: Duration },

    /// The target could not be launched
    #[error("failed to launch target: {message}")]
    StartSpawn { message: String },

    /// Both update sources failed
    #[error("update failed (primary and fallback): {message}")]
    UpdateCommand { message: String },

    /// Bad trigger expression or out-of-range setting
    #[error("invalid configuration: {message}")]
    ConfigValidation { message: String },

    /// Caller-initiated abort
    #[error("{0}")]
    Interrupted(#[from] Interrupt),
}

impl UpkeepError {
    /// Create a new Detection error
    pub fn detection<S: Into<String>>(message: S) -> Self {
        UpkeepError::Detection {
            message: message.into(),
        }
    }

    /// Create a new StopCommand error
    pub fn stop_command<S: Into<String>>(pid: i32, message: S) -> Self {
        UpkeepError::StopCommand {
            pid,
            message: message.into(),
        }
    }

    /// Create a new StartSpawn error
    pub fn start_spawn<S: Into<String>>(message: S) -> Self {
        UpkeepError::StartSpawn {
            message: message.into(),
        }
    }

    /// Create a new UpdateCommand error
    pub fn update_command<S: Into<String>>(message: S) -> Self {
        UpkeepError::UpdateCommand {
            message: message.into(),
        }
    }

    /// Create a new ConfigValidation error
    pub fn config_validation<S: Into<String>>(message: S) -> Self {
        UpkeepError::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if the error was caused by the caller cancelling or timing out
    pub fn is_interrupted(&self) -> bool {
        matches!(self, UpkeepError::Interrupted(_))
    }

    /// Errors after which issuing the update command is unsafe
    pub fn aborts_update(&self) -> bool {
        matches!(
            self,
            UpkeepError::Detection { .. }
                | UpkeepError::StopTimeout { .. }
                | UpkeepError::StopCommand { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, UpkeepError>;
