use crate::upkeep::config::{self, STOP_TIMEOUT};
use crate::upkeep::context::Context;
use crate::upkeep::errors::Result;
use crate::upkeep::launcher::Launcher;
use crate::upkeep::locator::Locator;
use crate::upkeep::platform::Platform;
use crate::upkeep::terminator::Terminator;
use std::sync::Arc;
use std::time::Duration;

/// Stops the target before an update and starts it again afterwards
#[derive(Clone)]
pub struct LifecycleManager {
    /// Finds the running target
    locator: Locator,

    /// Stops a located target
    terminator: Terminator,

    /// Starts the target
    launcher: Launcher,

    /// Budget for a stop, fixed by policy
    stop_timeout: Duration,

    /// Budget for a start to show a liveness signal
    startup_timeout: Duration,
}

impl LifecycleManager {
    /// Create a new lifecycle manager for `target`
    pub fn new(platform: Arc<dyn Platform>, target: &config::Target) -> Self {
        let locator = Locator::new(
            platform.clone(),
            target.name.as_str(),
            target.port,
            target.detection,
        );

        Self {
            terminator: Terminator::new(platform.clone()),
            launcher: Launcher::new(platform, locator.clone(), target.launch(), target.liveness),
            locator,
            stop_timeout: STOP_TIMEOUT,
            startup_timeout: target.startup_timeout(),
        }
    }

    /// Get a reference to the locator
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Make sure the target is not running. Succeeds immediately when it was
    /// not running. Any error means the update must not proceed.
    pub async fn stop_for_update(&self, ctx: &Context) -> Result<()> {
        info!("starting stop-before-update process");

        let handle = match self.locator.find_target().await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                info!("'{}' not running, nothing to stop", self.locator.name());
                return Ok(());
            }
            Err(err) => {
                error!("failed to detect '{}': {}", self.locator.name(), err);
                return Err(err);
            }
        };

        info!(
            "found running '{}' (pid: {}, detection method: {})",
            self.locator.name(),
            handle.pid,
            handle.discovery
        );

        if let Err(err) = self.terminator.stop(ctx, handle, self.stop_timeout).await {
            error!(
                "failed to stop '{}' (pid: {}): {}",
                self.locator.name(),
                handle.pid,
                err
            );
            return Err(err);
        }

        info!("'{}' stopped successfully (pid: {})", self.locator.name(), handle.pid);
        Ok(())
    }

    /// Start the target, whatever its state was before the update. A failure
    /// here does not undo an update: the user has to start the target manually.
    pub async fn start_after_update(&self, ctx: &Context) -> Result<()> {
        info!("starting '{}' after update", self.locator.name());

        if let Err(err) = self.launcher.start(ctx, self.startup_timeout).await {
            error!(
                "failed to start '{}' (user can start manually): {}",
                self.locator.name(),
                err
            );
            return Err(err);
        }

        info!("'{}' started successfully", self.locator.name());
        Ok(())
    }
}
