use crate::upkeep::context::Context;
use crate::upkeep::errors::{Result, UpkeepError};
use crate::upkeep::platform::{Platform, Termination};
use crate::upkeep::types::ProcessHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Interval between liveness checks while waiting for a process to exit
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Stops a process: cooperative termination first, forceful termination
/// when the process is still around after its share of the budget.
#[derive(Clone)]
pub struct Terminator {
    platform: Arc<dyn Platform>,
}

impl Terminator {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Stop the process behind `handle` within `budget`. Returns only once the
    /// process is confirmed gone, or with an error. Cancellation of `ctx`
    /// aborts the attempt at the next poll.
    pub async fn stop(&self, ctx: &Context, handle: ProcessHandle, budget: Duration) -> Result<()> {
        let pid = handle.pid;
        if pid <= 0 {
            debug!("no pid provided, nothing to stop");
            return Ok(());
        }

        info!("stopping process {} (timeout: {:?})", pid, budget);
        let started = Instant::now();
        let deadline = started + budget;
        // cooperative termination gets the first 3/5 of the budget
        let grace = started + budget * 3 / 5;

        info!("attempting cooperative termination of {}", pid);
        match self.platform.terminate(pid, Termination::Cooperative).await {
            Ok(()) => {
                debug!("termination requested, waiting for {} to exit", pid);
                if self.wait_exit(ctx, pid, grace).await? {
                    info!("process {} stopped gracefully", pid);
                    return Ok(());
                }
                warn!(
                    "process {} still running after cooperative termination, proceeding to force kill",
                    pid
                );
            }
            Err(err) => {
                if !self.platform.is_alive(pid).await {
                    info!("process {} already exited", pid);
                    return Ok(());
                }
                warn!("cooperative termination of {} failed: {:#}", pid, err);
            }
        }

        ctx.check()?;
        info!("attempting forceful termination of {}", pid);
        if let Err(err) = self.platform.terminate(pid, Termination::Forceful).await {
            if !self.platform.is_alive(pid).await {
                info!("process {} exited before force kill", pid);
                return Ok(());
            }
            error!("force kill of {} failed: {:#}", pid, err);
            return Err(UpkeepError::stop_command(pid, format!("{:#}", err)));
        }

        debug!("verifying termination of {}", pid);
        if !self.wait_exit(ctx, pid, deadline).await? {
            error!("process {} did not terminate after force kill", pid);
            return Err(UpkeepError::StopTimeout { pid });
        }

        info!("process {} stopped (force killed)", pid);
        Ok(())
    }

    /// Poll until `pid` exits (true) or `until` passes (false). An ended
    /// context is an error, distinct from running out of local budget.
    async fn wait_exit(&self, ctx: &Context, pid: i32, until: Instant) -> Result<bool> {
        loop {
            if !self.platform.is_alive(pid).await {
                debug!("process {} has exited", pid);
                return Ok(true);
            }

            let now = Instant::now();
            if now >= until {
                debug!("wait for exit of {} timed out", pid);
                return Ok(false);
            }

            let period = std::cmp::min(POLL_INTERVAL, until - now);
            ctx.sleep(period).await?;
        }
    }
}
