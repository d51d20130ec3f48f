use crate::upkeep::config::Liveness;
use crate::upkeep::context::Context;
use crate::upkeep::errors::{Result, UpkeepError};
use crate::upkeep::locator::Locator;
use crate::upkeep::platform::{Launch, Platform};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Interval between liveness probes after a launch
pub const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Starts the target detached from the caller and waits for it to come up
#[derive(Clone)]
pub struct Launcher {
    platform: Arc<dyn Platform>,
    locator: Locator,
    launch: Launch,
    liveness: Liveness,
}

impl Launcher {
    pub fn new(
        platform: Arc<dyn Platform>,
        locator: Locator,
        launch: Launch,
        liveness: Liveness,
    ) -> Self {
        Self {
            platform,
            locator,
            launch,
            liveness,
        }
    }

    /// Launch the target and wait up to `timeout` for a liveness signal.
    /// A failing spawn is reported immediately and never retried.
    pub async fn start(&self, ctx: &Context, timeout: Duration) -> Result<()> {
        info!(
            "starting '{}' (startup timeout: {:?})",
            self.launch.cmd, timeout
        );

        let pid = self.platform.spawn_detached(&self.launch).await.map_err(|err| {
            error!("failed to start target process: {:#}", err);
            UpkeepError::start_spawn(format!("{:#}", err))
        })?;

        info!("target process started (pid: {}), waiting for it to come up", pid);
        self.wait_alive(ctx, timeout).await
    }

    async fn wait_alive(&self, ctx: &Context, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut attempts: u32 = 0;

        loop {
            ctx.check()?;
            attempts += 1;
            if self.probe().await {
                info!("target is up (attempts: {})", attempts);
                return Ok(());
            }

            // roughly every 2 seconds
            if attempts % 4 == 0 {
                debug!("target not yet running, retrying (attempt: {})", attempts);
            }

            let now = Instant::now();
            if now >= deadline {
                error!(
                    "target not running after {:?} (attempts: {})",
                    timeout, attempts
                );
                return Err(UpkeepError::StartTimeout { timeout });
            }

            ctx.sleep(std::cmp::min(PROBE_INTERVAL, deadline - now))
                .await?;
        }
    }

    async fn probe(&self) -> bool {
        match self.liveness {
            Liveness::Process => self.process_found().await,
            Liveness::Port => self.platform.accepts_connections(self.locator.port()).await,
            Liveness::Any => {
                self.process_found().await
                    || self.platform.accepts_connections(self.locator.port()).await
            }
        }
    }

    async fn process_found(&self) -> bool {
        match self.locator.find_by_name(self.locator.name()).await {
            Ok(found) => found.is_some(),
            Err(err) => {
                debug!("liveness probe failed: {}", err);
                false
            }
        }
    }
}
