use crate::upkeep::config::Detection;
use crate::upkeep::errors::{Result, UpkeepError};
use crate::upkeep::platform::Platform;
use crate::upkeep::types::{Discovery, ProcessHandle};
use std::sync::Arc;

/// Finds the target process. Pure query: never signals or spawns anything.
#[derive(Clone)]
pub struct Locator {
    platform: Arc<dyn Platform>,
    name: String,
    port: u16,
    detection: Detection,
}

impl Locator {
    pub fn new<S: Into<String>>(
        platform: Arc<dyn Platform>,
        name: S,
        port: u16,
        detection: Detection,
    ) -> Self {
        Self {
            platform,
            name: name.into(),
            port,
            detection,
        }
    }

    /// Process listening on `port`
    pub async fn find_by_port(&self, port: u16) -> Result<Option<ProcessHandle>> {
        debug!("checking port {} for target process", port);
        let pid = self.platform.find_by_port(port).await.map_err(|err| {
            error!("failed to get network connections: {:#}", err);
            UpkeepError::detection(format!("failed to get network connections: {:#}", err))
        })?;

        match pid {
            Some(pid) if pid > 0 => {
                info!("found target by port (pid: {}, port: {})", pid, port);
                Ok(Some(ProcessHandle::new(pid, Discovery::ByPort)))
            }
            _ => {
                debug!("no process found listening on port {}", port);
                Ok(None)
            }
        }
    }

    /// Process named `name`; the lowest pid wins when several match
    pub async fn find_by_name(&self, name: &str) -> Result<Option<ProcessHandle>> {
        debug!("searching for process by name '{}'", name);
        let pids = self.platform.find_by_name(name).await.map_err(|err| {
            error!("failed to list processes: {:#}", err);
            UpkeepError::detection(format!("failed to list processes: {:#}", err))
        })?;

        match pids.into_iter().filter(|pid| *pid > 0).min() {
            Some(pid) => {
                info!("found target by process name (pid: {}, name: {})", pid, name);
                Ok(Some(ProcessHandle::new(pid, Discovery::ByName)))
            }
            None => {
                debug!("no process found with name '{}'", name);
                Ok(None)
            }
        }
    }

    /// Locate the target using the configured priority. `None` means the
    /// target is not running; errors only come from failing OS queries.
    pub async fn find_target(&self) -> Result<Option<ProcessHandle>> {
        info!(
            "detecting target process (name: {}, port: {})",
            self.name, self.port
        );

        let found = match self.detection {
            Detection::NameFirst => match self.find_by_name(&self.name).await? {
                Some(handle) => Some(handle),
                None => self.find_by_port(self.port).await?,
            },
            Detection::PortFirst => match self.find_by_port(self.port).await? {
                Some(handle) => Some(handle),
                None => self.find_by_name(&self.name).await?,
            },
        };

        if found.is_none() {
            info!("target '{}' not running", self.name);
        }

        Ok(found)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upkeep::fake::FakePlatform;

    fn locator(platform: &Arc<FakePlatform>, detection: Detection) -> Locator {
        Locator::new(platform.clone(), "nanobot", 18790, detection)
    }

    #[tokio::test]
    async fn test_not_running_is_not_an_error() {
        let platform = Arc::new(FakePlatform::new());
        let found = locator(&platform, Detection::NameFirst)
            .find_target()
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_name_wins_over_port() {
        let platform = Arc::new(FakePlatform::new());
        platform.run_named(100);
        platform.listen(200);

        let found = locator(&platform, Detection::NameFirst)
            .find_target()
            .await
            .unwrap();
        assert_eq!(found, Some(ProcessHandle::new(100, Discovery::ByName)));
    }

    #[tokio::test]
    async fn test_port_fallback() {
        let platform = Arc::new(FakePlatform::new());
        platform.listen(200);

        let found = locator(&platform, Detection::NameFirst)
            .find_target()
            .await
            .unwrap();
        assert_eq!(found, Some(ProcessHandle::new(200, Discovery::ByPort)));
    }

    #[tokio::test]
    async fn test_port_first_priority() {
        let platform = Arc::new(FakePlatform::new());
        platform.run_named(100);
        platform.listen(200);

        let found = locator(&platform, Detection::PortFirst)
            .find_target()
            .await
            .unwrap();
        assert_eq!(found, Some(ProcessHandle::new(200, Discovery::ByPort)));
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_detection_error() {
        let platform = Arc::new(FakePlatform::new());
        platform.fail_enumeration();

        let err = locator(&platform, Detection::NameFirst)
            .find_target()
            .await
            .unwrap_err();
        assert!(matches!(err, UpkeepError::Detection { .. }));
    }
}
