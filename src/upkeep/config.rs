use crate::upkeep::errors::UpkeepError;
use crate::upkeep::platform::Launch;
use crate::upkeep::scheduler;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml as yaml;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Budget for stopping the target before an update. Deliberately short:
/// a slow stop is treated as abnormal.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lower bound for the configurable startup timeout, in seconds
pub const MIN_STARTUP_TIMEOUT: u64 = 5;

pub const DEFAULT_CRON: &str = "0 3 * * *";

/// Which discovery method is queried first when locating the target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Detection {
    NameFirst,
    PortFirst,
}

impl Default for Detection {
    fn default() -> Self {
        Detection::NameFirst
    }
}

/// Signal the launcher waits for after spawning the target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// A process with the target name is running
    Process,
    /// The target port accepts connections
    Port,
    /// Either of the above
    Any,
}

impl Default for Liveness {
    fn default() -> Self {
        Liveness::Process
    }
}

fn default_port() -> u16 {
    18790
}

fn default_startup_timeout() -> u64 {
    30
}

/// The supervised service
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Target {
    /// process name used for discovery
    pub name: String,
    /// command that starts the service
    pub exec: String,
    pub dir: String,
    pub env: HashMap<String, String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// seconds to wait for the service to come up after a start
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: u64,
    pub detection: Detection,
    pub liveness: Liveness,
}

impl Default for Target {
    fn default() -> Self {
        let mut env = HashMap::new();
        env.insert("PYTHONIOENCODING".into(), "utf-8".into());
        Target {
            name: "nanobot".into(),
            exec: "nanobot gateway".into(),
            dir: String::new(),
            env,
            port: default_port(),
            startup_timeout: default_startup_timeout(),
            detection: Detection::default(),
            liveness: Liveness::default(),
        }
    }
}

impl Target {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout)
    }

    pub fn launch(&self) -> Launch {
        Launch::new(
            self.exec.as_str(),
            self.dir.as_str(),
            Some(self.env.clone()),
        )
    }

    pub fn validate(&self) -> std::result::Result<(), UpkeepError> {
        if self.name.is_empty() {
            return Err(UpkeepError::config_validation("missing target name"));
        }
        if self.exec.is_empty() {
            return Err(UpkeepError::config_validation("missing target exec directive"));
        }
        if self.port == 0 {
            return Err(UpkeepError::config_validation(
                "port must be > 0 and <= 65535, got 0",
            ));
        }
        if self.startup_timeout < MIN_STARTUP_TIMEOUT {
            return Err(UpkeepError::config_validation(format!(
                "startup_timeout must be at least {} seconds, got {}",
                MIN_STARTUP_TIMEOUT, self.startup_timeout
            )));
        }

        Ok(())
    }
}

fn default_update_timeout() -> u64 {
    300
}

/// The update command and its two sources
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Update {
    /// command line the source is appended to
    pub exec: String,
    pub primary: String,
    pub fallback: String,
    /// seconds allowed for primary and fallback attempts combined
    #[serde(default = "default_update_timeout")]
    pub timeout: u64,
}

impl Default for Update {
    fn default() -> Self {
        Update {
            exec: "uv tool install --force".into(),
            primary: "git+https://github.com/HKUDS/nanobot.git".into(),
            fallback: "nanobot-ai".into(),
            timeout: default_update_timeout(),
        }
    }
}

impl Update {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The program and fixed arguments of the update command
    pub fn command(&self) -> std::result::Result<(String, Vec<String>), UpkeepError> {
        let mut args = shlex::split(&self.exec)
            .ok_or_else(|| UpkeepError::config_validation("failed to parse update exec"))?;
        if args.is_empty() {
            return Err(UpkeepError::config_validation("missing update exec directive"));
        }

        let program = args.remove(0);
        Ok((program, args))
    }

    pub fn validate(&self) -> std::result::Result<(), UpkeepError> {
        self.command()?;
        if self.primary.is_empty() || self.fallback.is_empty() {
            return Err(UpkeepError::config_validation(
                "both primary and fallback update sources are required",
            ));
        }
        if self.timeout == 0 {
            return Err(UpkeepError::config_validation(
                "update timeout must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Pushover {
    pub api_token: String,
    pub user_key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub cron: String,
    pub target: Target,
    pub update: Update,
    pub pushover: Pushover,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cron: DEFAULT_CRON.into(),
            target: Target::default(),
            update: Update::default(),
            pushover: Pushover::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> std::result::Result<(), UpkeepError> {
        scheduler::validate(&self.cron)?;
        self.target.validate()?;
        self.update.validate()
    }
}

/// load reads the configuration file at `p`. A missing file yields the
/// defaults; anything else that fails to read, parse or validate is an error.
pub fn load<T: AsRef<Path>>(p: T) -> Result<Config> {
    let p = p.as_ref();
    let config = match File::open(p) {
        Ok(file) => yaml::from_reader(&file)
            .with_context(|| format!("failed to parse config file {:?}", p))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("config file {:?} not found, using defaults", p);
            Config::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read config file {:?}", p));
        }
    };

    config.validate().context("config validation failed")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cron, "0 3 * * *");
        assert_eq!(config.target.port, 18790);
        assert_eq!(config.target.startup_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = yaml::from_str("target:\n  port: 8080\n").unwrap();
        assert_eq!(config.target.port, 8080);
        assert_eq!(config.target.name, "nanobot");
        assert_eq!(config.target.startup_timeout, 30);
        assert_eq!(config.update.timeout, 300);
        assert_eq!(config.cron, DEFAULT_CRON);
    }

    #[test]
    fn test_startup_timeout_lower_bound() {
        let mut target = Target::default();
        target.startup_timeout = 4;
        assert!(matches!(
            target.validate(),
            Err(UpkeepError::ConfigValidation { .. })
        ));
        target.startup_timeout = 5;
        assert!(target.validate().is_ok());
    }

    #[test]
    fn test_port_zero_rejected() {
        let mut target = Target::default();
        target.port = 0;
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let mut config = Config::default();
        config.cron = "60 * * * *".into();
        assert!(matches!(
            config.validate(),
            Err(UpkeepError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_update_command_split() {
        let update = Update::default();
        let (program, args) = update.command().unwrap();
        assert_eq!(program, "uv");
        assert_eq!(args, vec!["tool", "install", "--force"]);

        let update = Update {
            exec: "".into(),
            ..Update::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_detection_and_liveness_names() {
        let config: Config =
            yaml::from_str("target:\n  detection: port-first\n  liveness: any\n").unwrap();
        assert_eq!(config.target.detection, Detection::PortFirst);
        assert_eq!(config.target.liveness, Liveness::Any);
    }
}
