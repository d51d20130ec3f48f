use crate::upkeep::config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";
const PUSHOVER_TIMEOUT: Duration = Duration::from_secs(10);

pub const TOKEN_ENV: &str = "PUSHOVER_TOKEN";
pub const USER_ENV: &str = "PUSHOVER_USER";

/// Sink for failure notifications. Delivery is best effort: callers log
/// an error and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// Pushover push notifications
pub struct Pushover {
    client: reqwest::Client,
    api_token: String,
    user_key: String,
}

impl Pushover {
    pub fn new<S: Into<String>>(api_token: S, user_key: S) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PUSHOVER_TIMEOUT)
            .build()
            .context("failed to build http client")?;

        Ok(Pushover {
            client,
            api_token: api_token.into(),
            user_key: user_key.into(),
        })
    }
}

#[async_trait]
impl Notifier for Pushover {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        let form = [
            ("token", self.api_token.as_str()),
            ("user", self.user_key.as_str()),
            ("title", title),
            ("message", message),
        ];

        let response = self
            .client
            .post(PUSHOVER_URL)
            .form(&form)
            .send()
            .await
            .context("failed to send pushover notification")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("pushover returned {}: {}", status, body);
        }

        debug!("pushover notification sent: {}", title);
        Ok(())
    }
}

/// Notifier used when no credentials are configured
#[derive(Clone, Copy, Debug, Default)]
pub struct Disabled;

#[async_trait]
impl Notifier for Disabled {
    async fn notify(&self, title: &str, _message: &str) -> Result<()> {
        debug!("notifications disabled, dropping '{}'", title);
        Ok(())
    }
}

/// Resolve credentials, environment first, then the config file
fn credentials(cfg: &config::Pushover) -> Option<(String, String)> {
    let pick = |env: &str, fallback: &str| {
        std::env::var(env)
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    };

    let token = pick(TOKEN_ENV, &cfg.api_token);
    let user = pick(USER_ENV, &cfg.user_key);
    if token.is_empty() || user.is_empty() {
        return None;
    }
    Some((token, user))
}

/// Build the notifier for `cfg`. Missing credentials disable notifications.
pub fn from_config(cfg: &config::Pushover) -> Result<Box<dyn Notifier>> {
    match credentials(cfg) {
        Some((token, user)) => Ok(Box::new(Pushover::new(token, user)?)),
        None => {
            info!("pushover credentials not configured, notifications disabled");
            Ok(Box::new(Disabled))
        }
    }
}

/// Send the failure notification for `operation` on `target`. Never fails:
/// a delivery error is only logged.
pub async fn notify_failure(notifier: &dyn Notifier, target: &str, operation: &str, err: &str) {
    let title = format!("{} update failed: {}", target, operation);
    let message = format!("operation: {}\nerror: {}", operation, err);

    if let Err(err) = notifier.notify(&title, &message).await {
        error!("failed to send failure notification: {:#}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upkeep::fake::RecordingNotifier;

    #[tokio::test]
    async fn test_notify_failure_format() {
        let notifier = RecordingNotifier::default();
        notify_failure(&notifier, "nanobot", "update", "exit status 2").await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "nanobot update failed: update");
        assert!(sent[0].1.contains("exit status 2"));
    }

    #[tokio::test]
    async fn test_notify_failure_swallows_errors() {
        let notifier = RecordingNotifier::failing();
        notify_failure(&notifier, "nanobot", "stop", "access denied").await;
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_notifier_succeeds() {
        assert!(Disabled.notify("title", "message").await.is_ok());
    }

    #[test]
    fn test_credentials_from_config() {
        // the environment is shared between tests; only assert when unset
        if std::env::var(TOKEN_ENV).is_ok() || std::env::var(USER_ENV).is_ok() {
            return;
        }

        assert!(credentials(&config::Pushover::default()).is_none());
        let cfg = config::Pushover {
            api_token: "token".into(),
            user_key: "user".into(),
        };
        assert_eq!(
            credentials(&cfg),
            Some(("token".to_string(), "user".to_string()))
        );
    }
}
