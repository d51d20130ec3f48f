use crate::upkeep::context::Context;
use crate::upkeep::errors::{Result, UpkeepError};
use crate::upkeep::lifecycle::LifecycleManager;
use crate::upkeep::notifier::{self, Notifier};
use crate::upkeep::types::UpdateOutcome;
use crate::upkeep::updater::Updater;
use std::sync::Arc;

/// What one orchestrated cycle produced. A start failure never changes the
/// outcome: it is attached as a warning.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: UpdateOutcome,
    /// Why the update failed, set when the outcome is Failed
    pub update_error: Option<UpkeepError>,
    /// Why the restart failed, if it did
    pub start_error: Option<UpkeepError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// One line describing the run, for logs and run-once output
    pub fn summary(&self) -> String {
        let mut summary = match (&self.outcome, &self.update_error) {
            (UpdateOutcome::Failed, Some(err)) => format!("update failed: {}", err),
            (UpdateOutcome::Failed, None) => "update failed".to_string(),
            (outcome, _) => format!("update succeeded via {} source", outcome),
        };

        if let Some(err) = &self.start_error {
            summary.push_str(&format!(
                "; restart failed, target must be started manually: {}",
                err
            ));
        }
        summary
    }
}

/// Brackets the update command with a stop and a start of the target
#[derive(Clone)]
pub struct Orchestrator {
    lifecycle: LifecycleManager,
    updater: Updater,
}

impl Orchestrator {
    pub fn new(lifecycle: LifecycleManager, updater: Updater) -> Self {
        Self { lifecycle, updater }
    }

    /// Run one stop, update, start cycle. An error means the run was aborted
    /// before any update command was issued, or the caller interrupted it.
    /// A report is only produced once the update reached a definitive
    /// outcome, so Failed always means both sources were tried.
    pub async fn run(&self, ctx: &Context) -> Result<RunReport> {
        self.lifecycle.stop_for_update(ctx).await?;

        let (outcome, update_error) = match self.updater.update(ctx).await {
            Ok(outcome) => (outcome, None),
            Err(err) if err.is_interrupted() => {
                warn!("update interrupted, target left stopped: {}", err);
                return Err(err);
            }
            Err(err) => (UpdateOutcome::Failed, Some(err)),
        };

        // attempted whatever the outcome
        let start_error = self.lifecycle.start_after_update(ctx).await.err();

        if let Some(err) = &start_error {
            warn!("update finished but restart failed: {}", err);
        }

        Ok(RunReport {
            outcome,
            update_error,
            start_error,
        })
    }

    /// Run one scheduled cycle: log exactly one summary line and, on failure,
    /// make exactly one notification attempt. Notification errors are logged
    /// and otherwise ignored.
    pub async fn run_scheduled(&self, ctx: &Context, notifier: &dyn Notifier) {
        let target = self.lifecycle.locator().name().to_string();
        match self.run(ctx).await {
            Ok(report) if report.is_success() => {
                info!("scheduled update of '{}' finished: {}", target, report.summary());
            }
            Ok(report) => {
                error!("scheduled update of '{}' finished: {}", target, report.summary());
                let err = report
                    .update_error
                    .as_ref()
                    .map(|err| err.to_string())
                    .unwrap_or_else(|| report.summary());
                notifier::notify_failure(notifier, &target, "update", &err).await;
            }
            Err(err) => {
                error!("scheduled update of '{}' aborted: {}", target, err);
                let operation = if err.is_interrupted() {
                    "interrupted"
                } else {
                    "stop"
                };
                notifier::notify_failure(notifier, &target, operation, &err.to_string()).await;
            }
        }
    }
}
