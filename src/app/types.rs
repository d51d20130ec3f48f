use crate::upkeep::errors::UpkeepError;
use crate::upkeep::orchestrator::RunReport;
use crate::upkeep::types::UpdateOutcome;
use serde::{Deserialize, Serialize};

// Result of a run-once update, printed as a single JSON line

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct UpdateNowResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<UpdateOutcome>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub exit_code: i32,
}

impl UpdateNowResult {
    pub fn new(target: &str, result: &Result<RunReport, UpkeepError>) -> Self {
        match result {
            Ok(report) if report.is_success() => UpdateNowResult {
                success: true,
                source: Some(report.outcome),
                message: match &report.start_error {
                    None => "update completed".into(),
                    Some(err) => format!(
                        "update completed, but {} failed to start and must be started manually: {}",
                        target, err
                    ),
                },
                error: String::new(),
                exit_code: 0,
            },
            Ok(report) => UpdateNowResult {
                success: false,
                source: None,
                message: String::new(),
                error: report.summary(),
                exit_code: 1,
            },
            Err(err) => UpdateNowResult {
                success: false,
                source: None,
                message: String::new(),
                error: if err.is_interrupted() {
                    format!("update of {} interrupted: {}", target, err)
                } else {
                    format!("failed to stop {}: {}", target, err)
                },
                exit_code: 1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upkeep::errors::Interrupt;

    #[test]
    fn test_success_json() {
        let report = RunReport {
            outcome: UpdateOutcome::Fallback,
            update_error: None,
            start_error: None,
        };
        let result = UpdateNowResult::new("nanobot", &Ok(report));
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"success":true,"source":"fallback","message":"update completed","exit_code":0}"#
        );
    }

    #[test]
    fn test_failed_update_json() {
        let report = RunReport {
            outcome: UpdateOutcome::Failed,
            update_error: Some(UpkeepError::update_command("exit status 2")),
            start_error: None,
        };
        let result = UpdateNowResult::new("nanobot", &Ok(report));
        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
        assert!(result.error.contains("exit status 2"));
        assert!(result.source.is_none());
    }

    #[test]
    fn test_aborted_run_json() {
        let result =
            UpdateNowResult::new("nanobot", &Err(UpkeepError::StopTimeout { pid: 7 }));
        assert!(!result.success);
        assert!(result.error.starts_with("failed to stop nanobot"));
    }

    #[test]
    fn test_interrupted_run_json() {
        let err = UpkeepError::Interrupted(Interrupt::DeadlineExceeded);
        let result = UpdateNowResult::new("nanobot", &Err(err));
        assert!(!result.success);
        assert!(result.source.is_none());
        assert_eq!(result.error, "update of nanobot interrupted: deadline exceeded");
    }

    #[test]
    fn test_start_failure_is_still_success() {
        let report = RunReport {
            outcome: UpdateOutcome::Primary,
            update_error: None,
            start_error: Some(UpkeepError::start_spawn("no such file")),
        };
        let result = UpdateNowResult::new("nanobot", &Ok(report));
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.message.contains("started manually"));
    }
}
