use crate::upkeep::config;
use crate::upkeep::context::Context;
use crate::upkeep::errors::{Result, UpkeepError};
use crate::upkeep::platform::{CommandFailure, CommandRunner, Failure};
use crate::upkeep::types::{Event, Observer, Source, UpdateOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval between progress heartbeats while an update runs
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Longest command output carried into logs and events
pub const MAX_OUTPUT_LENGTH: usize = 500;

pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// Bound `output` to MAX_OUTPUT_LENGTH bytes for diagnostics. Shorter input
/// is returned unchanged; longer input keeps its prefix plus a marker.
pub fn truncate(output: &str) -> String {
    if output.len() <= MAX_OUTPUT_LENGTH {
        return output.to_string();
    }

    // never split a multi-byte character
    let mut end = MAX_OUTPUT_LENGTH;
    while !output.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{}", &output[..end], TRUNCATION_MARKER)
}

/// Runs the update command against the primary source, then the fallback.
/// Holds no state between runs besides its configuration.
#[derive(Clone)]
pub struct Updater {
    runner: Arc<dyn CommandRunner>,
    observer: Arc<dyn Observer>,
    program: String,
    args: Vec<String>,
    primary: String,
    fallback: String,
    timeout: Duration,
}

impl Updater {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        observer: Arc<dyn Observer>,
        update: &config::Update,
    ) -> Result<Self> {
        let (program, args) = update.command()?;
        Ok(Self {
            runner,
            observer,
            program,
            args,
            primary: update.primary.clone(),
            fallback: update.fallback.clone(),
            timeout: update.timeout(),
        })
    }

    /// Run the update. `Ok` is Primary or Fallback; an `UpdateCommand` error
    /// carries the fallback's failure and means the outcome is Failed. The
    /// run is bounded by the configured timeout or the caller's deadline,
    /// whichever is sooner.
    pub async fn update(&self, ctx: &Context) -> Result<UpdateOutcome> {
        let run = ctx.with_timeout(self.timeout);

        // cancelled when this function returns, whatever the path
        let heartbeat = CancellationToken::new();
        let _guard = heartbeat.clone().drop_guard();
        tokio::spawn(Self::heartbeat(
            heartbeat,
            Arc::clone(&self.observer),
            self.timeout,
        ));

        info!(
            "starting forced update from primary source (command: {}, timeout: {:?})",
            self.describe(&self.primary),
            self.timeout
        );

        let err = match self.attempt(ctx, &run, Source::Primary, &self.primary).await? {
            Ok(()) => {
                self.observer.event(&Event::Outcome(UpdateOutcome::Primary));
                return Ok(UpdateOutcome::Primary);
            }
            Err(err) => err,
        };

        warn!(
            "primary update failed, attempting fallback: {} ({})",
            err.failure,
            truncate(&err.output)
        );
        info!(
            "attempting fallback (command: {})",
            self.describe(&self.fallback)
        );

        match self.attempt(ctx, &run, Source::Fallback, &self.fallback).await? {
            Ok(()) => {
                self.observer.event(&Event::Outcome(UpdateOutcome::Fallback));
                Ok(UpdateOutcome::Fallback)
            }
            Err(err) => {
                error!(
                    "update failed - both primary and fallback attempts failed: {} ({})",
                    err.failure,
                    truncate(&err.output)
                );
                self.observer.event(&Event::Outcome(UpdateOutcome::Failed));
                Err(UpkeepError::update_command(self.explain(&err)))
            }
        }
    }

    /// Run one source. The outer error is a caller interruption; the inner
    /// result is the command's own success or failure, including running
    /// out of the update's own time budget.
    async fn attempt(
        &self,
        caller: &Context,
        run: &Context,
        source: Source,
        target: &str,
    ) -> Result<std::result::Result<(), CommandFailure>> {
        let mut args = self.args.clone();
        args.push(target.to_string());

        let result = self.runner.run(run, &self.program, &args).await;
        if let Err(CommandFailure {
            failure: Failure::Interrupted(_),
            ..
        }) = &result
        {
            // the caller's own context ended, not just the update budget
            caller.check()?;
        }

        let (success, output) = match &result {
            Ok(output) => (true, output.as_str()),
            Err(err) => (false, err.output.as_str()),
        };
        self.observer.event(&Event::AttemptFinished {
            source,
            success,
            output: truncate(output),
        });

        Ok(result.map(|_| ()))
    }

    async fn heartbeat(token: CancellationToken, observer: Arc<dyn Observer>, timeout: Duration) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => observer.event(&Event::Heartbeat {
                    elapsed: started.elapsed(),
                    timeout,
                }),
            }
        }
    }

    fn describe(&self, target: &str) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.push(target.to_string());
        parts.join(" ")
    }

    fn explain(&self, err: &CommandFailure) -> String {
        match err.failure {
            Failure::Interrupted(_) => format!("update timed out after {:?}", self.timeout),
            ref failure => failure.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upkeep::errors::Interrupt;
    use crate::upkeep::fake::{FakeRunner, RecordingObserver};

    fn updater(runner: &Arc<FakeRunner>, observer: &Arc<RecordingObserver>) -> Updater {
        Updater::new(runner.clone(), observer.clone(), &config::Update::default()).unwrap()
    }

    #[test]
    fn test_truncate_identity_at_or_under_limit() {
        assert_eq!(truncate(""), "");
        assert_eq!(truncate("short output"), "short output");
        let exact = "a".repeat(MAX_OUTPUT_LENGTH);
        assert_eq!(truncate(&exact), exact);
    }

    #[test]
    fn test_truncate_long_output() {
        let long = "b".repeat(1000);
        let expected = format!("{}{}", "b".repeat(MAX_OUTPUT_LENGTH), TRUNCATION_MARKER);
        assert_eq!(truncate(&long), expected);
        assert_eq!(truncate(&"a".repeat(501)), format!("{}... (truncated)", "a".repeat(500)));
        // deterministic
        assert_eq!(truncate(&long), truncate(&long));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = format!("{}é", "a".repeat(MAX_OUTPUT_LENGTH - 1));
        let truncated = truncate(&text);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert!(truncated.len() <= MAX_OUTPUT_LENGTH + TRUNCATION_MARKER.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_success() {
        let runner = Arc::new(FakeRunner::new(vec![FakeRunner::ok("installed")]));
        let observer = Arc::new(RecordingObserver::default());

        let outcome = updater(&runner, &observer)
            .update(&Context::background())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Primary);
        assert_eq!(
            runner.calls(),
            vec![vec![
                "uv",
                "tool",
                "install",
                "--force",
                "git+https://github.com/HKUDS/nanobot.git"
            ]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_success() {
        let runner = Arc::new(FakeRunner::new(vec![
            FakeRunner::exit(1, "git clone failed"),
            FakeRunner::ok("installed nanobot-ai"),
        ]));
        let observer = Arc::new(RecordingObserver::default());

        let outcome = updater(&runner, &observer)
            .update(&Context::background())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Fallback);
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(runner.calls()[1].last().unwrap(), "nanobot-ai");
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_fail_reports_fallback_error() {
        let runner = Arc::new(FakeRunner::new(vec![
            FakeRunner::exit(1, "git clone failed"),
            FakeRunner::exit(2, "package not found"),
        ]));
        let observer = Arc::new(RecordingObserver::default());

        let err = updater(&runner, &observer)
            .update(&Context::background())
            .await
            .unwrap_err();
        match err {
            UpkeepError::UpdateCommand { message } => assert!(message.contains("exit status 2")),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            observer.events().last(),
            Some(&Event::Outcome(UpdateOutcome::Failed))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_runs_are_definitive() {
        let runner = Arc::new(FakeRunner::new(vec![
            FakeRunner::ok("already installed"),
            FakeRunner::ok("already installed"),
        ]));
        let observer = Arc::new(RecordingObserver::default());
        let updater = updater(&runner, &observer);

        assert_eq!(
            updater.update(&Context::background()).await.unwrap(),
            UpdateOutcome::Primary
        );
        assert_eq!(
            updater.update(&Context::background()).await.unwrap(),
            UpdateOutcome::Primary
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_while_running_and_stopped_after() {
        let runner = Arc::new(
            FakeRunner::new(vec![FakeRunner::ok("done")]).with_delay(Duration::from_secs(35)),
        );
        let observer = Arc::new(RecordingObserver::default());

        updater(&runner, &observer)
            .update(&Context::background())
            .await
            .unwrap();
        assert_eq!(observer.heartbeats(), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(observer.heartbeats(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_timeout_falls_back_then_fails() {
        let runner = Arc::new(
            FakeRunner::new(vec![FakeRunner::ok("never"), FakeRunner::ok("never")])
                .with_delay(Duration::from_secs(600)),
        );
        let observer = Arc::new(RecordingObserver::default());

        let started = Instant::now();
        let err = updater(&runner, &observer)
            .update(&Context::background())
            .await
            .unwrap_err();
        assert!(matches!(err, UpkeepError::UpdateCommand { .. }));
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_is_interrupt() {
        let runner = Arc::new(
            FakeRunner::new(vec![FakeRunner::ok("never")]).with_delay(Duration::from_secs(600)),
        );
        let observer = Arc::new(RecordingObserver::default());

        let ctx = Context::background().with_timeout(Duration::from_secs(60));
        let err = updater(&runner, &observer).update(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            UpkeepError::Interrupted(Interrupt::DeadlineExceeded)
        ));
        assert_eq!(runner.calls().len(), 1);
    }
}
