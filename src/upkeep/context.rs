use crate::upkeep::errors::Interrupt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation token plus an optional deadline, handed down to every
/// long-running step so that polling loops can unwind promptly.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline of its own
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Wrap an existing cancellation token
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context that expires after `timeout`, or earlier if this
    /// context already has a sooner deadline. Cancelling the parent cancels
    /// the child, not the other way around.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(current) if current < deadline => current,
                _ => deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fail if the context was cancelled or its deadline has passed
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupt::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Sleep for `period`, never past the deadline, waking early on cancellation
    pub async fn sleep(&self, period: Duration) -> Result<(), Interrupt> {
        let mut wake = Instant::now() + period;
        if let Some(deadline) = self.deadline {
            if deadline < wake {
                wake = deadline;
            }
        }

        tokio::select! {
            _ = self.token.cancelled() => Err(Interrupt::Cancelled),
            _ = sleep_until(wake) => self.check(),
        }
    }

    /// Drive `fut` to completion unless the context is cancelled or expires first
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        self.check()?;
        let expiry = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = self.token.cancelled() => Err(Interrupt::Cancelled),
            _ = expiry => Err(Interrupt::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_stops_at_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        let started = Instant::now();

        assert_eq!(
            ctx.sleep(Duration::from_secs(10)).await,
            Err(Interrupt::DeadlineExceeded)
        );
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_within_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(10));
        assert_eq!(ctx.sleep(Duration::from_millis(500)).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_sooner_parent_deadline() {
        let parent = Context::background().with_timeout(Duration::from_secs(2));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_wakes_sleeper() {
        let ctx = Context::background();
        let child = ctx.with_timeout(Duration::from_secs(60));
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        assert_eq!(
            child.sleep(Duration::from_secs(30)).await,
            Err(Interrupt::Cancelled)
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancelling_child_leaves_parent() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        child.cancel();
        assert_eq!(child.check(), Err(Interrupt::Cancelled));
        assert_eq!(parent.check(), Ok(()));
    }
}
