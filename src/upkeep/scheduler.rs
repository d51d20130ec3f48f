use crate::upkeep::errors::{Result, UpkeepError};
use chrono::{DateTime, Local};
use cron::Schedule;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The registered job: a zero-argument action producing one invocation
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MONTHS: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAYS: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

const FIELDS: [Field; 5] = [
    Field {
        name: "minute",
        min: 0,
        max: 59,
        names: &[],
    },
    Field {
        name: "hour",
        min: 0,
        max: 23,
        names: &[],
    },
    Field {
        name: "day-of-month",
        min: 1,
        max: 31,
        names: &[],
    },
    Field {
        name: "month",
        min: 1,
        max: 12,
        names: MONTHS,
    },
    Field {
        name: "day-of-week",
        min: 0,
        max: 6,
        names: WEEKDAYS,
    },
];

const DAY_OF_MONTH: usize = 2;
const DAY_OF_WEEK: usize = 4;

impl Field {
    fn value(&self, token: &str) -> std::result::Result<u32, String> {
        let value = match token.parse::<u32>() {
            Ok(value) => value,
            Err(_) => self
                .names
                .iter()
                .position(|name| name.eq_ignore_ascii_case(token))
                .map(|index| index as u32 + self.min)
                .ok_or_else(|| format!("invalid {} value '{}'", self.name, token))?,
        };

        if value < self.min || value > self.max {
            return Err(format!(
                "{} value {} out of range {}-{}",
                self.name, value, self.min, self.max
            ));
        }
        Ok(value)
    }

    /// Normalize one comma-separated item. `shift` is added to every
    /// value, the cron parser counts weekdays from 1.
    fn item(&self, item: &str, shift: u32) -> std::result::Result<String, String> {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<u32>()
                    .map_err(|_| format!("invalid {} step '{}'", self.name, step))?;
                if step == 0 {
                    return Err(format!("{} step must be greater than 0", self.name));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let suffix = step.map(|step| format!("/{}", step)).unwrap_or_default();
        if range == "*" || range == "?" {
            return Ok(format!("*{}", suffix));
        }

        let (lo, hi) = match range.split_once('-') {
            Some((lo, hi)) => (self.value(lo)?, self.value(hi)?),
            // a single start with a step runs to the end of the field
            None if step.is_some() => (self.value(range)?, self.max),
            None => {
                let value = self.value(range)?;
                (value, value)
            }
        };

        if lo > hi {
            return Err(format!("invalid {} range '{}'", self.name, range));
        }

        if lo == hi && step.is_none() {
            return Ok((lo + shift).to_string());
        }
        Ok(format!("{}-{}{}", lo + shift, hi + shift, suffix))
    }
}

/// Rewrite a five-field expression (minute hour day-of-month month
/// day-of-week) into the seconds-first form the cron parser expects.
fn normalize(expr: &str) -> Result<String> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != FIELDS.len() {
        return Err(UpkeepError::config_validation(format!(
            "invalid cron expression '{}': expected 5 fields (minute hour day-of-month month day-of-week), got {}",
            expr,
            parts.len()
        )));
    }

    let mut normalized = vec!["0".to_string()];
    for (index, (field, part)) in FIELDS.iter().zip(parts).enumerate() {
        let shift = if index == DAY_OF_WEEK { 1 } else { 0 };
        let items = part
            .split(',')
            .map(|item| field.item(item, shift))
            .collect::<std::result::Result<Vec<_>, String>>()
            .map_err(|err| {
                UpkeepError::config_validation(format!(
                    "invalid cron expression '{}': {}",
                    expr, err
                ))
            })?;
        normalized.push(items.join(","));
    }

    Ok(normalized.join(" "))
}

/// A parsed five-field expression. When day-of-month and day-of-week are
/// both restricted a day matches if either does, so the expression is kept
/// as one schedule per day field.
pub struct CronSchedule {
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// First tick strictly after `from`
    pub fn after(&self, from: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(from).next())
            .min()
    }
}

/// A day field starting with `*` or `?` places no restriction
fn restricted(part: &str) -> bool {
    !(part.starts_with('*') || part.starts_with('?'))
}

/// Parse a five-field cron expression
pub fn parse(expr: &str) -> Result<CronSchedule> {
    let normalized = normalize(expr)?;
    let parts: Vec<&str> = expr.split_whitespace().collect();

    let variants = if restricted(parts[DAY_OF_MONTH]) && restricted(parts[DAY_OF_WEEK]) {
        // seconds come first in the normalized form
        let fields: Vec<&str> = normalized.split(' ').collect();
        let mut by_month_day = fields.clone();
        by_month_day[DAY_OF_WEEK + 1] = "*";
        let mut by_week_day = fields;
        by_week_day[DAY_OF_MONTH + 1] = "*";
        vec![by_month_day.join(" "), by_week_day.join(" ")]
    } else {
        vec![normalized]
    };

    let schedules = variants
        .iter()
        .map(|variant| {
            Schedule::from_str(variant).map_err(|err| {
                UpkeepError::config_validation(format!(
                    "invalid cron expression '{}': {}",
                    expr, err
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CronSchedule { schedules })
}

/// Check a five-field cron expression without registering anything
pub fn validate(expr: &str) -> Result<()> {
    parse(expr).map(|_| ())
}

/// Source of tick times for the scheduler clock
pub trait Trigger: Send + Sync {
    /// Time until the next tick, `None` when there is none
    fn next_delay(&self) -> Option<Duration>;
}

/// Ticks on a cron schedule in local time
pub struct CronTrigger {
    schedule: CronSchedule,
    // never hand out the same tick twice, even if the clock wakes early
    last: Mutex<Option<DateTime<Local>>>,
}

impl CronTrigger {
    pub fn new(expr: &str) -> Result<Self> {
        Ok(CronTrigger {
            schedule: parse(expr)?,
            last: Mutex::new(None),
        })
    }
}

impl Trigger for CronTrigger {
    fn next_delay(&self) -> Option<Duration> {
        let now = Local::now();
        let mut last = lock(&self.last);
        let from = match *last {
            Some(previous) if previous > now => previous,
            _ => now,
        };

        let next = self.schedule.after(&from)?;
        *last = Some(next);
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Ticks at a fixed period
#[derive(Clone, Copy, Debug)]
pub struct Every(pub Duration);

impl Trigger for Every {
    fn next_delay(&self) -> Option<Duration> {
        Some(self.0)
    }
}

/// What happened to one tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fired {
    Started,
    /// The previous invocation was still running
    Skipped,
}

#[derive(Default)]
struct Shared {
    busy: AtomicBool,
    fired: AtomicU64,
    skipped: AtomicU64,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the busy flag when an invocation ends, including by panic
struct Busy(Arc<Shared>);

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

impl Shared {
    fn fire(self: &Arc<Self>, job: &Job) -> Fired {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            warn!("previous run still in progress, skipping this tick");
            return Fired::Skipped;
        }

        self.fired.fetch_add(1, Ordering::Relaxed);
        let busy = Busy(Arc::clone(self));
        let invocation = job();
        let handle = tokio::spawn(async move {
            let _busy = busy;
            invocation.await;
        });
        *lock(&self.in_flight) = Some(handle);
        Fired::Started
    }
}

struct Clock {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    trigger: Option<Arc<dyn Trigger>>,
    job: Option<Job>,
    clock: Option<Clock>,
}

/// Cron-driven single job runner. At most one invocation of the job is in
/// flight at any time: a tick that finds the previous invocation still
/// running is dropped, not queued.
#[derive(Default)]
pub struct Scheduler {
    shared: Arc<Shared>,
    state: Mutex<State>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` on the five-field cron expression `expr`. An invalid
    /// expression is rejected here, before the clock ever starts.
    pub fn schedule<F, Fut>(&self, expr: &str, job: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let trigger = CronTrigger::new(expr)?;
        info!("job scheduled (cron: {})", expr);
        self.schedule_with(trigger, job);
        Ok(())
    }

    /// Register `job` on an arbitrary trigger, replacing any previous job
    pub fn schedule_with<T, F, Fut>(&self, trigger: T, job: F)
    where
        T: Trigger + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Arc::new(move || Box::pin(job()) as JobFuture);
        let trigger: Arc<dyn Trigger> = Arc::new(trigger);
        let mut state = lock(&self.state);
        if state.job.is_some() {
            warn!("replacing previously scheduled job");
        }
        state.trigger = Some(trigger);
        state.job = Some(job);
    }

    /// Start the trigger clock. Starting a running scheduler is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.clock.is_some() {
            debug!("scheduler already running");
            return Ok(());
        }

        let (trigger, job) = match (&state.trigger, &state.job) {
            (Some(trigger), Some(job)) => (Arc::clone(trigger), Arc::clone(job)),
            _ => return Err(UpkeepError::config_validation("no job scheduled")),
        };

        let token = CancellationToken::new();
        let handle = tokio::spawn(Self::clock(
            Arc::clone(&self.shared),
            trigger,
            job,
            token.clone(),
        ));
        state.clock = Some(Clock { token, handle });
        info!("scheduler started");
        Ok(())
    }

    /// Halt the clock, then wait for the in-flight invocation, if any, to
    /// finish. No tick fires after this returns.
    pub async fn stop(&self) {
        let clock = lock(&self.state).clock.take();
        if let Some(clock) = clock {
            clock.token.cancel();
            if let Err(err) = clock.handle.await {
                error!("scheduler clock task failed: {}", err);
            }
        }

        let in_flight = lock(&self.shared.in_flight).take();
        if let Some(handle) = in_flight {
            info!("waiting for running job to finish");
            if let Err(err) = handle.await {
                error!("scheduled job failed: {}", err);
            }
        }
        info!("scheduler stopped");
    }

    /// Invoke the job now, subject to the same overlap suppression as a tick
    pub fn fire(&self) -> Result<Fired> {
        let job = lock(&self.state)
            .job
            .clone()
            .ok_or_else(|| UpkeepError::config_validation("no job scheduled"))?;
        Ok(self.shared.fire(&job))
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).clock.is_some()
    }

    /// Whether an invocation is in flight
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Ticks that started an invocation
    pub fn fired(&self) -> u64 {
        self.shared.fired.load(Ordering::Relaxed)
    }

    /// Ticks dropped because an invocation was in flight
    pub fn skipped(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }

    async fn clock(
        shared: Arc<Shared>,
        trigger: Arc<dyn Trigger>,
        job: Job,
        token: CancellationToken,
    ) {
        loop {
            let delay = match trigger.next_delay() {
                Some(delay) => delay,
                None => {
                    warn!("trigger has no upcoming tick, scheduler clock stopping");
                    return;
                }
            };
            debug!("next tick in {:?}", delay);

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            shared.fire(&job);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
