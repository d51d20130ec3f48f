pub mod daemon;
pub mod types;

use crate::manager::{DailyFileLogger, ProcessManager};
use crate::upkeep::config::{self, Config};
use crate::upkeep::context::Context as RunContext;
use crate::upkeep::lifecycle::LifecycleManager;
use crate::upkeep::notifier::{self, Notifier};
use crate::upkeep::orchestrator::Orchestrator;
use crate::upkeep::scheduler::{self, Scheduler};
use crate::upkeep::types::LogObserver;
use crate::upkeep::updater::Updater;
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix;

/// Where console log lines go. Run-once mode keeps stdout for its result.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Console {
    Stdout,
    Stderr,
}

fn logger(level: log::LevelFilter, log_dir: &str, console: Console) -> Result<()> {
    let logger = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} - [{}]: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                message
            ))
        })
        .level(level);

    let logger = match console {
        Console::Stdout => logger.chain(std::io::stdout()),
        Console::Stderr => logger.chain(std::io::stderr()),
    };

    let logger = match DailyFileLogger::new(log_dir) {
        Ok(file) => logger.chain(Box::new(file) as Box<dyn Write + Send>),
        Err(err) => {
            eprintln!("failed to open log directory, logging to console only: {:#}", err);
            logger
        }
    };
    logger.apply()?;

    Ok(())
}

fn level(debug: bool) -> log::LevelFilter {
    if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    }
}

/// Load the configuration, with an optional cron override validated the
/// same way as the file's expression
fn load(config: &str, cron: Option<&str>) -> Result<Config> {
    let mut cfg = config::load(config)?;
    if let Some(cron) = cron {
        scheduler::validate(cron).context("invalid --cron value")?;
        cfg.cron = cron.to_string();
    }

    Ok(cfg)
}

/// The update program must be installed before any mode starts
fn preflight(cfg: &Config) -> Result<()> {
    let (program, _) = cfg.update.command()?;
    let path = which::which(&program).with_context(|| {
        format!(
            "'{}' not found on PATH, install it before running updates",
            program
        )
    })?;

    info!("{} is installed and available at {:?}", program, path);
    Ok(())
}

fn orchestrator(cfg: &Config) -> Result<Orchestrator> {
    let pm = Arc::new(ProcessManager::new());
    let lifecycle = LifecycleManager::new(pm.clone(), &cfg.target);
    let updater = Updater::new(pm, Arc::new(LogObserver), &cfg.update)?;

    Ok(Orchestrator::new(lifecycle, updater))
}

/// init runs the scheduled mode: one update job on the configured cron
/// expression until SIGINT or SIGTERM. Shutdown waits for a running update.
pub async fn init(config: &str, cron: Option<&str>, log_dir: &str, debug: bool) -> Result<()> {
    if let Err(err) = logger(level(debug), log_dir, Console::Stdout) {
        eprintln!("failed to setup logging: {}", err);
    }

    let cfg = load(config, cron)?;
    preflight(&cfg)?;

    info!(
        "application starting (version: {}, config: {}, cron: {})",
        crate::VERSION,
        config,
        cfg.cron
    );

    let notifier: Arc<dyn Notifier> = Arc::from(notifier::from_config(&cfg.pushover)?);
    let orchestrator = orchestrator(&cfg)?;

    let scheduler = Scheduler::new();
    scheduler
        .schedule(&cfg.cron, move || {
            let orchestrator = orchestrator.clone();
            let notifier = Arc::clone(&notifier);
            async move {
                info!("starting scheduled update job");
                orchestrator
                    .run_scheduled(&RunContext::background(), notifier.as_ref())
                    .await;
            }
        })
        .context("failed to register scheduled job")?;

    scheduler.start()?;
    info!(
        "scheduler started (cron: {}, pid: {})",
        cfg.cron,
        std::process::id()
    );

    let mut term = unix::signal(unix::SignalKind::terminate())
        .context("failed to bind to SIGTERM")?;
    let signal = tokio::select! {
        _ = term.recv() => "SIGTERM",
        result = tokio::signal::ctrl_c() => {
            result.context("failed to bind to SIGINT")?;
            "SIGINT"
        }
    };

    info!("shutdown signal received ({})", signal);
    scheduler.stop().await;
    info!("application shutdown complete");
    Ok(())
}

/// update_now runs one stop, update, start cycle bounded by `timeout`,
/// prints the JSON result line and returns the process exit code.
pub async fn update_now(
    config: &str,
    log_dir: &str,
    timeout: Duration,
    debug: bool,
) -> Result<i32> {
    let cfg = load(config, None)?;

    // a parent that is the target would kill us while we stop it
    match daemon::make_daemon(&cfg.target.name) {
        Ok(true) => return Ok(0),
        Ok(false) => {}
        Err(err) => eprintln!("warning: failed to daemonize: {:#}", err),
    }

    if let Err(err) = logger(level(debug), log_dir, Console::Stderr) {
        eprintln!("failed to setup logging: {}", err);
    }
    preflight(&cfg)?;

    info!(
        "executing immediate update (version: {}, timeout: {:?})",
        crate::VERSION,
        timeout
    );

    let orchestrator = orchestrator(&cfg)?;
    let ctx = RunContext::background().with_timeout(timeout);
    let run = orchestrator.run(&ctx).await;

    match &run {
        Ok(report) if report.is_success() => info!("update completed: {}", report.summary()),
        Ok(report) => error!("update failed: {}", report.summary()),
        Err(err) if err.is_interrupted() => error!("update interrupted: {}", err),
        Err(err) => error!("failed to stop {}: {}", cfg.target.name, err),
    }

    let result = types::UpdateNowResult::new(&cfg.target.name, &run);
    println!("{}", serde_json::to_string(&result)?);
    Ok(result.exit_code)
}
