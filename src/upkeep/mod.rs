pub mod config;
pub mod context;
pub mod errors;
pub mod launcher;
pub mod lifecycle;
pub mod locator;
pub mod notifier;
pub mod orchestrator;
pub mod platform;
pub mod scheduler;
pub mod terminator;
pub mod types;
pub mod updater;

#[cfg(test)]
mod fake;

pub use config::Config;
pub use context::Context;
pub use errors::{Interrupt, UpkeepError};
pub use lifecycle::LifecycleManager;
pub use orchestrator::{Orchestrator, RunReport};
pub use scheduler::Scheduler;
pub use types::{Event, LogObserver, Observer, UpdateOutcome};
pub use updater::Updater;
