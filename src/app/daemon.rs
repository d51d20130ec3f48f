use crate::manager;
use anyhow::{Context, Result};
use command_group::CommandGroup;
use std::process::{Command, Stdio};
use sysinfo::{self, System, SystemExt};

/// Marks a process that was already re-launched detached
pub const DAEMON_ENV: &str = "UPKEEP_DAEMON";

pub fn is_daemon() -> bool {
    std::env::var(DAEMON_ENV)
        .map(|value| value == "1")
        .unwrap_or(false)
}

/// Check whether our parent process is the target service
fn parent_is(name: &str) -> Result<bool> {
    let ppid = nix::unistd::getppid().as_raw();
    if ppid <= 0 {
        return Ok(false);
    }

    let pid = sysinfo::Pid::from(ppid as usize);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        bail!("parent process {} not found", ppid);
    }

    Ok(system
        .process(pid)
        .map(|process| manager::process_matches(process, name))
        .unwrap_or(false))
}

/// Re-launch this process detached from a parent that is the `target`
/// service, so that stopping the target does not take us down with it.
/// Returns true when a detached copy was started and the caller should exit.
pub fn make_daemon(target: &str) -> Result<bool> {
    if is_daemon() {
        return Ok(false);
    }

    if !parent_is(target).context("failed to check parent process")? {
        return Ok(false);
    }

    let exe = std::env::current_exe().context("failed to get executable path")?;
    Command::new(exe)
        .args(std::env::args_os().skip(1))
        .env(DAEMON_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .group_spawn()
        .context("failed to start daemon process")?;

    Ok(true)
}
