use anyhow::{Context as _, Result};
use async_trait::async_trait;
use command_group::CommandGroup;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use sysinfo::{self, PidExt, ProcessExt, ProcessStatus, System, SystemExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::upkeep::context::Context;
use crate::upkeep::platform::{
    CommandFailure, CommandRunner, Failure, Launch, Platform, Termination,
};

pub mod filelogger;
pub use filelogger::DailyFileLogger;

/// Timeout for a single connection attempt against the target port
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// ProcessManager gives the core access to the host: process listing,
/// listening sockets, signals, detached launches and external commands.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessManager;

impl ProcessManager {
    pub fn new() -> ProcessManager {
        ProcessManager
    }

    /// Split a command line into program and arguments
    fn split(cmd: &str) -> Result<Vec<String>> {
        let args = shlex::split(cmd).context("failed to parse command")?;
        if args.is_empty() {
            bail!("invalid command");
        }
        Ok(args)
    }
}

/// Compare process names case-insensitively, ignoring an `.exe` suffix
pub fn name_matches(process: &str, name: &str) -> bool {
    let process = process.strip_suffix(".exe").unwrap_or(process);
    let name = name.strip_suffix(".exe").unwrap_or(name);
    process.eq_ignore_ascii_case(name)
}

/// Match a process by its short name, its executable or its argv[0].
/// The kernel cuts the short name to 15 bytes on linux, so long names
/// only match through the other two.
fn identity_matches(short: &str, exe: &Path, cmd: &[String], name: &str) -> bool {
    let basename = |path: &Path| {
        path.file_name()
            .map(|file| name_matches(&file.to_string_lossy(), name))
            .unwrap_or(false)
    };

    name_matches(short, name)
        || basename(exe)
        || cmd.first().map(|arg| basename(Path::new(arg))).unwrap_or(false)
}

/// Matches `name` against a listed process
pub fn process_matches(process: &sysinfo::Process, name: &str) -> bool {
    identity_matches(process.name(), process.exe(), process.cmd(), name)
}

/// Await a liveness query. A query that could not complete counts as alive
/// so a stop is never confirmed without evidence.
async fn alive_or_assume(pid: i32, query: JoinHandle<bool>) -> bool {
    match query.await {
        Ok(alive) => alive,
        Err(err) => {
            warn!("liveness query for process {} failed, assuming alive: {}", pid, err);
            true
        }
    }
}

#[async_trait]
impl Platform for ProcessManager {
    async fn find_by_name(&self, name: &str) -> Result<Vec<i32>> {
        let name = name.to_string();
        let own = std::process::id();
        let pids = tokio::task::spawn_blocking(move || {
            let mut system = System::new();
            system.refresh_processes();

            let mut pids: Vec<i32> = system
                .processes()
                .iter()
                .filter(|(pid, process)| {
                    pid.as_u32() != own
                        && process.status() != ProcessStatus::Zombie
                        && process_matches(process, &name)
                })
                .map(|(pid, _)| pid.as_u32() as i32)
                .collect();
            pids.sort_unstable();
            pids
        })
        .await
        .context("process listing task failed")?;

        Ok(pids)
    }

    async fn find_by_port(&self, port: u16) -> Result<Option<i32>> {
        let pid = tokio::task::spawn_blocking(move || {
            listeners::get_all()
                .map(|all| {
                    all.into_iter()
                        .filter(|listener| listener.socket.port() == port)
                        .map(|listener| listener.process.pid as i32)
                        .filter(|pid| *pid > 0)
                        .min()
                })
                .map_err(|err| err.to_string())
        })
        .await
        .context("socket listing task failed")?
        .map_err(|err| anyhow!("failed to list listening sockets: {}", err))?;

        Ok(pid)
    }

    async fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }

        let sys_pid = sysinfo::Pid::from(pid as usize);
        let query = tokio::task::spawn_blocking(move || {
            let mut system = System::new();
            if !system.refresh_process(sys_pid) {
                return false;
            }
            system
                .process(sys_pid)
                .map(|process| process.status() != ProcessStatus::Zombie)
                .unwrap_or(false)
        });

        alive_or_assume(pid, query).await
    }

    async fn accepts_connections(&self, port: u16) -> bool {
        matches!(
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
            Ok(Ok(_))
        )
    }

    async fn terminate(&self, pid: i32, mode: Termination) -> Result<()> {
        let sig = match mode {
            Termination::Cooperative => Signal::SIGTERM,
            Termination::Forceful => Signal::SIGKILL,
        };

        signal::kill(Pid::from_raw(pid), sig)
            .with_context(|| format!("failed to send {:?} to process {}", sig, pid))
    }

    async fn spawn_detached(&self, launch: &Launch) -> Result<i32> {
        let args = Self::split(&launch.cmd)?;

        let mut cmd = Command::new(&args[0]);
        if !launch.dir.is_empty() {
            cmd.current_dir(&launch.dir);
        }
        cmd.args(&args[1..])
            .envs(&launch.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // own process group: signals aimed at us never reach the target
        let mut child = cmd
            .group_spawn()
            .with_context(|| format!("failed to spawn '{}'", launch.cmd))?
            .into_inner();
        let pid = child.id() as i32;

        // reap the child when it exits so it never lingers as a zombie
        std::thread::spawn(move || {
            if let Err(err) = child.wait() {
                debug!("failed to reap process {}: {}", pid, err);
            }
        });

        Ok(pid)
    }
}

#[async_trait]
impl CommandRunner for ProcessManager {
    async fn run(
        &self,
        ctx: &Context,
        program: &str,
        args: &[String],
    ) -> std::result::Result<String, CommandFailure> {
        debug!("running {} {:?}", program, args);
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // dropping the output future on interruption kills the command
        let output = match ctx.run(cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(CommandFailure::new(
                    Failure::Spawn(err.to_string()),
                    String::new(),
                ))
            }
            Err(reason) => {
                return Err(CommandFailure::new(
                    Failure::Interrupted(reason),
                    String::new(),
                ))
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(CommandFailure::new(
                Failure::Exit(output.status.code()),
                combined,
            ))
        }
    }
}
