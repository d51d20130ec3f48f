//! In-memory stand-ins for the operating system, the update command and the
//! notification sink, shared by the unit tests.

use crate::upkeep::context::Context;
use crate::upkeep::notifier::Notifier;
use crate::upkeep::platform::{
    CommandFailure, CommandRunner, Failure, Launch, Platform, Termination,
};
use crate::upkeep::types::{Event, Observer};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    FindByName,
    FindByPort,
    Terminate(i32, Termination),
    Spawn(String),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reaction {
    Exit,
    Ignore,
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpawnBehavior {
    /// spawned process is discoverable by name and accepts connections
    Up,
    /// spawned process runs but never becomes discoverable
    Silent,
    Fail,
}

struct State {
    named: BTreeSet<i32>,
    listening: Option<i32>,
    alive: HashSet<i32>,
    accepting: bool,
    enumeration_fails: bool,
    cooperative: Reaction,
    forceful: Reaction,
    spawn: SpawnBehavior,
    next_pid: i32,
    calls: Vec<Call>,
}

pub struct FakePlatform {
    state: Mutex<State>,
}

impl FakePlatform {
    pub fn new() -> Self {
        FakePlatform {
            state: Mutex::new(State {
                named: BTreeSet::new(),
                listening: None,
                alive: HashSet::new(),
                accepting: false,
                enumeration_fails: false,
                cooperative: Reaction::Exit,
                forceful: Reaction::Exit,
                spawn: SpawnBehavior::Up,
                next_pid: 1000,
                calls: Vec::new(),
            }),
        }
    }

    pub fn run_named(&self, pid: i32) {
        let mut state = self.state.lock().unwrap();
        state.alive.insert(pid);
        state.named.insert(pid);
    }

    pub fn listen(&self, pid: i32) {
        let mut state = self.state.lock().unwrap();
        state.alive.insert(pid);
        state.listening = Some(pid);
        state.accepting = true;
    }

    pub fn fail_enumeration(&self) {
        self.state.lock().unwrap().enumeration_fails = true;
    }

    pub fn on_cooperative(&self, reaction: Reaction) {
        self.state.lock().unwrap().cooperative = reaction;
    }

    pub fn on_forceful(&self, reaction: Reaction) {
        self.state.lock().unwrap().forceful = reaction;
    }

    pub fn on_spawn(&self, behavior: SpawnBehavior) {
        self.state.lock().unwrap().spawn = behavior;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn terminations(&self) -> Vec<Termination> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Terminate(_, mode) => Some(mode),
                _ => None,
            })
            .collect()
    }

    pub fn spawns(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Spawn(_)))
            .count()
    }
}

impl State {
    fn kill(&mut self, pid: i32) {
        self.alive.remove(&pid);
        self.named.remove(&pid);
        if self.listening == Some(pid) {
            self.listening = None;
            self.accepting = false;
        }
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn find_by_name(&self, _name: &str) -> Result<Vec<i32>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::FindByName);
        if state.enumeration_fails {
            bail!("access denied");
        }
        Ok(state.named.iter().copied().collect())
    }

    async fn find_by_port(&self, _port: u16) -> Result<Option<i32>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::FindByPort);
        if state.enumeration_fails {
            bail!("access denied");
        }
        Ok(state.listening)
    }

    async fn is_alive(&self, pid: i32) -> bool {
        self.state.lock().unwrap().alive.contains(&pid)
    }

    async fn accepts_connections(&self, _port: u16) -> bool {
        self.state.lock().unwrap().accepting
    }

    async fn terminate(&self, pid: i32, mode: Termination) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Terminate(pid, mode));
        let reaction = match mode {
            Termination::Cooperative => state.cooperative,
            Termination::Forceful => state.forceful,
        };

        match reaction {
            Reaction::Exit => {
                state.kill(pid);
                Ok(())
            }
            Reaction::Ignore => Ok(()),
            Reaction::Fail => bail!("operation not permitted"),
        }
    }

    async fn spawn_detached(&self, cmd: &Launch) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Spawn(cmd.cmd.clone()));
        let pid = state.next_pid;
        match state.spawn {
            SpawnBehavior::Fail => bail!("No such file or directory (os error 2)"),
            SpawnBehavior::Up => {
                state.next_pid += 1;
                state.alive.insert(pid);
                state.named.insert(pid);
                state.listening = Some(pid);
                state.accepting = true;
            }
            SpawnBehavior::Silent => {
                state.next_pid += 1;
                state.alive.insert(pid);
            }
        }
        Ok(pid)
    }
}

/// Scripted update command: each call pops the next result, after an
/// optional delay that respects the context.
pub struct FakeRunner {
    script: Mutex<VecDeque<std::result::Result<String, CommandFailure>>>,
    delay: Duration,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub fn new(script: Vec<std::result::Result<String, CommandFailure>>) -> Self {
        FakeRunner {
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ok(output: &str) -> std::result::Result<String, CommandFailure> {
        Ok(output.into())
    }

    pub fn exit(code: i32, output: &str) -> std::result::Result<String, CommandFailure> {
        Err(CommandFailure::new(Failure::Exit(Some(code)), output.into()))
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        ctx: &Context,
        program: &str,
        args: &[String],
    ) -> std::result::Result<String, CommandFailure> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        self.calls.lock().unwrap().push(call);

        if let Err(reason) = ctx.run(tokio::time::sleep(self.delay)).await {
            return Err(CommandFailure::new(
                Failure::Interrupted(reason),
                String::new(),
            ));
        }

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        RecordingNotifier {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        if self.fail {
            bail!("pushover unreachable");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Heartbeat { .. }))
            .count()
    }
}

impl Observer for RecordingObserver {
    fn event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}
