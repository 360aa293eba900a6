use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::ConfigError;
use crate::error::{DynError, FatalError, FatalSlot};
use crate::interaction::paced::{InteractionDriver, StepOutcome};
use crate::persistence::{PersistError, StateStore};
use crate::runtime::clock::Clock;
use crate::runtime::context::RuntimeContext;
use crate::runtime::shared_value::SharedValue;
use crate::runtime::lifecycle::{Cancelled, GatePoll, LifecycleState, PauseGate, SystemStatus};
use crate::runtime::trigger::Trigger;
use crate::surface::server::spawn_surface;
use crate::trainer::harness::TrainerHarness;

use super::threads::{
    derive_system_status, wait_all_quiescent, wait_all_ready, DoneGuard, ManagedThread,
    ThreadInfo, ThreadRoster,
};

/// Queue depth for externally submitted control commands.
pub const COMMAND_QUEUE_CAPACITY: usize = 8;

/// Control loop poll cadence; bounds command and fatal-error latency.
const CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long startup waits for every thread to report ready.
const READINESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Command forwarded to the control thread, which is the only thread that
/// initiates lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Shutdown,
    SaveState(Option<PathBuf>),
}

/// Raised when the bounded command queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("command queue is full, try again later")]
pub struct QueueFull;

/// Bounded multi-producer queue drained by the control loop.
#[derive(Clone)]
pub struct CommandQueue {
    shared: Arc<Mutex<VecDeque<ControlCommand>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(VecDeque::with_capacity(COMMAND_QUEUE_CAPACITY))),
        }
    }

    pub fn push(&self, command: ControlCommand) -> Result<(), QueueFull> {
        let mut queue = self.shared.lock().unwrap();
        if queue.len() >= COMMAND_QUEUE_CAPACITY {
            return Err(QueueFull);
        }
        queue.push_back(command);
        Ok(())
    }

    pub fn pop(&self) -> Option<ControlCommand> {
        self.shared.lock().unwrap().pop_front()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-thread entry in a status report.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadReport {
    pub ready: bool,
    pub paused: bool,
}

/// Snapshot answered to `status` queries.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: SystemStatus,
    pub threads: BTreeMap<String, ThreadReport>,
    pub fatal: Option<String>,
}

/// Cloneable handle for observing and steering a running orchestrator.
/// Commands are enqueued and executed by the control thread.
#[derive(Clone)]
pub struct RuntimeHandle {
    ctx: RuntimeContext,
    queue: CommandQueue,
    fatal: FatalSlot,
    roster: ThreadRoster,
    control_addr: SharedValue<Option<SocketAddr>>,
}

impl RuntimeHandle {
    pub fn state(&self) -> LifecycleState {
        self.ctx.state()
    }

    pub fn clock(&self) -> &Clock {
        self.ctx.clock()
    }

    pub fn request_pause(&self) -> Result<(), QueueFull> {
        self.queue.push(ControlCommand::Pause)
    }

    pub fn request_resume(&self) -> Result<(), QueueFull> {
        self.queue.push(ControlCommand::Resume)
    }

    pub fn request_shutdown(&self) -> Result<(), QueueFull> {
        self.queue.push(ControlCommand::Shutdown)
    }

    pub fn request_save(&self, path: Option<PathBuf>) -> Result<(), QueueFull> {
        self.queue.push(ControlCommand::SaveState(path))
    }

    pub fn fatal(&self) -> Option<FatalError> {
        self.fatal.get()
    }

    /// Address the control surface actually bound, once it is listening.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control_addr.read()
    }

    /// Blocks until the lifecycle reaches `state` or `timeout` elapses.
    pub fn wait_for_state(&self, state: LifecycleState, timeout: Duration) -> bool {
        self.ctx.lifecycle().wait_for(|s| *s == state, timeout)
    }

    pub fn status(&self) -> StatusReport {
        let roster = self.roster.lock().unwrap();
        let status = derive_system_status(self.ctx.state(), &roster);
        let threads = roster
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    ThreadReport {
                        ready: t.ready.peek(),
                        paused: t.is_quiescent(),
                    },
                )
            })
            .collect();
        StatusReport {
            status,
            threads,
            fatal: self.fatal.get().map(|f| f.to_string()),
        }
    }
}

/// Tuning knobs the orchestrator takes from the launch configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub pause_timeout: Duration,
    pub pause_attempts: u32,
    pub join_grace: Duration,
    pub max_uptime: Option<f64>,
}

/// Failure modes of a full runtime run. Configuration and restore problems
/// map to exit code 2, fatal runtime errors to exit code 1.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Restore(#[from] PersistError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) | RunError::Restore(_) => 2,
            RunError::Fatal(_) => 1,
        }
    }
}

/// Owns the control thread's view of the runtime: lifecycle, threads,
/// persistence, and the external command queue.
///
/// `run` executes on the calling thread, which becomes the control thread:
/// the only thread allowed to initiate lifecycle transitions. All other
/// threads observe transitions cooperatively through their pause gates.
pub struct Orchestrator {
    pub(crate) ctx: RuntimeContext,
    pub(crate) driver: Option<Box<dyn InteractionDriver>>,
    pub(crate) trainers: Vec<(String, Arc<Mutex<TrainerHarness>>)>,
    pub(crate) store: StateStore,
    pub(crate) resume_from: Option<PathBuf>,
    pub(crate) save_trigger: Option<Trigger>,
    pub(crate) surface_addr: Option<(String, u16)>,
    pub(crate) settings: OrchestratorSettings,
    pub(crate) fatal: FatalSlot,
    pub(crate) queue: CommandQueue,
    pub(crate) roster: ThreadRoster,
    pub(crate) control_addr: SharedValue<Option<SocketAddr>>,
}

impl Orchestrator {
    /// Handle for programmatic control; clone freely before calling `run`.
    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            ctx: self.ctx.clone(),
            queue: self.queue.clone(),
            fatal: self.fatal.clone(),
            roster: self.roster.clone(),
            control_addr: self.control_addr.clone(),
        }
    }

    /// Runs the runtime to completion on the calling thread.
    pub fn run(mut self) -> Result<(), RunError> {
        if let Some(resume) = self.resume_from.take() {
            let record = self.store.resolve_record(&resume)?;
            let manifest = self.store.load(&record)?;
            self.ctx.clock().restore(manifest.virtual_time);
            info!(
                record = %record.display(),
                virtual_time = manifest.virtual_time,
                "restored runtime state"
            );
        }

        let listener = self.bind_surface()?;

        let mut threads = Vec::new();
        if let Some(driver) = self.driver.take() {
            threads.push(spawn_interaction(driver, &self.ctx, &self.fatal));
        }
        for (name, harness) in &self.trainers {
            threads.push(spawn_trainer(name, harness.clone(), &self.ctx, &self.fatal));
        }
        if let Some(listener) = listener {
            threads.push(spawn_surface(listener, self.handle()));
        }
        {
            let mut roster = self.roster.lock().unwrap();
            *roster = threads.iter().map(|t| t.info.clone()).collect();
        }

        if !wait_all_ready(&threads, READINESS_TIMEOUT, || self.fatal.is_set())
            && !self.fatal.is_set()
        {
            self.fatal.store(FatalError::new(
                "control",
                "threads failed to become ready in time",
            ));
        }
        if self.fatal.is_set() {
            return match self.finish(threads) {
                Some(fatal) => Err(RunError::Fatal(fatal)),
                None => Ok(()),
            };
        }

        self.ctx.lifecycle().set(LifecycleState::Running);
        if let Some(trigger) = self.save_trigger.as_mut() {
            trigger.arm(self.ctx.clock().virtual_now());
        }
        info!(threads = threads.len(), "runtime running");

        self.control_loop(&threads);

        match self.finish(threads) {
            Some(fatal) => Err(RunError::Fatal(fatal)),
            None => Ok(()),
        }
    }

    fn bind_surface(&self) -> Result<Option<TcpListener>, ConfigError> {
        let Some((host, port)) = self.surface_addr.clone() else {
            return Ok(None);
        };
        let address = format!("{host}:{port}");
        let listener = TcpListener::bind((host.as_str(), port)).map_err(|source| {
            ConfigError::Bind {
                address: address.clone(),
                source,
            }
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ConfigError::Bind {
                address: address.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| ConfigError::Bind { address, source })?;
        self.control_addr.publish(Some(local));
        info!(address = %local, "control surface listening");
        Ok(Some(listener))
    }

    fn control_loop(&mut self, threads: &[ManagedThread]) {
        loop {
            if self.fatal.is_set() {
                return;
            }
            if let Some(name) = self.unexpected_exit(threads) {
                self.fatal
                    .store(FatalError::new(name, "thread exited unexpectedly"));
                return;
            }
            while let Some(command) = self.queue.pop() {
                match command {
                    ControlCommand::Pause => {
                        self.pause(threads);
                    }
                    ControlCommand::Resume => self.resume(),
                    ControlCommand::Shutdown => {
                        info!("shutdown requested");
                        return;
                    }
                    ControlCommand::SaveState(path) => {
                        if let Err(err) = self.save_state(path.as_deref(), threads) {
                            self.fatal.store(FatalError::new(
                                "control",
                                format!("state save failed: {err}"),
                            ));
                            return;
                        }
                    }
                }
            }
            if let Some(limit) = self.settings.max_uptime {
                if self.ctx.clock().wall() >= limit {
                    info!(limit_seconds = limit, "max uptime reached");
                    return;
                }
            }
            let save_due = match self.save_trigger.as_mut() {
                Some(trigger) => trigger.poll(self.ctx.clock().virtual_now()),
                None => false,
            };
            if save_due {
                if let Err(err) = self.save_state(None, threads) {
                    self.fatal.store(FatalError::new(
                        "control",
                        format!("state save failed: {err}"),
                    ));
                    return;
                }
            }
            thread::sleep(CONTROL_POLL_INTERVAL);
        }
    }

    /// Moves to `Paused` and waits for every thread to reach its quiescent
    /// point, retrying within the configured budget. The clock freezes only
    /// once the pause succeeded.
    fn pause(&self, threads: &[ManagedThread]) -> bool {
        match self.ctx.state() {
            LifecycleState::Paused => {
                info!("already paused");
                return true;
            }
            LifecycleState::Running => {}
            other => {
                warn!(state = %other, "ignoring pause request");
                return false;
            }
        }
        info!("pausing");
        for attempt in 1..=self.settings.pause_attempts {
            self.ctx.lifecycle().set(LifecycleState::Paused);
            if wait_all_quiescent(threads, self.settings.pause_timeout) {
                self.ctx.clock().pause();
                info!("all threads paused");
                return true;
            }
            warn!(
                attempt,
                max_attempts = self.settings.pause_attempts,
                timeout_seconds = self.settings.pause_timeout.as_secs_f64(),
                "timed out waiting for threads to pause"
            );
            self.ctx.lifecycle().set(LifecycleState::Running);
        }
        error!("failed to pause the runtime");
        false
    }

    fn resume(&self) {
        if self.ctx.state() != LifecycleState::Paused {
            return;
        }
        info!("resuming");
        self.ctx.clock().resume();
        self.ctx.lifecycle().set(LifecycleState::Running);
    }

    /// Pauses (unless already paused by the operator), captures a record,
    /// then resumes only what this call paused.
    fn save_state(
        &self,
        root_override: Option<&Path>,
        threads: &[ManagedThread],
    ) -> Result<PathBuf, PersistError> {
        let was_paused = self.ctx.state() == LifecycleState::Paused;
        if !was_paused && !self.pause(threads) {
            return Err(PersistError::PauseFailed);
        }
        let virtual_time = self.ctx.clock().virtual_now();
        let result = match root_override {
            Some(root) => self.store.save_under(root, virtual_time),
            None => self.store.save(virtual_time),
        };
        if !was_paused {
            self.resume();
        }
        result
    }

    fn unexpected_exit(&self, threads: &[ManagedThread]) -> Option<String> {
        threads
            .iter()
            .find(|t| t.info.done.peek())
            .map(|t| t.info.name.clone())
    }

    /// Shutdown sequence: cancel every suspension point, join with a grace
    /// deadline, report stragglers, land in `Stopped`.
    fn finish(&mut self, threads: Vec<ManagedThread>) -> Option<FatalError> {
        info!("shutting down");
        self.ctx.lifecycle().set(LifecycleState::ShuttingDown);
        self.ctx.clock().resume();
        let deadline = Instant::now() + self.settings.join_grace;
        for thread in threads {
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(1));
            if thread.info.done.wait_for(|done| *done, remaining) {
                if let Err(payload) = thread.handle.join() {
                    self.fatal.store(FatalError::new(
                        thread.info.name.clone(),
                        format!("thread panicked: {}", panic_message(payload)),
                    ));
                }
            } else {
                error!(
                    thread = %thread.info.name,
                    "thread did not stop within the shutdown grace period"
                );
            }
        }
        self.ctx.lifecycle().set(LifecycleState::Stopped);
        info!("runtime stopped");
        self.fatal.get()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn spawn_interaction(
    mut driver: Box<dyn InteractionDriver>,
    ctx: &RuntimeContext,
    fatal: &FatalSlot,
) -> ManagedThread {
    let gate = PauseGate::new(ctx.lifecycle().clone());
    let info = ThreadInfo::new("interaction", Some(gate.quiescence()));
    let ctx = ctx.clone();
    let fatal = fatal.clone();
    let ready = info.ready.clone();
    let done = info.done.clone();
    let handle = thread::Builder::new()
        .name("interaction".to_string())
        .spawn(move || {
            let _done = DoneGuard::new(done);
            if let Err(err) = driver.setup(&ctx) {
                fatal.store(FatalError::from_hook("interaction", &err));
                return;
            }
            ready.set(true);
            if let Err(err) = interaction_loop(driver.as_mut(), &ctx, &gate) {
                error!(error = %err, "interaction loop failed");
                fatal.store(FatalError::from_hook("interaction", &err));
            }
            if let Err(err) = driver.teardown() {
                warn!(error = %err, "interaction teardown failed");
            }
        })
        .expect("failed to spawn interaction thread");
    ManagedThread { info, handle }
}

fn interaction_loop(
    driver: &mut dyn InteractionDriver,
    ctx: &RuntimeContext,
    gate: &PauseGate,
) -> Result<(), DynError> {
    loop {
        match gate.poll() {
            GatePoll::Proceed => {}
            GatePoll::Cancelled => return Ok(()),
            GatePoll::Paused => {
                driver.on_paused();
                match gate.block_until_resumed() {
                    Ok(()) => {
                        driver.on_resumed();
                        continue;
                    }
                    Err(Cancelled) => return Ok(()),
                }
            }
        }
        match driver.run_once(ctx)? {
            StepOutcome::Ran | StepOutcome::Yielded => {}
            StepOutcome::Cancelled => return Ok(()),
        }
    }
}

fn spawn_trainer(
    name: &str,
    harness: Arc<Mutex<TrainerHarness>>,
    ctx: &RuntimeContext,
    fatal: &FatalSlot,
) -> ManagedThread {
    let gate = PauseGate::new(ctx.lifecycle().clone());
    let thread_name = format!("trainer-{name}");
    let info = ThreadInfo::new(thread_name.clone(), Some(gate.quiescence()));
    let ctx = ctx.clone();
    let fatal = fatal.clone();
    let ready = info.ready.clone();
    let done = info.done.clone();
    let handle = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let _done = DoneGuard::new(done);
            let throttle = {
                let mut guard = harness.lock().unwrap();
                if let Err(err) = guard.setup(&ctx) {
                    drop(guard);
                    fatal.store(FatalError::from_hook(&thread_name, &err));
                    return;
                }
                guard.throttle()
            };
            ready.set(true);
            if let Err(err) = trainer_loop(&harness, throttle, &ctx, &gate) {
                error!(thread = %thread_name, error = %err, "trainer loop failed");
                fatal.store(FatalError::from_hook(&thread_name, &err));
            }
            if let Err(err) = harness.lock().unwrap().teardown() {
                warn!(thread = %thread_name, error = %err, "trainer teardown failed");
            }
        })
        .expect("failed to spawn trainer thread");
    ManagedThread { info, handle }
}

fn trainer_loop(
    harness: &Arc<Mutex<TrainerHarness>>,
    throttle: Duration,
    ctx: &RuntimeContext,
    gate: &PauseGate,
) -> Result<(), DynError> {
    loop {
        if gate.wait_if_paused().is_err() {
            return Ok(());
        }
        harness.lock().unwrap().run_iteration(ctx)?;
        // Back off briefly so an unfired trigger does not busy-poll; the
        // persistence controller also grabs the harness lock in this window.
        thread::sleep(throttle);
    }
}
