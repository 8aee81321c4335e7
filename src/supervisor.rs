//! Supervised DHCP subprocesses
//!
//! Each DHCP client or server runs under a [`SupervisedProcess`] that tracks:
//! - Lifecycle through a type-checked state machine
//! - Restart backoff after crashes or failed spawns
//! - A circuit breaker that suspends restarts of a process that keeps dying
//!
//! Nothing here blocks waiting for a process to become ready; liveness is
//! observed on the next reconciliation tick.

use std::fmt;
use std::time::{Duration, Instant};

use breaker_machines::{CircuitBreaker, CircuitBuilder};
use serde::Serialize;
use state_machines::state_machine;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error;
use crate::os::{ChildProcess, ProcessExit, ProcessLauncher, ProcessSpec};
use crate::retry::RetryState;

/// A process that stays up this long has its backoff forgiven
const STABLE_RUN: Duration = Duration::from_secs(60);

state_machine! {
    name: ProcessMachine,
    dynamic: true,
    initial: Stopped,
    states: [Stopped, Starting, Running, Stopping, Failed],
    events {
        start {
            transition: { from: Stopped, to: Starting }
        }
        started {
            transition: { from: Starting, to: Running }
        }
        stop {
            transition: { from: [Starting, Running], to: Stopping }
        }
        stopped {
            transition: { from: Stopping, to: Stopped }
        }
        fail {
            transition: { from: [Starting, Running, Stopping], to: Failed }
        }
        recover {
            transition: { from: Failed, to: Stopped }
        }
    }
}

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ProcessState {
    fn from_machine(s: &str) -> Self {
        match s {
            "Starting" => ProcessState::Starting,
            "Running" => ProcessState::Running,
            "Stopping" => ProcessState::Stopping,
            "Failed" => ProcessState::Failed,
            _ => ProcessState::Stopped,
        }
    }
}

/// Which DHCP role a process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    DhcpClient,
    DhcpServer,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::DhcpClient => write!(f, "dhcp-client"),
            ProcessKind::DhcpServer => write!(f, "dhcp-server"),
        }
    }
}

/// What a call to [`SupervisedProcess::ensure_running`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervision {
    /// Already running with the requested spec
    Unchanged,
    /// A new process was spawned
    Spawned,
    /// Backoff or the circuit breaker deferred the start
    Deferred,
}

/// Externally visible snapshot of a supervised process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub kind: ProcessKind,
    pub state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub failures: u8,
    pub suspended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<String>,
}

/// One supervised subprocess bound to a link
pub struct SupervisedProcess {
    kind: ProcessKind,
    interface: String,
    machine: DynamicProcessMachine<()>,
    child: Option<Box<dyn ChildProcess>>,
    spec: Option<ProcessSpec>,
    started_at: Option<Instant>,
    retry: RetryState,
    breaker: CircuitBreaker,
    half_open_after: Duration,
    last_failure: Option<Instant>,
    last_exit: Option<ProcessExit>,
}

impl SupervisedProcess {
    pub fn new(kind: ProcessKind, interface: &str, config: &EngineConfig) -> Self {
        Self {
            kind,
            interface: interface.to_string(),
            machine: ProcessMachine::new(()).into_dynamic(),
            child: None,
            spec: None,
            started_at: None,
            retry: RetryState::new(&config.backoff),
            breaker: CircuitBuilder::new(format!("{}_{}", kind, interface))
                .failure_threshold(config.breaker.failure_threshold)
                .success_threshold(1)
                .half_open_timeout_secs(config.breaker.half_open_timeout_secs)
                .build(),
            half_open_after: Duration::from_secs_f64(config.breaker.half_open_timeout_secs),
            last_failure: None,
            last_exit: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_machine(self.machine.current_state())
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.pid())
    }

    pub fn is_alive(&self) -> bool {
        self.child.is_some()
    }

    /// How long the current process has been up
    pub fn running_for(&self, now: Instant) -> Option<Duration> {
        self.started_at.map(|t| now.saturating_duration_since(t))
    }

    pub fn failures(&self) -> u8 {
        self.retry.attempts()
    }

    /// Restarts are suspended until the breaker's half-open window passes
    pub fn is_suspended(&self, now: Instant) -> bool {
        !self.breaker.is_closed()
            && self
                .last_failure
                .is_some_and(|t| now.saturating_duration_since(t) < self.half_open_after)
    }

    pub fn status(&self, now: Instant) -> ProcessStatus {
        ProcessStatus {
            kind: self.kind,
            state: self.state(),
            pid: self.pid(),
            failures: self.failures(),
            suspended: self.is_suspended(now),
            last_exit: self.last_exit.map(|e| e.to_string()),
        }
    }

    /// Observe the child without blocking
    ///
    /// Promotes Starting to Running while alive, records a failure when it exited.
    pub fn poll(&mut self, now: Instant) {
        let exited = match self.child.as_mut().map(|c| c.try_wait()) {
            None => return,
            Some(Ok(None)) => None,
            Some(Ok(Some(exit))) => Some(exit),
            Some(Err(e)) => {
                warn!(interface = %self.interface, kind = %self.kind, error = %e, "process status unavailable");
                return;
            }
        };

        match exited {
            None => {
                if self.state() == ProcessState::Starting {
                    let _ = self.machine.handle(ProcessMachineEvent::Started);
                    self.breaker.record_success(0.0);
                    debug!(interface = %self.interface, kind = %self.kind, pid = ?self.pid(), "process running");
                }
                if self.running_for(now).is_some_and(|d| d >= STABLE_RUN) {
                    self.retry.reset();
                }
            }
            Some(exit) => {
                warn!(
                    interface = %self.interface,
                    kind = %self.kind,
                    pid = ?self.pid(),
                    %exit,
                    "process exited unexpectedly"
                );
                self.last_exit = Some(exit);
                self.child = None;
                self.started_at = None;
                self.record_failure(now);
            }
        }
    }

    /// Make sure a process with `spec` is running
    ///
    /// A running process with a different spec is replaced. Starts are
    /// deferred while backoff or the breaker say so.
    pub fn ensure_running(
        &mut self,
        launcher: &dyn ProcessLauncher,
        spec: &ProcessSpec,
        grace: Duration,
        now: Instant,
    ) -> error::Result<Supervision> {
        self.poll(now);

        if self.child.is_some() {
            if self.spec.as_ref() == Some(spec) {
                return Ok(Supervision::Unchanged);
            }
            info!(interface = %self.interface, kind = %self.kind, "configuration changed, restarting");
            self.ensure_stopped(grace)?;
        }

        if !self.retry.ready(now) || self.is_suspended(now) {
            return Ok(Supervision::Deferred);
        }

        self.spawn(launcher, spec, now)?;
        Ok(Supervision::Spawned)
    }

    /// Cancel any running process and start a fresh one, bypassing backoff
    pub fn restart_now(
        &mut self,
        launcher: &dyn ProcessLauncher,
        spec: &ProcessSpec,
        grace: Duration,
        now: Instant,
    ) -> error::Result<()> {
        self.ensure_stopped(grace)?;
        self.retry.reset();
        self.last_failure = None;
        self.spawn(launcher, spec, now)
    }

    /// Stop the process if one is running; returns whether anything was stopped
    pub fn ensure_stopped(&mut self, grace: Duration) -> error::Result<bool> {
        let Some(mut child) = self.child.take() else {
            return Ok(false);
        };
        let pid = child.pid();
        self.started_at = None;
        let _ = self.machine.handle(ProcessMachineEvent::Stop);

        match child.terminate(grace) {
            Ok(()) => {
                let _ = self.machine.handle(ProcessMachineEvent::Stopped);
                info!(interface = %self.interface, kind = %self.kind, pid, "process stopped");
                Ok(true)
            }
            Err(e) => {
                let _ = self.machine.handle(ProcessMachineEvent::Fail);
                let _ = self.machine.handle(ProcessMachineEvent::Recover);
                Err(e)
            }
        }
    }

    /// Kill a process that is alive but not doing its job, and back off
    pub fn give_up(&mut self, reason: &str, grace: Duration, now: Instant) -> error::Result<()> {
        warn!(interface = %self.interface, kind = %self.kind, reason, "restarting process");
        let stopped = self.ensure_stopped(grace);
        self.record_failure(now);
        stopped.map(|_| ())
    }

    /// Forgive past failures; called once the process has done its job
    pub fn mark_healthy(&mut self) {
        if self.retry.attempts() > 0 {
            debug!(interface = %self.interface, kind = %self.kind, "process healthy, backoff reset");
        }
        self.retry.reset();
        self.last_failure = None;
    }

    fn spawn(&mut self, launcher: &dyn ProcessLauncher, spec: &ProcessSpec, now: Instant) -> error::Result<()> {
        let _ = self.machine.handle(ProcessMachineEvent::Start);

        match launcher.launch(spec) {
            Ok(child) => {
                info!(
                    interface = %self.interface,
                    kind = %self.kind,
                    pid = child.pid(),
                    command = %spec.command_line(),
                    "process spawned"
                );
                self.child = Some(child);
                self.spec = Some(spec.clone());
                self.started_at = Some(now);
                Ok(())
            }
            Err(e) => {
                self.record_failure(now);
                Err(e)
            }
        }
    }

    fn record_failure(&mut self, now: Instant) {
        if matches!(self.state(), ProcessState::Starting | ProcessState::Running | ProcessState::Stopping) {
            let _ = self.machine.handle(ProcessMachineEvent::Fail);
        }
        if self.state() == ProcessState::Failed {
            let _ = self.machine.handle(ProcessMachineEvent::Recover);
        }

        self.breaker.record_failure(0.0);
        self.last_failure = Some(now);
        let delay = self.retry.record_failure(now);
        debug!(
            interface = %self.interface,
            kind = %self.kind,
            attempts = self.retry.attempts(),
            delay_ms = delay.as_millis() as u64,
            "restart scheduled"
        );
    }
}

impl fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("kind", &self.kind)
            .field("interface", &self.interface)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}
