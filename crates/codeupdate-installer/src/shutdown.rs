use std::rc::Rc;
use std::time::{Duration, Instant};

use codeupdate_core::{UpdateConfig, UpdateError};
use tracing::{debug, info, warn};

use crate::interrupt::Interrupt;
use crate::process::{ProcessSnapshot, ProcessTable, Signal};

const DEFAULT_MAX_RECHECKS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    TermSent,
    WaitingGraceful,
    ForceSent,
    WaitingForce,
    Closed,
    Unkillable,
}

impl ShutdownState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::TermSent => "term-sent",
            Self::WaitingGraceful => "waiting-graceful",
            Self::ForceSent => "force-sent",
            Self::WaitingForce => "waiting-force",
            Self::Closed => "closed",
            Self::Unkillable => "unkillable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    pub graceful_timeout: Duration,
    pub force_timeout: Duration,
    pub poll_interval: Duration,
    pub max_rechecks: u32,
}

impl ShutdownPolicy {
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            graceful_timeout: config.shutdown_timeout,
            force_timeout: config.shutdown_timeout,
            poll_interval: config.poll_interval,
            max_rechecks: DEFAULT_MAX_RECHECKS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownChoice {
    AutoClose,
    RetryCheck,
    Abort,
}

pub trait ShutdownGate {
    fn choose(
        &mut self,
        process_name: &str,
        snapshot: &ProcessSnapshot,
    ) -> Result<ShutdownChoice, UpdateError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCloseGate;

impl ShutdownGate for AutoCloseGate {
    fn choose(
        &mut self,
        _process_name: &str,
        _snapshot: &ProcessSnapshot,
    ) -> Result<ShutdownChoice, UpdateError> {
        Ok(ShutdownChoice::AutoClose)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    NotRunning,
    Closed { forced: bool, pids: Vec<u32> },
}

pub struct ProcessLifecycleController {
    processes: Rc<dyn ProcessTable>,
    process_name: String,
    policy: ShutdownPolicy,
    interrupt: Interrupt,
    trace: Vec<ShutdownState>,
}

impl ProcessLifecycleController {
    pub fn new(
        processes: Rc<dyn ProcessTable>,
        process_name: impl Into<String>,
        policy: ShutdownPolicy,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            processes,
            process_name: process_name.into(),
            policy,
            interrupt,
            trace: Vec::new(),
        }
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn trace(&self) -> &[ShutdownState] {
        &self.trace
    }

    pub fn check(&mut self, gate: &mut dyn ShutdownGate) -> Result<ShutdownOutcome, UpdateError> {
        self.trace.clear();
        let mut rechecks = 0;

        loop {
            self.interrupt.check()?;
            let snapshot = self.processes.snapshot(&self.process_name);
            if snapshot.is_empty() {
                info!(process = %self.process_name, "target application is not running");
                return Ok(ShutdownOutcome::NotRunning);
            }

            self.record(ShutdownState::Running);
            info!(
                process = %self.process_name,
                pids = ?snapshot.pids(),
                "target application is running"
            );

            match gate.choose(&self.process_name, &snapshot)? {
                ShutdownChoice::AutoClose => return self.close(snapshot),
                ShutdownChoice::RetryCheck => {
                    rechecks += 1;
                    if rechecks > self.policy.max_rechecks {
                        return Err(UpdateError::Aborted(format!(
                            "{} is still running after {} re-checks",
                            self.process_name, self.policy.max_rechecks
                        )));
                    }
                    debug!(rechecks, "re-checking target application");
                }
                ShutdownChoice::Abort => {
                    return Err(UpdateError::Aborted(format!(
                        "declined to close {}",
                        self.process_name
                    )));
                }
            }
        }
    }

    fn close(&mut self, snapshot: ProcessSnapshot) -> Result<ShutdownOutcome, UpdateError> {
        let pids = snapshot.pids().to_vec();

        self.record(ShutdownState::TermSent);
        self.send(&pids, Signal::Terminate);

        self.record(ShutdownState::WaitingGraceful);
        if self.wait_until_gone(self.policy.graceful_timeout)? {
            self.record(ShutdownState::Closed);
            info!(process = %self.process_name, "target application closed gracefully");
            return Ok(ShutdownOutcome::Closed {
                forced: false,
                pids,
            });
        }

        let survivors = self.processes.snapshot(&self.process_name);
        warn!(
            process = %self.process_name,
            pids = ?survivors.pids(),
            "graceful shutdown timed out; forcing termination"
        );
        self.record(ShutdownState::ForceSent);
        self.send(survivors.pids(), Signal::Kill);

        self.record(ShutdownState::WaitingForce);
        if self.wait_until_gone(self.policy.force_timeout)? {
            self.record(ShutdownState::Closed);
            return Ok(ShutdownOutcome::Closed { forced: true, pids });
        }

        self.record(ShutdownState::Unkillable);
        let remaining = self.processes.snapshot(&self.process_name);
        Err(UpdateError::Unkillable {
            process: self.process_name.clone(),
            pids: remaining.pids().to_vec(),
        })
    }

    fn send(&self, pids: &[u32], signal: Signal) {
        for &pid in pids {
            if let Err(err) = self.processes.signal(pid, signal) {
                warn!(pid, signal = signal.as_str(), error = %err, "failed to signal process");
            }
        }
    }

    fn wait_until_gone(&self, timeout: Duration) -> Result<bool, UpdateError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.processes.snapshot(&self.process_name).is_empty() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.interrupt.sleep(self.policy.poll_interval)?;
        }
    }

    fn record(&mut self, state: ShutdownState) {
        debug!(state = state.as_str(), "shutdown state");
        self.trace.push(state);
    }
}
