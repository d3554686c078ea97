//! Simulation context and clock
//!
//! `Simulation` owns every piece of mutable state: the pool, the process
//! arena, the counters and both random sources. One `step()` advances every
//! process in a freshly shuffled order, runs the detector when due, refreshes
//! the wait totals and evaluates the termination condition.

use rand::prelude::*;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::config::{SimulationConfig, TerminationMode};
use crate::domain::deadlock::{DeadlockDetector, DeadlockReport};
use crate::domain::events::{EventKind, EventLog, SimEvent};
use crate::domain::locking::{
    Allocator, LockingPolicy, PoolError, ProcessId, ResourceId, ResourcePool,
};
use crate::domain::metrics::{Metrics, MetricsSnapshot};
use crate::domain::process::{Process, ProcessState, StepOutcome, TaskRules};
use crate::error::{Error, Result};

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The step budget was used up
    StepBudget,
    /// Every process finished its single task
    AllComplete,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepBudget => "step_budget",
            Self::AllComplete => "all_complete",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a single step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub tick: u64,
    /// Tasks finished during this step
    pub completed: usize,
    /// Processes that surrendered their holdings this step
    pub timeouts: usize,
    /// Present when the detector declared a deadlock
    pub deadlock: Option<DeadlockReport>,
    /// Set once the termination condition is met
    pub stopped: Option<StopReason>,
}

/// Final outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub policy: LockingPolicy,
    pub steps: u64,
    pub stop_reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub metrics: MetricsSnapshot,
}

/// Read-only view of one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessView {
    pub id: ProcessId,
    pub state: ProcessState,
    pub held: Vec<ResourceId>,
    pub waiting_time: u64,
    pub task_start_time: u64,
    pub duration_remaining: u32,
    pub tasks_completed: u64,
    pub task_completed: bool,
}

impl From<&Process> for ProcessView {
    fn from(p: &Process) -> Self {
        Self {
            id: p.id(),
            state: p.state(),
            held: p.held().to_vec(),
            waiting_time: p.waiting_time(),
            task_start_time: p.task_start_time(),
            duration_remaining: p.duration_remaining(),
            tasks_completed: p.tasks_completed(),
            task_completed: p.is_task_completed(),
        }
    }
}

/// Read-only view of one resource unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceView {
    pub id: ResourceId,
    pub holder: Option<ProcessId>,
}

/// Everything an observer needs to display the current tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSnapshot {
    pub tick: u64,
    pub policy: LockingPolicy,
    pub metrics: MetricsSnapshot,
    pub processes: Vec<ProcessView>,
    pub resources: Vec<ResourceView>,
}

/// The same workload run under each locking policy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyComparison {
    pub seed: u64,
    pub runs: Vec<RunSummary>,
}

/// Discrete-step contention simulation
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    tick: u64,
    pool: ResourcePool,
    processes: Vec<Process>,
    order: Vec<usize>,
    allocator: Allocator,
    detector: DeadlockDetector,
    rules: TaskRules,
    metrics: Metrics,
    backoff: Backoff,
    rng: StdRng,
    events: EventLog,
    stopped: Option<StopReason>,
}

impl Simulation {
    /// Build a simulation from configuration
    ///
    /// Uses `run.seed` when present, otherwise seeds from entropy. Fails
    /// before any step on invalid configuration.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let rng = match config.run.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    /// Build a simulation driven by an injected random source
    ///
    /// The source shuffles the evaluation order; the backoff generator gets
    /// its own stream derived from it.
    pub fn with_rng(config: SimulationConfig, mut rng: StdRng) -> Result<Self> {
        config.validate()?;

        let workload = &config.workload;
        let allocator = Allocator::new(
            config.locking.policy,
            workload.required_per_task,
            workload.pool_size,
        )?;
        let backoff = Backoff::new(
            config.locking.backoff_range,
            StdRng::seed_from_u64(rng.next_u64()),
        )?;
        let detector = DeadlockDetector::new(
            config.detection.settings(),
            config.locking.policy,
            workload.required_per_task,
        );
        let rules = TaskRules {
            required: workload.required_per_task,
            service_time: workload.service_time,
            max_wait_time: config.locking.max_wait_time,
            continuous: config.run.termination == TerminationMode::FixedSteps,
        };

        let processes = (0..workload.population)
            .map(|i| Process::new(ProcessId::new(i)))
            .collect();

        info!(
            policy = %config.locking.policy,
            population = workload.population,
            pool_size = workload.pool_size,
            required = workload.required_per_task,
            termination = %config.run.termination,
            "Simulation created"
        );

        Ok(Self {
            tick: 0,
            pool: ResourcePool::new(workload.pool_size),
            processes,
            order: (0..workload.population).collect(),
            allocator,
            detector,
            rules,
            metrics: Metrics::new(workload.population),
            backoff,
            rng,
            events: EventLog::new(false),
            stopped: None,
            config,
        })
    }

    /// Turn the event log on or off
    ///
    /// Enabling before the first step also records the setup events.
    pub fn record_events(&mut self, enabled: bool) {
        let fresh = enabled && !self.events.is_enabled() && self.tick == 0;
        self.events.set_enabled(enabled);
        if fresh {
            for p in &self.processes {
                self.events
                    .record(0, EventKind::ProcessCreated { process: p.id() });
            }
            for unit in self.pool.units() {
                self.events
                    .record(0, EventKind::ResourceCreated { resource: unit.id });
            }
        }
    }

    /// Hand `resource` to `process` directly, bypassing the allocator
    ///
    /// Used to set up specific contention states before stepping.
    pub fn assign(&mut self, process: ProcessId, resource: ResourceId) -> Result<()> {
        let required = self.rules.required;
        let target = self
            .processes
            .get_mut(process.index())
            .ok_or(PoolError::UnknownProcess(process))?;
        if target.held().len() >= required {
            return Err(Error::InvalidInput(format!(
                "{} already holds the {} unit(s) a task requires",
                process, required
            )));
        }

        self.pool.acquire(resource, process)?;
        target.grant(resource, required);
        self.events.record(self.tick, EventKind::Acquired { process, resource });
        Ok(())
    }

    /// Advance the clock by one step
    pub fn step(&mut self) -> Result<StepReport> {
        if let Some(reason) = self.stopped {
            return Err(Error::InvalidInput(format!(
                "Simulation already stopped ({}) at tick {}",
                reason, self.tick
            )));
        }

        self.tick += 1;
        let tick = self.tick;
        self.order.shuffle(&mut self.rng);

        let mut completed = 0;
        let mut timeouts = 0;
        for &index in &self.order {
            let outcome = self.processes[index].advance(
                tick,
                &mut self.pool,
                &self.allocator,
                &mut self.backoff,
                &self.rules,
                &mut self.events,
            )?;
            match outcome {
                StepOutcome::Completed => {
                    self.metrics.record_completion();
                    completed += 1;
                }
                StepOutcome::TimedOut => {
                    self.metrics.record_timeout();
                    timeouts += 1;
                }
                _ => {}
            }
        }

        let deadlock = self.detector.check(
            tick,
            &mut self.processes,
            &mut self.pool,
            &mut self.metrics,
            &mut self.backoff,
            &mut self.events,
        );
        self.metrics.refresh_wait(&self.processes);
        self.stopped = self.termination();

        debug!(
            tick,
            completed,
            timeouts,
            free = self.pool.available_count(),
            "Step finished"
        );

        Ok(StepReport {
            tick,
            completed,
            timeouts,
            deadlock,
            stopped: self.stopped,
        })
    }

    /// Step until the termination condition holds
    pub fn run(&mut self) -> Result<RunSummary> {
        while self.stopped.is_none() {
            self.step()?;
        }
        let summary = self.summary();
        info!(
            policy = %summary.policy,
            steps = summary.steps,
            stop_reason = %summary.stop_reason,
            tasks_completed = summary.metrics.tasks_completed,
            deadlocks = summary.metrics.deadlocks_detected,
            "Run finished"
        );
        Ok(summary)
    }

    fn termination(&self) -> Option<StopReason> {
        if self.config.run.termination == TerminationMode::AllComplete
            && self.processes.iter().all(Process::is_task_completed)
        {
            return Some(StopReason::AllComplete);
        }
        if self.tick >= self.config.run.max_steps {
            return Some(StopReason::StepBudget);
        }
        None
    }

    /// Summary of the run so far
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            policy: self.config.locking.policy,
            steps: self.tick,
            stop_reason: self.stopped.unwrap_or(StopReason::StepBudget),
            seed: self.config.run.seed,
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stopped.is_some()
    }

    /// Steps executed so far
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Events recorded so far (empty unless recording is on)
    pub fn events(&self) -> &[SimEvent] {
        self.events.events()
    }

    /// Take the recorded events, leaving the log empty
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.events.drain()
    }

    /// Read-only copy of the current state
    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            tick: self.tick,
            policy: self.config.locking.policy,
            metrics: self.metrics.snapshot(),
            processes: self.processes.iter().map(ProcessView::from).collect(),
            resources: self
                .pool
                .units()
                .iter()
                .map(|u| ResourceView {
                    id: u.id,
                    holder: u.holder,
                })
                .collect(),
        }
    }

    /// Verify exclusivity, hold bounds, service preconditions and conservation
    pub fn check_invariants(&self) -> Result<()> {
        let required = self.rules.required;
        let mut claims = vec![0usize; self.pool.len()];

        for p in &self.processes {
            if p.held().len() > required {
                return Err(Error::InvariantViolation(format!(
                    "{} holds {} unit(s), more than the {} required",
                    p.id(),
                    p.held().len(),
                    required
                )));
            }
            if p.state() == ProcessState::Performing && p.held().len() != required {
                return Err(Error::InvariantViolation(format!(
                    "{} is performing while holding {} of {} unit(s)",
                    p.id(),
                    p.held().len(),
                    required
                )));
            }
            for &unit in p.held() {
                let slot = claims
                    .get_mut(unit.index())
                    .ok_or(PoolError::UnknownResource(unit))?;
                *slot += 1;
                if *slot > 1 {
                    return Err(Error::InvariantViolation(format!(
                        "{} is claimed more than once",
                        unit
                    )));
                }
            }

            let mut listed = p.held().to_vec();
            listed.sort();
            let recorded = self.pool.held_by(p.id());
            if listed != recorded {
                return Err(Error::InvariantViolation(format!(
                    "{} lists {:?} but the pool records {:?}",
                    p.id(),
                    listed,
                    recorded
                )));
            }
        }

        if let Some(unit) = self
            .pool
            .units()
            .iter()
            .find(|u| u.holder.is_some_and(|h| h.index() >= self.processes.len()))
        {
            return Err(Error::InvariantViolation(format!(
                "{} is held by a process outside the population",
                unit.id
            )));
        }

        let held: usize = self.processes.iter().map(|p| p.held().len()).sum();
        if held + self.pool.available_count() != self.pool.len() {
            return Err(Error::InvariantViolation(format!(
                "{} held + {} free != {} total",
                held,
                self.pool.available_count(),
                self.pool.len()
            )));
        }

        Ok(())
    }
}

/// Run the same workload and seed under every locking policy
pub fn compare(config: &SimulationConfig) -> Result<PolicyComparison> {
    let seed = config.run.seed.unwrap_or_else(rand::random);
    let mut runs = Vec::with_capacity(LockingPolicy::ALL.len());

    for policy in LockingPolicy::ALL {
        let mut variant = config.clone();
        variant.locking.policy = policy;
        variant.run.seed = Some(seed);
        runs.push(Simulation::new(variant)?.run()?);
    }

    Ok(PolicyComparison { seed, runs })
}
