//! Per-process task state machine

use serde::Serialize;
use tracing::{info, warn};

use super::state::ProcessState;
use crate::backoff::Backoff;
use crate::domain::events::{EventKind, EventLog};
use crate::domain::locking::{Allocation, Allocator, ProcessId, ResourceId, ResourcePool};
use crate::error::Result;

/// Task parameters shared by every process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRules {
    /// Units a task must hold simultaneously
    pub required: usize,
    /// Steps a full hold is kept before the task completes
    pub service_time: u32,
    /// Waiting time beyond which partial holdings are surrendered
    pub max_wait_time: u64,
    /// Start a new task after each completion instead of stopping
    pub continuous: bool,
}

/// What a single step did to a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Finished for good (stop-on-all-complete mode)
    Dormant,
    /// Waiting for its rescheduled start tick
    BackingOff,
    /// Still under-allocated
    Waiting,
    /// Reached a full hold and started service
    Started,
    /// Counting down service time
    Working,
    /// Finished its task this step
    Completed,
    /// Surrendered partial holdings after waiting too long
    TimedOut,
}

/// A competing worker
#[derive(Debug, Clone, Serialize)]
pub struct Process {
    id: ProcessId,
    held: Vec<ResourceId>,
    state: ProcessState,
    task_completed: bool,
    waiting_time: u64,
    task_start_time: u64,
    duration_remaining: u32,
    tasks_completed: u64,
    timeouts: u64,
    total_waited: u64,
}

impl Process {
    /// Create an idle process with nothing held
    pub fn new(id: ProcessId) -> Self {
        Self {
            id,
            held: Vec::new(),
            state: ProcessState::Idle,
            task_completed: false,
            waiting_time: 0,
            task_start_time: 0,
            duration_remaining: 0,
            tasks_completed: 0,
            timeouts: 0,
            total_waited: 0,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Units currently held, in acquisition order
    pub fn held(&self) -> &[ResourceId] {
        &self.held
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether the process finished and will not start another task
    pub fn is_task_completed(&self) -> bool {
        self.task_completed
    }

    /// Waiting time accumulated on the current attempt
    pub fn waiting_time(&self) -> u64 {
        self.waiting_time
    }

    /// Earliest tick at which the process may request again
    pub fn task_start_time(&self) -> u64 {
        self.task_start_time
    }

    pub fn duration_remaining(&self) -> u32 {
        self.duration_remaining
    }

    /// Tasks this process has finished
    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Waiting time accumulated over the whole run, never reset
    pub fn total_waited(&self) -> u64 {
        self.total_waited
    }

    /// Advance this process by one step
    pub fn advance(
        &mut self,
        tick: u64,
        pool: &mut ResourcePool,
        allocator: &Allocator,
        backoff: &mut Backoff,
        rules: &TaskRules,
        events: &mut EventLog,
    ) -> Result<StepOutcome> {
        if self.task_completed {
            return Ok(StepOutcome::Dormant);
        }

        if self.duration_remaining > 0 {
            self.duration_remaining -= 1;
            if self.duration_remaining == 0 {
                self.complete(tick, pool, rules, events);
                return Ok(StepOutcome::Completed);
            }
            return Ok(StepOutcome::Working);
        }

        if tick < self.task_start_time {
            self.state = ProcessState::Backoff;
            return Ok(StepOutcome::BackingOff);
        }

        let allocation = allocator.allocate(self.id, &self.held, pool, backoff)?;
        for &unit in allocation.claimed() {
            events.record(
                tick,
                EventKind::Acquired {
                    process: self.id,
                    resource: unit,
                },
            );
            self.held.push(unit);
        }
        if let Allocation::Contended { penalty, .. } = allocation {
            self.add_wait(penalty);
        }

        if self.held.len() == rules.required {
            self.begin_service(tick, rules, events);
            return Ok(StepOutcome::Started);
        }

        self.state = if self.held.is_empty() {
            ProcessState::Requesting
        } else {
            ProcessState::PartialHold
        };
        self.add_wait(1);

        if self.waiting_time > rules.max_wait_time {
            let waited = self.waiting_time;
            warn!(
                process = %self.id,
                waited,
                held = self.held.len(),
                "Process timed out, releasing partial holdings"
            );
            self.release_all(tick, pool, events);
            self.waiting_time = 0;
            self.task_start_time = 0;
            self.timeouts += 1;
            events.record(
                tick,
                EventKind::TimedOut {
                    process: self.id,
                    waited,
                },
            );
            return Ok(StepOutcome::TimedOut);
        }

        Ok(StepOutcome::Waiting)
    }

    /// Return every held unit to the pool
    ///
    /// Any service in progress is abandoned, since a performing process must
    /// hold all of its units.
    pub fn release_all(&mut self, tick: u64, pool: &mut ResourcePool, events: &mut EventLog) -> usize {
        let released = self.held.len();
        for unit in self.held.drain(..) {
            pool.release(unit);
            events.record(
                tick,
                EventKind::Released {
                    process: self.id,
                    resource: unit,
                },
            );
        }
        self.abandon_service();
        released
    }

    /// Return the most recently acquired unit to the pool
    pub fn release_one(
        &mut self,
        tick: u64,
        pool: &mut ResourcePool,
        events: &mut EventLog,
    ) -> Option<ResourceId> {
        let unit = self.held.pop()?;
        pool.release(unit);
        events.record(
            tick,
            EventKind::Released {
                process: self.id,
                resource: unit,
            },
        );
        self.abandon_service();
        Some(unit)
    }

    /// Restart the attempt from scratch no earlier than `start_at`
    pub fn reschedule(&mut self, start_at: u64) {
        self.waiting_time = 0;
        self.task_start_time = start_at;
        self.state = ProcessState::Backoff;
    }

    /// Record a unit granted outside the allocator
    ///
    /// A grant that completes the hold leaves the process in `FullHold`; its
    /// service starts on its next step.
    pub(crate) fn grant(&mut self, unit: ResourceId, required: usize) {
        self.held.push(unit);
        self.state = if self.held.len() >= required {
            ProcessState::FullHold
        } else {
            ProcessState::PartialHold
        };
    }

    fn add_wait(&mut self, amount: u64) {
        self.waiting_time += amount;
        self.total_waited += amount;
    }

    fn begin_service(&mut self, tick: u64, rules: &TaskRules, events: &mut EventLog) {
        self.duration_remaining = rules.service_time;
        self.state = ProcessState::Performing;
        events.record(tick, EventKind::TaskStarted { process: self.id });
    }

    fn abandon_service(&mut self) {
        self.duration_remaining = 0;
        self.state = if self.held.is_empty() {
            ProcessState::Requesting
        } else {
            ProcessState::PartialHold
        };
    }

    fn complete(&mut self, tick: u64, pool: &mut ResourcePool, rules: &TaskRules, events: &mut EventLog) {
        self.release_all(tick, pool, events);
        self.tasks_completed += 1;
        self.waiting_time = 0;
        self.task_start_time = 0;
        events.record(tick, EventKind::TaskCompleted { process: self.id });
        info!(process = %self.id, tick, "Task completed");

        if rules.continuous {
            self.state = ProcessState::Idle;
        } else {
            self.task_completed = true;
            self.state = ProcessState::Completed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::LockingPolicy;

    struct Rig {
        pool: ResourcePool,
        allocator: Allocator,
        backoff: Backoff,
        rules: TaskRules,
        events: EventLog,
    }

    impl Rig {
        fn new(policy: LockingPolicy, pool_size: usize, max_wait_time: u64) -> Self {
            Self {
                pool: ResourcePool::new(pool_size),
                allocator: Allocator::new(policy, 2, pool_size).unwrap(),
                backoff: Backoff::with_seed(1, 0).unwrap(),
                rules: TaskRules {
                    required: 2,
                    service_time: 5,
                    max_wait_time,
                    continuous: true,
                },
                events: EventLog::new(true),
            }
        }

        fn step(&mut self, process: &mut Process, tick: u64) -> StepOutcome {
            process
                .advance(
                    tick,
                    &mut self.pool,
                    &self.allocator,
                    &mut self.backoff,
                    &self.rules,
                    &mut self.events,
                )
                .unwrap()
        }
    }

    #[test]
    fn test_full_task_cycle() {
        let mut rig = Rig::new(LockingPolicy::TwoPhase, 2, 10);
        let mut p = Process::new(ProcessId(0));

        assert_eq!(rig.step(&mut p, 1), StepOutcome::Started);
        assert_eq!(p.state(), ProcessState::Performing);
        assert_eq!(p.held().len(), 2);
        assert_eq!(p.duration_remaining(), 5);

        for tick in 2..6 {
            assert_eq!(rig.step(&mut p, tick), StepOutcome::Working);
            assert_eq!(p.held().len(), 2);
        }
        assert_eq!(rig.step(&mut p, 6), StepOutcome::Completed);
        assert_eq!(p.state(), ProcessState::Idle);
        assert!(p.held().is_empty());
        assert_eq!(p.tasks_completed(), 1);
        assert_eq!(rig.pool.available_count(), 2);
        assert_eq!(rig.events.count("task_completed"), 1);
    }

    #[test]
    fn test_single_task_mode_goes_dormant() {
        let mut rig = Rig::new(LockingPolicy::TwoPhase, 2, 10);
        rig.rules.continuous = false;
        rig.rules.service_time = 1;
        let mut p = Process::new(ProcessId(0));

        assert_eq!(rig.step(&mut p, 1), StepOutcome::Started);
        assert_eq!(rig.step(&mut p, 2), StepOutcome::Completed);
        assert!(p.is_task_completed());
        assert_eq!(p.state(), ProcessState::Completed);
        assert_eq!(rig.step(&mut p, 3), StepOutcome::Dormant);
        assert_eq!(rig.pool.available_count(), 2);
    }

    #[test]
    fn test_waiting_increments_and_times_out() {
        let mut rig = Rig::new(LockingPolicy::Incremental, 2, 3);
        let mut p = Process::new(ProcessId(0));
        rig.pool.acquire(ResourceId(0), p.id()).unwrap();
        p.grant(ResourceId(0), 2);
        rig.pool.acquire(ResourceId(1), ProcessId(9)).unwrap();

        // Holds r0 and waits for r1
        assert_eq!(rig.step(&mut p, 1), StepOutcome::Waiting);
        assert_eq!(p.state(), ProcessState::PartialHold);
        assert_eq!(p.held(), &[ResourceId(0)]);
        assert_eq!(p.waiting_time(), 1);

        assert_eq!(rig.step(&mut p, 2), StepOutcome::Waiting);
        assert_eq!(rig.step(&mut p, 3), StepOutcome::Waiting);
        assert_eq!(p.waiting_time(), 3);

        assert_eq!(rig.step(&mut p, 4), StepOutcome::TimedOut);
        assert!(p.held().is_empty());
        assert_eq!(p.waiting_time(), 0);
        assert_eq!(p.task_start_time(), 0);
        assert_eq!(p.timeouts(), 1);
        assert_eq!(rig.pool.holder(ResourceId(0)).unwrap(), None);
        assert_eq!(rig.events.count("timed_out"), 1);
    }

    #[test]
    fn test_incremental_completes_partial_hold_when_unit_frees() {
        let mut rig = Rig::new(LockingPolicy::Incremental, 2, 10);
        let mut p = Process::new(ProcessId(0));
        rig.pool.acquire(ResourceId(1), p.id()).unwrap();
        p.grant(ResourceId(1), 2);
        rig.pool.acquire(ResourceId(0), ProcessId(9)).unwrap();

        assert_eq!(rig.step(&mut p, 1), StepOutcome::Waiting);
        rig.pool.release(ResourceId(0));
        assert_eq!(rig.step(&mut p, 2), StepOutcome::Started);
        assert_eq!(p.held(), &[ResourceId(1), ResourceId(0)]);
        assert_eq!(p.state(), ProcessState::Performing);
    }

    #[test]
    fn test_granted_full_hold_starts_on_next_step() {
        let mut rig = Rig::new(LockingPolicy::TwoPhase, 2, 10);
        let mut p = Process::new(ProcessId(0));
        for unit in [ResourceId(0), ResourceId(1)] {
            rig.pool.acquire(unit, p.id()).unwrap();
            p.grant(unit, 2);
        }
        assert_eq!(p.state(), ProcessState::FullHold);
        assert_eq!(p.duration_remaining(), 0);

        assert_eq!(rig.step(&mut p, 1), StepOutcome::Started);
        assert_eq!(p.state(), ProcessState::Performing);
        assert_eq!(p.duration_remaining(), 5);
        assert_eq!(rig.events.count("acquired"), 0);
    }

    #[test]
    fn test_backoff_until_start_time() {
        let mut rig = Rig::new(LockingPolicy::TwoPhase, 2, 10);
        let mut p = Process::new(ProcessId(0));
        p.reschedule(3);

        assert_eq!(rig.step(&mut p, 1), StepOutcome::BackingOff);
        assert_eq!(rig.step(&mut p, 2), StepOutcome::BackingOff);
        assert_eq!(p.waiting_time(), 0);
        assert_eq!(rig.step(&mut p, 3), StepOutcome::Started);
    }

    #[test]
    fn test_release_one_abandons_service() {
        let mut rig = Rig::new(LockingPolicy::TwoPhase, 2, 10);
        let mut p = Process::new(ProcessId(0));
        rig.step(&mut p, 1);
        assert_eq!(p.state(), ProcessState::Performing);

        let released = p.release_one(2, &mut rig.pool, &mut rig.events);
        assert_eq!(released, Some(ResourceId(1)));
        assert_eq!(p.state(), ProcessState::PartialHold);
        assert_eq!(p.duration_remaining(), 0);
        assert_eq!(rig.pool.available(), vec![ResourceId(1)]);
    }

    #[test]
    fn test_release_all_on_empty_is_noop() {
        let mut rig = Rig::new(LockingPolicy::TwoPhase, 2, 10);
        let mut p = Process::new(ProcessId(0));
        assert_eq!(p.release_all(1, &mut rig.pool, &mut rig.events), 0);
        assert_eq!(p.release_one(1, &mut rig.pool, &mut rig.events), None);
    }

    #[test]
    fn test_total_waited_survives_timeouts() {
        let mut rig = Rig::new(LockingPolicy::TwoPhase, 2, 1);
        rig.pool.acquire(ResourceId(0), ProcessId(9)).unwrap();
        let mut p = Process::new(ProcessId(0));

        rig.step(&mut p, 1);
        assert_eq!(rig.step(&mut p, 2), StepOutcome::TimedOut);
        rig.step(&mut p, 3);
        assert_eq!(p.waiting_time(), 1);
        assert_eq!(p.total_waited(), 3);
    }
}
