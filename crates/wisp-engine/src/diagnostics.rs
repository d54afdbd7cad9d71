//! Read-only introspection of a running engine
//!
//! [`Engine::snapshot`] copies out carrier, task and counter state without
//! taking any lock a carrier holds while switching tasks, so it is safe to
//! call at any time from any thread. The result serializes to JSON or
//! prints as a thread-dump style report.

use crate::scheduler::{Engine, TaskId, TaskState};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::Ordering;

/// One task at the moment of the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    /// Task id
    pub id: TaskId,
    /// Name
    pub name: String,
    /// Quota group, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Lifecycle state
    pub state: TaskState,
    /// Carrier that last ran or queued it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<usize>,
    /// Interrupt flag is set
    pub interrupted: bool,
    /// Committed parks
    pub park_count: u64,
    /// Times it ran on a carrier other than the one it was queued for
    pub steal_count: u64,
    /// Forced yields
    pub preempt_count: u64,
    /// Run slices started
    pub resume_count: u64,
}

/// One carrier at the moment of the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CarrierSnapshot {
    /// Position in the engine
    pub index: usize,
    /// Name
    pub name: String,
    /// Tasks in the stealable queue and the inbox
    pub queued: usize,
    /// Timers armed or waiting in the timer inbox
    pub armed_timers: usize,
    /// Run slices executed
    pub tasks_run: u64,
    /// Task resumed right now
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<TaskId>,
    /// Parked or waiting in the poller
    pub idle: bool,
    /// Its thread is inside a blocking call with the core set aside
    pub blocking: bool,
    /// Its thread never started
    pub offline: bool,
}

/// Pool-wide counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineCounters {
    /// Tasks submitted
    pub dispatched: u64,
    /// Tasks finished, however they ended
    pub completed: u64,
    /// Tasks taken from a peer carrier
    pub steals: u64,
    /// Cores passed to a spare thread
    pub handoffs: u64,
    /// Cores taken from a thread stuck in a blocking call
    pub retakes: u64,
    /// Forced yields at checkpoints
    pub preemptions: u64,
}

/// Everything [`Engine::snapshot`] reports.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    /// Name
    pub name: String,
    /// Shutdown has been requested
    pub shutdown: bool,
    /// Every engine thread has exited
    pub terminated: bool,
    /// A thread or stack could not be created at some point
    pub degraded: bool,
    /// Tasks not yet finished
    pub live_tasks: usize,
    /// Tasks in the global queue
    pub global_queued: usize,
    /// Threads started for hand-off
    pub spare_threads: usize,
    /// Spare threads waiting for a core
    pub idle_spares: usize,
    /// File descriptors known to the poller
    pub registered_fds: usize,
    /// Pool-wide counters
    pub counters: EngineCounters,
    /// Per-carrier state
    pub carriers: Vec<CarrierSnapshot>,
    /// Live tasks ordered by id
    pub tasks: Vec<TaskSnapshot>,
}

impl EngineSnapshot {
    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Look up a task by id.
    pub fn task(&self, id: TaskId) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Tasks currently in `state`.
    pub fn count_in_state(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }
}

impl Engine {
    /// Copy out the current state of the pool.
    pub fn snapshot(&self) -> EngineSnapshot {
        let shared = self.shared();
        let stats = &shared.stats;

        let carriers = shared
            .carriers
            .iter()
            .map(|c| CarrierSnapshot {
                index: c.index,
                name: c.name.clone(),
                queued: c.queued(),
                armed_timers: c.armed_timers(),
                tasks_run: c.tasks_run(),
                running: c.running_task().map(|t| t.id()),
                idle: c.parker.is_idle(),
                blocking: c.is_blocking(),
                offline: c.offline.load(Ordering::Relaxed),
            })
            .collect();

        let mut tasks: Vec<TaskSnapshot> = shared
            .tasks
            .read()
            .values()
            .map(|task| {
                let carrier = task.carrier();
                TaskSnapshot {
                    id: task.id(),
                    name: task.name().to_string(),
                    group: task.group().map(str::to_string),
                    state: task.state(),
                    carrier: (carrier < shared.carriers.len()).then_some(carrier),
                    interrupted: task.is_interrupted(),
                    park_count: task.park_count(),
                    steal_count: task.steal_count(),
                    preempt_count: task.preempt_count(),
                    resume_count: task.resume_count(),
                }
            })
            .collect();
        tasks.sort_by_key(|t| t.id);

        EngineSnapshot {
            name: shared.name.clone(),
            shutdown: shared.is_shutdown(),
            terminated: shared.is_terminated(),
            degraded: shared.is_degraded(),
            live_tasks: shared.live_tasks(),
            global_queued: shared.global.len(),
            spare_threads: shared.spare_threads(),
            idle_spares: shared.idle_spares(),
            registered_fds: shared.poller.registered_fds(),
            counters: EngineCounters {
                dispatched: stats.dispatched.load(Ordering::Relaxed),
                completed: stats.completed.load(Ordering::Relaxed),
                steals: stats.steals.load(Ordering::Relaxed),
                handoffs: stats.handoffs.load(Ordering::Relaxed),
                retakes: stats.retakes.load(Ordering::Relaxed),
                preemptions: stats.preemptions.load(Ordering::Relaxed),
            },
            carriers,
            tasks,
        }
    }
}

impl fmt::Display for EngineSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.terminated {
            "terminated"
        } else if self.shutdown {
            "shutting down"
        } else {
            "running"
        };
        writeln!(
            f,
            "Engine \"{}\" ({}{}) live={} global={} spares={}/{} fds={}",
            self.name,
            status,
            if self.degraded { ", degraded" } else { "" },
            self.live_tasks,
            self.global_queued,
            self.idle_spares,
            self.spare_threads,
            self.registered_fds,
        )?;
        let c = &self.counters;
        writeln!(
            f,
            "  dispatched={} completed={} steals={} handoffs={} retakes={} preemptions={}",
            c.dispatched, c.completed, c.steals, c.handoffs, c.retakes, c.preemptions
        )?;

        for carrier in &self.carriers {
            let mode = if carrier.offline {
                "offline"
            } else if carrier.blocking {
                "blocking"
            } else if carrier.idle {
                "idle"
            } else {
                "busy"
            };
            write!(
                f,
                "\n\"{}\" {} queued={} timers={} run={}",
                carrier.name, mode, carrier.queued, carrier.armed_timers, carrier.tasks_run
            )?;
            if let Some(id) = carrier.running {
                write!(f, " running=#{}", id)?;
            }
            writeln!(f)?;
            for task in self.tasks.iter().filter(|t| t.carrier == Some(carrier.index)) {
                write_task(f, task)?;
            }
        }

        let unplaced: Vec<_> = self.tasks.iter().filter(|t| t.carrier.is_none()).collect();
        if !unplaced.is_empty() {
            writeln!(f, "\nunplaced")?;
            for task in unplaced {
                write_task(f, task)?;
            }
        }
        Ok(())
    }
}

fn write_task(f: &mut fmt::Formatter<'_>, task: &TaskSnapshot) -> fmt::Result {
    write!(f, "   #{} \"{}\" {}", task.id, task.name, task.state)?;
    if let Some(group) = &task.group {
        write!(f, " group={}", group)?;
    }
    if task.interrupted {
        f.write_str(" interrupted")?;
    }
    writeln!(
        f,
        " parks={} steals={} preempts={} resumes={}",
        task.park_count, task.steal_count, task.preempt_count, task.resume_count
    )
}
