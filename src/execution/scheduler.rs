//! Execution scheduler - decides which job instances run next
//!
//! The scheduler owns the lifecycle of every instance:
//! `pending -> blocked -> ready -> running -> {success, failure, cancelled}`,
//! with `skipped` reachable before `running`. It is plain state, driven by
//! the engine's dispatch loop.

use crate::core::{Condition, EvalScope, ExecutionPlan, RunContext, Status};
use crate::expression::StatusView;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Scheduling state of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub status: Status,
    /// Whether a non-success status fails the run
    pub required: bool,
}

/// What to do with an instance whose predecessors are all terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Ready,
    Skip { reason: String, required: bool },
    Cancel { reason: String },
}

/// A status change made by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub instance: usize,
    pub status: Status,
    pub reason: Option<String>,
}

pub struct ExecutionScheduler {
    slots: Vec<Slot>,
    /// Ready instances in the order they became ready
    ready: VecDeque<usize>,
    /// Running instances per job index
    running: Vec<usize>,
    /// `max-parallel` per job index
    limits: Vec<Option<usize>>,
}

impl ExecutionScheduler {
    pub fn new(plan: &ExecutionPlan) -> Self {
        let slots = plan
            .instances
            .iter()
            .map(|instance| Slot {
                status: Status::Pending,
                required: !plan.workflow.jobs[instance.job].continue_on_error,
            })
            .collect();
        Self {
            slots,
            ready: VecDeque::new(),
            running: vec![0; plan.workflow.jobs.len()],
            limits: plan.workflow.jobs.iter().map(|job| job.max_parallel).collect(),
        }
    }

    pub fn status(&self, instance: usize) -> Status {
        self.slots[instance].status
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Move pending and blocked instances forward until nothing changes
    ///
    /// `admit` is asked about each instance whose predecessors are all
    /// terminal. Instances are visited in declaration order, so instances
    /// that become ready together queue in that order.
    pub fn advance<F>(&mut self, plan: &ExecutionPlan, mut admit: F) -> Vec<Transition>
    where
        F: FnMut(usize, &[Slot]) -> Admission,
    {
        let mut transitions = Vec::new();
        loop {
            let mut changed = false;
            for instance in &plan.instances {
                let i = instance.index;
                if !matches!(self.slots[i].status, Status::Pending | Status::Blocked) {
                    continue;
                }

                let settled = instance
                    .predecessors
                    .iter()
                    .all(|&p| self.slots[p].status.is_terminal());
                if !settled {
                    if self.slots[i].status == Status::Pending {
                        self.slots[i].status = Status::Blocked;
                        transitions.push(Transition {
                            instance: i,
                            status: Status::Blocked,
                            reason: None,
                        });
                    }
                    continue;
                }

                let (status, reason) = match admit(i, &self.slots) {
                    Admission::Ready => {
                        self.ready.push_back(i);
                        (Status::Ready, None)
                    }
                    Admission::Skip { reason, required } => {
                        self.slots[i].required = self.slots[i].required && required;
                        (Status::Skipped, Some(reason))
                    }
                    Admission::Cancel { reason } => (Status::Cancelled, Some(reason)),
                };
                self.slots[i].status = status;
                transitions.push(Transition {
                    instance: i,
                    status,
                    reason,
                });
                changed = true;
            }
            if !changed {
                return transitions;
            }
        }
    }

    /// Cancel ready instances for which `cancelled` holds
    pub fn cancel_ready<F>(&mut self, mut cancelled: F) -> Vec<usize>
    where
        F: FnMut(usize) -> bool,
    {
        let (dropped, kept): (Vec<usize>, Vec<usize>) =
            self.ready.drain(..).partition(|&i| cancelled(i));
        self.ready = kept.into();
        for &i in &dropped {
            self.slots[i].status = Status::Cancelled;
        }
        dropped
    }

    /// Cancel everything that has not started yet
    pub fn cancel_waiting(&mut self) -> Vec<usize> {
        self.ready.clear();
        let mut cancelled = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if matches!(
                slot.status,
                Status::Pending | Status::Blocked | Status::Ready
            ) {
                slot.status = Status::Cancelled;
                cancelled.push(i);
            }
        }
        cancelled
    }

    /// Take the first ready instance whose job is under its `max-parallel`
    pub fn next(&mut self, plan: &ExecutionPlan) -> Option<usize> {
        let position = self.ready.iter().position(|&i| {
            let job = plan.instances[i].job;
            self.limits[job].map_or(true, |limit| self.running[job] < limit)
        })?;
        let instance = self.ready.remove(position)?;
        self.running[plan.instances[instance].job] += 1;
        self.slots[instance].status = Status::Running;
        Some(instance)
    }

    pub fn finish(&mut self, plan: &ExecutionPlan, instance: usize, status: Status, required: bool) {
        let job = plan.instances[instance].job;
        if self.slots[instance].status == Status::Running {
            self.running[job] = self.running[job].saturating_sub(1);
        }
        self.slots[instance] = Slot {
            status,
            required: self.slots[instance].required && required,
        };
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.slots.iter().all(|slot| slot.status.is_terminal())
    }
}

/// Status of an instance's predecessors, as seen by its guard
///
/// A failure in a `continue-on-error` job does not count as a failure.
pub fn predecessor_status(plan: &ExecutionPlan, instance: usize, slots: &[Slot]) -> StatusView {
    let mut view = StatusView::default();
    for &p in &plan.instances[instance].predecessors {
        match slots[p].status {
            Status::Failure if slots[p].required => view.failed = true,
            Status::Cancelled => view.cancelled = true,
            Status::Skipped => view.skipped = true,
            _ => {}
        }
    }
    view
}

/// Continuation policy for a job instance
///
/// By default every predecessor must have succeeded. A guard calling a
/// status function replaces that rule; any other guard is combined with it.
pub fn continuation(
    ctx: &RunContext,
    plan: &ExecutionPlan,
    instance: usize,
    slots: &[Slot],
    env: &BTreeMap<String, String>,
) -> Admission {
    let job = plan.job(instance);
    let status = predecessor_status(plan, instance, slots);
    let upstream_required = plan.instances[instance]
        .predecessors
        .iter()
        .any(|&p| slots[p].status != Status::Success && slots[p].required);

    let guard = job.condition.as_ref().map(|condition: &Condition| {
        let scope = EvalScope::new(ctx, plan, instance, env).with_status(status);
        (condition, condition.expr.evaluate(&scope).is_truthy())
    });

    match guard {
        Some((condition, passed)) if condition.overrides_status() => {
            if passed {
                Admission::Ready
            } else {
                debug!("Guard '{}' false for {}", condition.source, plan.instances[instance].id);
                Admission::Skip {
                    reason: format!("condition '{}' evaluated to false", condition.source),
                    required: false,
                }
            }
        }
        _ if !status.success() => Admission::Skip {
            reason: blocked_reason(plan, instance, slots),
            required: upstream_required,
        },
        Some((condition, false)) => Admission::Skip {
            reason: format!("condition '{}' evaluated to false", condition.source),
            required: false,
        },
        _ => Admission::Ready,
    }
}

fn blocked_reason(plan: &ExecutionPlan, instance: usize, slots: &[Slot]) -> String {
    let unmet: Vec<String> = plan.instances[instance]
        .predecessors
        .iter()
        .filter(|&&p| {
            slots[p].status != Status::Success
                && !(slots[p].status == Status::Failure && !slots[p].required)
        })
        .map(|&p| format!("{} ({})", plan.instances[p].id, slots[p].status))
        .collect();
    format!("needs not satisfied: {}", unmet.join(", "))
}
