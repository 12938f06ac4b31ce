//! Parallel recalculation scheduler.
//!
//! A fixed pool of worker threads drains a shared ready queue seeded with the
//! graph's leaves. Each node carries a count of parents not yet evaluated;
//! the worker that takes a child's count to zero enqueues it. A global work
//! counter, started at the node count, signals completion when it reaches
//! zero. An empty queue on its own means nothing: other workers may still be
//! about to enqueue children.

use crate::cancel::CancellationToken;
use crate::config::RecalcConfig;
use crate::error::{CalcError, CalcResult};
use gridcalc_dag::DependencyGraph;
use gridcalc_primitives::CellLocation;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerOutcome {
    /// Every node was evaluated.
    Completed { evaluated: usize },
    /// Cancelled or out of time; `remaining` nodes were never finished.
    Cancelled { evaluated: usize, remaining: usize },
}

impl SchedulerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SchedulerOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    workers: usize,
    poll_interval: Duration,
    grace_period: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(&RecalcConfig::default())
    }
}

struct SharedState {
    locations: Vec<CellLocation>,
    children: Vec<Vec<usize>>,
    pending_parents: Vec<AtomicUsize>,
    queue: Mutex<VecDeque<usize>>,
    ready: Condvar,
    remaining: AtomicUsize,
    evaluated: AtomicUsize,
    finished: Mutex<bool>,
    finished_signal: Condvar,
    token: CancellationToken,
    poll_interval: Duration,
}

impl SharedState {
    fn new(
        graph: &DependencyGraph,
        leaves: &BTreeSet<CellLocation>,
        token: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        let locations: Vec<CellLocation> = graph.iter().map(|(location, _)| *location).collect();
        let index: HashMap<CellLocation, usize> = locations
            .iter()
            .enumerate()
            .map(|(i, location)| (*location, i))
            .collect();

        let mut children = Vec::with_capacity(locations.len());
        let mut pending_parents = Vec::with_capacity(locations.len());
        for (_, node) in graph.iter() {
            children.push(
                node.children()
                    .iter()
                    .filter_map(|child| index.get(child).copied())
                    .collect(),
            );
            pending_parents.push(AtomicUsize::new(node.parents().len()));
        }

        let queue: VecDeque<usize> = leaves
            .iter()
            .filter_map(|leaf| index.get(leaf).copied())
            .collect();

        Self {
            remaining: AtomicUsize::new(locations.len()),
            locations,
            children,
            pending_parents,
            queue: Mutex::new(queue),
            ready: Condvar::new(),
            evaluated: AtomicUsize::new(0),
            finished: Mutex::new(false),
            finished_signal: Condvar::new(),
            token,
            poll_interval,
        }
    }

    fn next_ready(&self) -> Option<usize> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.ready.wait_for(&mut queue, self.poll_interval);
        }
        queue.pop_front()
    }

    fn enqueue(&self, index: usize) {
        self.queue.lock().push_back(index);
        self.ready.notify_one();
    }

    fn complete_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            *self.finished.lock() = true;
            self.finished_signal.notify_all();
            self.ready.notify_all();
        }
    }

    fn should_stop(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0 || self.token.is_cancelled()
    }
}

fn worker_loop<F>(state: &SharedState, evaluate: &F)
where
    F: Fn(CellLocation),
{
    while !state.should_stop() {
        let Some(index) = state.next_ready() else {
            continue;
        };
        let location = state.locations[index];

        if catch_unwind(AssertUnwindSafe(|| evaluate(location))).is_err() {
            tracing::error!("evaluation of {} panicked", location);
        }
        state.evaluated.fetch_add(1, Ordering::Relaxed);

        for &child in &state.children[index] {
            if state.pending_parents[child].fetch_sub(1, Ordering::AcqRel) == 1 {
                state.enqueue(child);
            }
        }
        state.complete_one();
    }
}

impl Scheduler {
    pub fn new(config: &RecalcConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            poll_interval: config.poll_interval,
            grace_period: config.grace_period,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Evaluate every node of `graph` exactly once, parents before children.
    ///
    /// `evaluate` must contain its own failures; a panic is caught, logged and
    /// the node counts as done. When `token` is cancelled (or its deadline
    /// passes) no further nodes are started; workers still busy after the
    /// grace period are detached and left to finish their current cell.
    pub fn run<F>(
        &self,
        graph: &DependencyGraph,
        leaves: &BTreeSet<CellLocation>,
        evaluate: F,
        token: &CancellationToken,
    ) -> CalcResult<SchedulerOutcome>
    where
        F: Fn(CellLocation) + Send + Sync + 'static,
    {
        if graph.is_empty() {
            return Ok(SchedulerOutcome::Completed { evaluated: 0 });
        }

        let state = Arc::new(SharedState::new(
            graph,
            leaves,
            token.clone(),
            self.poll_interval,
        ));
        let evaluate = Arc::new(evaluate);

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.workers);
        for i in 0..self.workers {
            let worker_state = Arc::clone(&state);
            let worker_evaluate = Arc::clone(&evaluate);
            let spawned = thread::Builder::new()
                .name(format!("recalc-worker-{i}"))
                .spawn(move || worker_loop(&worker_state, worker_evaluate.as_ref()));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    token.cancel();
                    state.ready.notify_all();
                    return Err(CalcError::Worker(format!(
                        "failed to spawn worker {i}: {e}"
                    )));
                }
            }
        }

        let completed = self.wait_for_completion(&state, token);
        if completed {
            for handle in handles {
                if handle.join().is_err() {
                    tracing::error!("recalc worker exited abnormally");
                }
            }
            return Ok(SchedulerOutcome::Completed {
                evaluated: state.evaluated.load(Ordering::Acquire),
            });
        }

        token.cancel();
        state.ready.notify_all();
        let detached = self.drain_workers(handles);
        let evaluated = state.evaluated.load(Ordering::Acquire);
        let remaining = state.remaining.load(Ordering::Acquire);
        tracing::warn!(
            "recalculation cancelled: {} evaluated, {} remaining, {} workers detached",
            evaluated,
            remaining,
            detached
        );
        Ok(SchedulerOutcome::Cancelled {
            evaluated,
            remaining,
        })
    }

    /// Block until the work counter hits zero or the token fires.
    fn wait_for_completion(&self, state: &SharedState, token: &CancellationToken) -> bool {
        let mut finished = state.finished.lock();
        loop {
            if *finished {
                return true;
            }
            if token.is_cancelled() {
                return false;
            }
            let wait = token
                .remaining()
                .map_or(self.poll_interval, |left| left.min(self.poll_interval));
            state.finished_signal.wait_for(&mut finished, wait);
        }
    }

    /// Give workers the grace period to stop, then detach the rest.
    fn drain_workers(&self, handles: Vec<JoinHandle<()>>) -> usize {
        let grace_end = Instant::now() + self.grace_period;
        while handles.iter().any(|h| !h.is_finished()) {
            let now = Instant::now();
            if now >= grace_end {
                break;
            }
            thread::sleep(self.poll_interval.min(grace_end - now));
        }

        let mut detached = 0;
        for handle in handles {
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::error!("recalc worker exited abnormally");
                }
            } else {
                detached += 1;
            }
        }
        detached
    }
}
