//! Drives one phase of a job to completion over an unreliable worker pool.
//!
//! Tasks wait in a pending queue, idle workers arrive on an [`IdleWorkers`]
//! stream, and every assignment runs as its own tokio task. A successful
//! call hands its worker back to the stream; a failed call puts the task
//! back in the queue and forgets the worker, which has to register again
//! to be used.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tonic::async_trait;

use super::common::{JobPhase, TaskArgs};

/// Issues one `DoTask` call to a worker.
#[async_trait]
pub trait TaskCaller: Send + Sync {
    async fn do_task(&self, worker: &str, args: TaskArgs) -> Result<(), anyhow::Error>;
}

/// What one phase consists of.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    job_name: String,
    phase: JobPhase,
    files: Vec<String>,
    n_tasks: usize,
    n_other: usize,
}

impl PhasePlan {
    /// One map task per input file, each partitioning into `n_reduce`.
    pub fn map(job_name: &str, files: &[String], n_reduce: usize) -> Self {
        PhasePlan {
            job_name: job_name.to_string(),
            phase: JobPhase::Map,
            files: files.to_vec(),
            n_tasks: files.len(),
            n_other: n_reduce,
        }
    }

    /// `n_reduce` reduce tasks, each reading from `n_map` map outputs.
    pub fn reduce(job_name: &str, n_map: usize, n_reduce: usize) -> Self {
        PhasePlan {
            job_name: job_name.to_string(),
            phase: JobPhase::Reduce,
            files: Vec::new(),
            n_tasks: n_reduce,
            n_other: n_map,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn n_tasks(&self) -> usize {
        self.n_tasks
    }

    pub fn n_other(&self) -> usize {
        self.n_other
    }

    pub fn task(&self, task_number: usize) -> TaskArgs {
        let file = match self.phase {
            JobPhase::Map => self.files[task_number].clone(),
            JobPhase::Reduce => String::new(),
        };
        TaskArgs {
            job_name: self.job_name.clone(),
            file,
            phase: self.phase,
            task_number,
            num_other_phase: self.n_other,
        }
    }
}

/// The stream of idle worker addresses.
///
/// Owned by whoever drives the job and lent to [`schedule`] for one phase at
/// a time. Addresses are pushed through [`Registrar`] handles: by the
/// registration service when a worker shows up and by the scheduler when a
/// worker finishes a task. The same address may be pushed many times.
pub struct IdleWorkers {
    sender: mpsc::UnboundedSender<String>,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl IdleWorkers {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        IdleWorkers { sender, receiver }
    }

    pub fn registrar(&self) -> Registrar {
        Registrar { sender: self.sender.clone() }
    }

    /// Takes an idle worker if one is waiting, without suspending.
    pub fn try_next(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }

    async fn next(&mut self) -> Option<String> {
        // never None: we hold a sender ourselves
        self.receiver.recv().await
    }
}

impl Default for IdleWorkers {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct Registrar {
    sender: mpsc::UnboundedSender<String>,
}

impl Registrar {
    pub fn register(&self, worker: impl Into<String>) {
        // receiver gone means nobody will schedule anything any more
        let _ = self.sender.send(worker.into());
    }
}

/// Counters of one finished phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub n_tasks: usize,
    /// Calls issued, including retries.
    pub attempts: usize,
    pub failures: usize,
    /// Successes observed for a task that had already succeeded.
    pub duplicate_successes: usize,
}

/// First-success bookkeeping for one phase.
#[derive(Debug)]
struct PhaseProgress {
    done: Vec<bool>,
    remaining: usize,
}

impl PhaseProgress {
    fn new(n_tasks: usize) -> Self {
        PhaseProgress { done: vec![false; n_tasks], remaining: n_tasks }
    }

    /// Records a success of `task`. Returns false if it had succeeded before.
    fn complete(&mut self, task: usize) -> bool {
        if self.done[task] {
            return false;
        }
        self.done[task] = true;
        self.remaining -= 1;
        true
    }

    fn is_complete(&self, task: usize) -> bool {
        self.done[task]
    }

    fn is_done(&self) -> bool {
        self.remaining == 0
    }
}

struct Outcome {
    task: usize,
    worker: String,
    result: Result<(), anyhow::Error>,
}

/// Runs every task of `plan` on the workers coming out of `workers` and
/// returns once each task has succeeded at least once.
///
/// Failures are never reported to the caller: a failed task is retried for
/// as long as it takes. If no worker ever becomes idle again this waits
/// forever. Calls still in flight when the phase completes are left to
/// finish on their own; a worker that succeeds late still goes back to
/// `workers`.
pub async fn schedule(plan: &PhasePlan, workers: &mut IdleWorkers, caller: Arc<dyn TaskCaller>) -> PhaseReport {
    let n_tasks = plan.n_tasks();
    log::info!("Schedule: {} {} tasks ({} I/Os)", n_tasks, plan.phase(), plan.n_other());

    let mut report = PhaseReport { n_tasks, ..Default::default() };
    let mut progress = PhaseProgress::new(n_tasks);
    let mut pending: VecDeque<usize> = (0..n_tasks).collect();
    let (outcome_sender, mut outcomes) = mpsc::unbounded_channel::<Outcome>();
    let registrar = workers.registrar();

    while !progress.is_done() {
        tokio::select! {
            Some(outcome) = outcomes.recv() => {
                let Outcome { task, worker, result } = outcome;
                match result {
                    Ok(()) => {
                        if progress.complete(task) {
                            log::debug!("{} task#{} done on {}", plan.phase(), task, worker);
                        } else {
                            report.duplicate_successes += 1;
                            log::debug!("{} task#{} done again on {}", plan.phase(), task, worker);
                        }
                    }
                    Err(e) => {
                        report.failures += 1;
                        log::warn!("{} task#{} failed on {}: {:#}", plan.phase(), task, worker, e);
                        if !progress.is_complete(task) {
                            pending.push_back(task);
                        }
                    }
                }
            }
            Some(worker) = workers.next(), if !pending.is_empty() => {
                let Some(task) = pending.pop_front() else {
                    registrar.register(worker);
                    continue;
                };
                report.attempts += 1;
                log::debug!("dispatching {} task#{} to {}", plan.phase(), task, worker);
                tokio::spawn(dispatch(
                    caller.clone(),
                    worker,
                    plan.task(task),
                    registrar.clone(),
                    outcome_sender.clone(),
                ));
            }
        }
    }

    log::info!("Schedule: {} phase done ({} attempts, {} failures)",
               plan.phase(), report.attempts, report.failures);
    report
}

async fn dispatch(
    caller: Arc<dyn TaskCaller>,
    worker: String,
    args: TaskArgs,
    registrar: Registrar,
    outcomes: mpsc::UnboundedSender<Outcome>,
) {
    let task = args.task_number;
    let result = caller.do_task(&worker, args).await;
    if result.is_ok() {
        registrar.register(worker.clone());
    }
    // the phase may already be over
    let _ = outcomes.send(Outcome { task, worker, result });
}
