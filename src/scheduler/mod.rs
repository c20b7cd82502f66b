//! Process-wide recurring-task runner.
//!
//! Each job is a tokio task ticking at its own interval. Jobs can be added
//! before [`Scheduler::start`]; they begin ticking once the scheduler runs.

mod loop_worker;

pub use loop_worker::{JobCallback, JobFuture};

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::{error, info};
use tokio::{runtime::Handle, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{StationError, StationResult};

use loop_worker::job_loop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub interval: Duration,
}

struct Job {
    name: String,
    callback: JobCallback,
    interval_tx: watch::Sender<Duration>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Job {
    fn spawn(&mut self, runtime: &Handle) {
        let task = job_loop(
            self.name.clone(),
            self.callback.clone(),
            self.interval_tx.subscribe(),
            self.cancel_token.clone(),
        );
        self.handle = Some(runtime.spawn(task));
    }

    fn info(&self, id: JobId) -> JobInfo {
        JobInfo {
            id,
            name: self.name.clone(),
            interval: *self.interval_tx.borrow(),
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    runtime: Option<Handle>,
    jobs: HashMap<JobId, Job>,
    /// Tasks of removed jobs, joined by `shutdown` so a run still in flight
    /// finishes before the process exits.
    retired: Vec<JoinHandle<()>>,
}

#[derive(Clone, Default)]
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts every pending job on the current tokio runtime.
    pub fn start(&self) -> StationResult<()> {
        let runtime = Handle::try_current().map_err(|err| {
            StationError::scheduling(format!("scheduler needs a tokio runtime: {err}"))
        })?;

        let mut state = self.lock();
        if state.runtime.is_some() {
            return Ok(());
        }

        for job in state.jobs.values_mut() {
            job.spawn(&runtime);
        }
        info!("Scheduler started with {} job(s)", state.jobs.len());
        state.runtime = Some(runtime);
        Ok(())
    }

    /// Cancels every job and waits for in-flight runs to finish.
    pub async fn shutdown(&self) {
        let (jobs, retired): (Vec<Job>, Vec<JoinHandle<()>>) = {
            let mut state = self.lock();
            state.runtime = None;
            let jobs = state.jobs.drain().map(|(_, job)| job).collect();
            (jobs, std::mem::take(&mut state.retired))
        };

        for job in &jobs {
            job.cancel_token.cancel();
        }
        for job in jobs {
            if let Some(handle) = job.handle {
                if let Err(err) = handle.await {
                    error!("job {} failed to join: {err}", job.name);
                }
            }
        }
        for handle in retired {
            if let Err(err) = handle.await {
                error!("removed job failed to join: {err}");
            }
        }
        info!("Scheduler shut down");
    }

    pub fn is_running(&self) -> bool {
        self.lock().runtime.is_some()
    }

    pub fn add_job<F, Fut>(
        &self,
        name: impl Into<String>,
        every: Duration,
        callback: F,
    ) -> StationResult<JobId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if every.is_zero() {
            return Err(StationError::scheduling("job interval must be positive"));
        }

        let callback: JobCallback = Arc::new(move || Box::pin(callback()) as JobFuture);
        let (interval_tx, _) = watch::channel(every);
        let mut job = Job {
            name: name.into(),
            callback,
            interval_tx,
            cancel_token: CancellationToken::new(),
            handle: None,
        };

        let id = JobId(Uuid::new_v4());
        let mut state = self.lock();
        if let Some(runtime) = state.runtime.as_ref() {
            job.spawn(runtime);
        }
        info!("Scheduled job {} every {every:?}", job.name);
        state.jobs.insert(id, job);
        Ok(id)
    }

    pub fn reschedule(&self, id: JobId, every: Duration) -> StationResult<()> {
        if every.is_zero() {
            return Err(StationError::scheduling("job interval must be positive"));
        }

        let state = self.lock();
        let job = state
            .jobs
            .get(&id)
            .ok_or_else(|| StationError::scheduling(format!("no job with id {id}")))?;
        job.interval_tx.send_replace(every);
        info!("Rescheduled job {} every {every:?}", job.name);
        Ok(())
    }

    /// Cancels the job. No run starts after this returns; a run already in
    /// flight completes, and [`shutdown`](Self::shutdown) waits for it.
    /// Removing an unknown job does nothing.
    pub fn remove(&self, id: JobId) {
        let mut state = self.lock();
        let Some(job) = state.jobs.remove(&id) else {
            return;
        };
        job.cancel_token.cancel();
        state.retired.retain(|handle| !handle.is_finished());
        if let Some(handle) = job.handle {
            state.retired.push(handle);
        }
        info!("Removed job {}", job.name);
    }

    pub fn interval(&self, id: JobId) -> Option<Duration> {
        self.lock()
            .jobs
            .get(&id)
            .map(|job| *job.interval_tx.borrow())
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        let state = self.lock();
        let mut jobs: Vec<JobInfo> = state.jobs.iter().map(|(id, job)| job.info(*id)).collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
