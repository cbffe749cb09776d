//! Workflow runtime.
//!
//! Each named workflow is one idempotent activity on [`MirrorManager`]. The
//! [`WorkflowRunner`] records every run in the store, applies the activity's
//! timeout and retries retryable failures with exponential backoff. The
//! [`WorkflowQueue`] puts a pool of workers in front of the runner, one queue
//! per workflow kind, and can re-submit a request on an interval.

use crate::config::WorkflowConfig;
use crate::cursor::PollReport;
use crate::error::{MirrorError, Result};
use crate::manager::{BlockReport, EmitReport, MatchReport, MatchRequest, MirrorManager};
use crate::models::RunStatus;
use crate::store::RunRepository;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{RetryDecision, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

const QUEUE_CAPACITY: usize = 64;

/// A unit of work, as persisted in `workflow_runs.request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "workflow", rename_all = "snake_case")]
pub enum WorkflowRequest {
    PollUpstreamAdvisories,
    MatchMirrors(MatchRequest),
    EmitUpdateinfo { out_dir: PathBuf },
    /// Retire a supported product by blocking everything it still matches.
    BlockRemainingAdvisories { supported_product_id: i64 },
}

impl WorkflowRequest {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Self::PollUpstreamAdvisories => WorkflowKind::PollUpstreamAdvisories,
            Self::MatchMirrors(_) => WorkflowKind::MatchMirrors,
            Self::EmitUpdateinfo { .. } => WorkflowKind::EmitUpdateinfo,
            Self::BlockRemainingAdvisories { .. } => WorkflowKind::BlockRemainingAdvisories,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowKind {
    PollUpstreamAdvisories,
    MatchMirrors,
    EmitUpdateinfo,
    BlockRemainingAdvisories,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 4] = [
        Self::PollUpstreamAdvisories,
        Self::MatchMirrors,
        Self::EmitUpdateinfo,
        Self::BlockRemainingAdvisories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PollUpstreamAdvisories => "poll_upstream_advisories",
            Self::MatchMirrors => "match_mirrors",
            Self::EmitUpdateinfo => "emit_updateinfo",
            Self::BlockRemainingAdvisories => "block_remaining_advisories",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowReport {
    Poll(PollReport),
    Match(MatchReport),
    Emit(EmitReport),
    Block(BlockReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: i64,
    pub attempts: i32,
    pub report: WorkflowReport,
}

pub struct WorkflowRunner {
    manager: Arc<MirrorManager>,
    config: WorkflowConfig,
    policy: ExponentialBackoff,
}

impl WorkflowRunner {
    pub fn new(manager: Arc<MirrorManager>, config: WorkflowConfig) -> Self {
        let min = config.retry_min_backoff.min(config.retry_max_backoff);
        let policy = ExponentialBackoff::builder()
            .retry_bounds(min, config.retry_max_backoff)
            .build_with_max_retries(config.max_retries);
        Self {
            manager,
            config,
            policy,
        }
    }

    pub fn manager(&self) -> &Arc<MirrorManager> {
        &self.manager
    }

    fn timeout(&self, kind: WorkflowKind) -> Duration {
        match kind {
            WorkflowKind::PollUpstreamAdvisories => self.config.poll_timeout,
            WorkflowKind::MatchMirrors
            | WorkflowKind::EmitUpdateinfo
            | WorkflowKind::BlockRemainingAdvisories => self.config.match_timeout,
        }
    }

    /// Execute `request` and persist the run.
    ///
    /// The returned error is the last attempt's; the run row is already
    /// marked `failed` by then.
    #[instrument(skip(self), fields(workflow = request.kind().as_str()))]
    pub async fn run(&self, request: WorkflowRequest) -> Result<RunOutcome> {
        let store = self.manager.store();
        let run_id = store
            .start_run(request.kind().as_str(), &serde_json::to_string(&request)?)
            .await?;

        let (attempts, result) = self.execute(&request).await;
        match result {
            Ok(report) => {
                let output = serde_json::to_string(&report)?;
                store
                    .finish_run(run_id, RunStatus::Succeeded, attempts, Some(output), None)
                    .await?;
                info!("Run {} succeeded after {} attempt(s)", run_id, attempts);
                Ok(RunOutcome {
                    run_id,
                    attempts,
                    report,
                })
            }
            Err(e) => {
                error!("Run {} failed after {} attempt(s): {}", run_id, attempts, e);
                store
                    .finish_run(run_id, RunStatus::Failed, attempts, None, Some(e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    async fn execute(&self, request: &WorkflowRequest) -> (i32, Result<WorkflowReport>) {
        let started = SystemTime::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.attempt(request).await {
                Ok(report) => return (attempts, Ok(report)),
                Err(e) if e.is_retryable() => e,
                Err(e) => return (attempts, Err(e)),
            };
            let past_retries = u32::try_from(attempts - 1).unwrap_or(u32::MAX);
            match self.policy.should_retry(started, past_retries) {
                RetryDecision::Retry { execute_after } => {
                    let wait = execute_after
                        .duration_since(SystemTime::now())
                        .unwrap_or_default();
                    warn!("Attempt {} failed: {}; retrying in {:?}", attempts, err, wait);
                    tokio::time::sleep(wait).await;
                }
                RetryDecision::DoNotRetry => return (attempts, Err(err)),
            }
        }
    }

    async fn attempt(&self, request: &WorkflowRequest) -> Result<WorkflowReport> {
        let window = self.timeout(request.kind());
        let work = async {
            match request {
                WorkflowRequest::PollUpstreamAdvisories => {
                    self.manager.poll_upstream().await.map(WorkflowReport::Poll)
                }
                WorkflowRequest::MatchMirrors(scope) => {
                    self.manager.match_mirrors(scope).await.map(WorkflowReport::Match)
                }
                WorkflowRequest::EmitUpdateinfo { out_dir } => {
                    self.manager.emit_updateinfo(out_dir).await.map(WorkflowReport::Emit)
                }
                WorkflowRequest::BlockRemainingAdvisories {
                    supported_product_id,
                } => self
                    .manager
                    .block_remaining(*supported_product_id)
                    .await
                    .map(WorkflowReport::Block),
            }
        };
        tokio::time::timeout(window, work)
            .await
            .map_err(|_| MirrorError::Timeout(window))?
    }

    /// Re-run whatever a previous process left `running`.
    ///
    /// Call before any worker starts; a live run would be treated as crashed.
    /// Returns the number of runs re-executed successfully.
    pub async fn resume_interrupted(&self) -> Result<usize> {
        let store = self.manager.store();
        let interrupted = store.list_runs_with_status(RunStatus::Running).await?;
        let mut resumed = 0;
        for run in interrupted {
            store
                .finish_run(
                    run.id,
                    RunStatus::Abandoned,
                    run.attempts,
                    None,
                    Some("interrupted".to_string()),
                )
                .await?;
            let request: WorkflowRequest = match serde_json::from_str(&run.request) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Dropping run {} with unreadable request: {}", run.id, e);
                    continue;
                }
            };
            info!("Resuming {} from run {}", run.workflow, run.id);
            if self.run(request).await.is_ok() {
                resumed += 1;
            }
        }
        Ok(resumed)
    }
}

struct Job {
    request: WorkflowRequest,
    reply: oneshot::Sender<Result<RunOutcome>>,
}

pub struct WorkflowQueue {
    senders: RwLock<HashMap<WorkflowKind, mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkflowQueue {
    /// Spawn `workers` workers for every workflow kind.
    pub fn start(runner: Arc<WorkflowRunner>, workers: usize) -> Self {
        let mut senders = HashMap::new();
        let mut handles = Vec::new();
        for kind in WorkflowKind::ALL {
            let (tx, rx) = mpsc::channel::<Job>(QUEUE_CAPACITY);
            let rx = Arc::new(Mutex::new(rx));
            for worker in 0..workers.max(1) {
                let runner = Arc::clone(&runner);
                let rx = Arc::clone(&rx);
                handles.push(tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };
                        let outcome = runner.run(job.request).await;
                        if job.reply.send(outcome).is_err() {
                            debug!("{} worker {}: submitter went away", kind.as_str(), worker);
                        }
                    }
                    debug!("{} worker {} stopped", kind.as_str(), worker);
                }));
            }
            senders.insert(kind, tx);
        }
        Self {
            senders: RwLock::new(senders),
            workers: Mutex::new(handles),
        }
    }

    /// Queue `request` and wait for its run to finish.
    pub async fn submit(&self, request: WorkflowRequest) -> Result<RunOutcome> {
        let kind = request.kind();
        let sender = self
            .senders
            .read()
            .await
            .get(&kind)
            .cloned()
            .ok_or_else(|| MirrorError::Queue(format!("{} queue is closed", kind.as_str())))?;

        let (reply, outcome) = oneshot::channel();
        sender
            .send(Job { request, reply })
            .await
            .map_err(|_| MirrorError::Queue(format!("{} queue is closed", kind.as_str())))?;
        outcome
            .await
            .map_err(|_| MirrorError::Queue(format!("{} worker dropped the run", kind.as_str())))?
    }

    /// Submit `request` every `every` until the queue shuts down.
    pub fn schedule(self: &Arc<Self>, request: WorkflowRequest, every: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match queue.submit(request.clone()).await {
                    Ok(outcome) => debug!("Scheduled run {} finished", outcome.run_id),
                    Err(MirrorError::Queue(reason)) => {
                        info!("Stopping schedule: {}", reason);
                        break;
                    }
                    Err(e) => warn!("Scheduled {} failed: {}", request.kind().as_str(), e),
                }
            }
        })
    }

    /// Close every queue and wait for in-flight runs to finish.
    pub async fn shutdown(&self) {
        self.senders.write().await.clear();
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker ended abnormally: {}", e);
            }
        }
    }
}
