use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::app::{DefaultFailedJobHandler, FailedJobHandler};
use weft_core::impls::{InMemoryWorkflowStore, TracingEventSink};
use weft_core::ports::{SystemClock, UlidGenerator};
use weft_core::{
    JobId, JobState, StateContext, StoreConfig, WorkflowError, WorkflowId, WorkflowRegistrar,
    WorkflowSpec, WorkflowState,
};

const WORKFLOW: &str = r#"{
    "name": "release",
    "steps": [
        { "id": "build" },
        { "id": "test", "dependencies": ["build"] },
        { "id": "package", "dependencies": ["build", "test"] },
        { "id": "publish", "dependencies": ["package"], "manual": true }
    ]
}"#;

const WORKERS: usize = 3;
const MAX_ATTEMPTS: u32 = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const APPROVAL_DELAY: Duration = Duration::from_millis(300);

/// job 本体
#[async_trait]
trait StepHandler: Send + Sync {
    async fn run(&self, job: &JobState) -> Result<(), String>;
}

/// 指定した job だけ最初の n 回失敗する
struct FlakyStep {
    flaky: JobId,
    remaining_failures: AtomicU32,
}

impl FlakyStep {
    fn new(flaky: impl Into<JobId>, n: u32) -> Self {
        Self {
            flaky: flaky.into(),
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl StepHandler for FlakyStep {
    async fn run(&self, job: &JobState) -> Result<(), String> {
        sleep(Duration::from_millis(20)).await;

        if job.id() == &self.flaky {
            let left = self.remaining_failures.load(Ordering::Relaxed);
            if left > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
                return Err(format!("boom (left={left})"));
            }
        }

        println!("ran {}", job.id());
        Ok(())
    }
}

type Queue = Arc<Mutex<mpsc::Receiver<JobId>>>;

/// worker：job を実行し、結果を WorkflowState 経由で報告する
async fn worker_loop(
    worker: usize,
    ctx: StateContext,
    workflow_id: WorkflowId,
    queue: Queue,
    handler: Arc<dyn StepHandler>,
    on_failure: Arc<dyn FailedJobHandler>,
) {
    loop {
        let Some(job_id) = queue.lock().await.recv().await else {
            break;
        };
        info!(worker, job_id = %job_id, "picked up job");

        if let Err(err) = run_job(&ctx, workflow_id, &job_id, &*handler, &*on_failure).await {
            warn!(worker, job_id = %job_id, error = %err, "could not report job result");
        }
    }
}

async fn run_job(
    ctx: &StateContext,
    workflow_id: WorkflowId,
    job_id: &JobId,
    handler: &dyn StepHandler,
    on_failure: &dyn FailedJobHandler,
) -> Result<(), WorkflowError> {
    let mut workflow = WorkflowState::load(ctx.clone(), workflow_id).await?;
    let mut job = JobState::load(ctx.clone(), workflow_id, job_id).await?;
    let result = handler.run(&job).await;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let reported = match &result {
            Ok(()) => workflow.mark_job_as_finished(&mut job).await,
            Err(exception) => on_failure.handle(&mut workflow, &mut job, exception).await,
        };
        match reported {
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!(job_id = %job_id, attempt, error = %err, "retrying report");
                sleep(POLL_INTERVAL).await;
            }
            other => return other,
        }
    }
}

/// 承認待ちの manual job を、少し待ってから解放する
fn approve_later(ctx: StateContext, workflow_id: WorkflowId, job_id: JobId, tx: mpsc::Sender<JobId>) {
    tokio::spawn(async move {
        sleep(APPROVAL_DELAY).await;
        let released = async {
            let mut job = JobState::load(ctx, workflow_id, &job_id).await?;
            job.mark_as_processing().await?;
            Ok::<_, WorkflowError>(())
        }
        .await;
        match released {
            Ok(()) => {
                info!(job_id = %job_id, "manual job approved");
                let _ = tx.send(job_id).await;
            }
            Err(err) => warn!(job_id = %job_id, error = %err, "could not release manual job"),
        }
    });
}

/// orchestrator：実行可能な job を探して worker に渡す
async fn orchestrate(
    ctx: &StateContext,
    workflow: &mut WorkflowState,
    tx: mpsc::Sender<JobId>,
) -> Result<(), WorkflowError> {
    let mut attempts: HashMap<JobId, u32> = HashMap::new();

    loop {
        workflow.refresh().await?;
        if workflow.all_jobs_have_finished() {
            return workflow.mark_as_finished().await;
        }

        let mut in_flight = false;
        for mut job in workflow.jobs().await? {
            if job.is_processing() || job.is_gated() {
                in_flight = true;
                continue;
            }

            let tried = attempts.get(job.id()).copied().unwrap_or(0);
            if job.has_failed() {
                if tried >= MAX_ATTEMPTS {
                    continue;
                }
            } else if !job.is_pending() || !workflow.can_run(&job) {
                continue;
            }

            in_flight = true;
            if job.record().manual && job.is_pending() {
                job.mark_as_gated().await?;
                approve_later(ctx.clone(), workflow.id(), job.id().clone(), tx.clone());
                continue;
            }

            attempts.insert(job.id().clone(), tried + 1);
            job.mark_as_processing().await?;
            if tx.send(job.id().clone()).await.is_err() {
                warn!("all workers are gone");
                return Ok(());
            }
        }

        if !in_flight {
            warn!(
                workflow_id = %workflow.id(),
                remaining = workflow.remaining_jobs(),
                "workflow cannot make progress"
            );
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) store と状態機械の文脈を用意
    let store = Arc::new(InMemoryWorkflowStore::with_config(StoreConfig::from_env()));
    let ctx = StateContext::new(store).with_events(Arc::new(TracingEventSink));

    // (B) workflow を登録
    let spec = match WorkflowSpec::from_json(WORKFLOW) {
        Ok(spec) => spec,
        Err(err) => {
            eprintln!("invalid workflow definition: {err}");
            return;
        }
    };
    let registrar = WorkflowRegistrar::new(ctx.clone(), Arc::new(UlidGenerator::new(SystemClock)));
    let (mut workflow, _jobs) = match registrar.register(spec).await {
        Ok(registered) => registered,
        Err(err) => {
            eprintln!("could not register workflow: {err}");
            return;
        }
    };

    // (C) worker を起動
    let (tx, rx) = mpsc::channel::<JobId>(16);
    let queue: Queue = Arc::new(Mutex::new(rx));
    let handler: Arc<dyn StepHandler> = Arc::new(FlakyStep::new("test", 1));
    let on_failure: Arc<dyn FailedJobHandler> = Arc::new(DefaultFailedJobHandler);
    let workers: Vec<_> = (0..WORKERS)
        .map(|n| {
            tokio::spawn(worker_loop(
                n,
                ctx.clone(),
                workflow.id(),
                queue.clone(),
                handler.clone(),
                on_failure.clone(),
            ))
        })
        .collect();

    // (D) 完了まで回す
    if let Err(err) = orchestrate(&ctx, &mut workflow, tx).await {
        eprintln!("orchestrator failed: {err}");
    }
    for worker in workers {
        let _ = worker.await;
    }

    // (E) 結果表示
    let record = workflow.record();
    println!(
        "workflow {} finished={} processed={}/{} failed={}",
        record.id,
        workflow.is_finished(),
        record.jobs_processed,
        record.job_count,
        record.jobs_failed
    );
    match serde_json::to_string_pretty(record) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("could not render workflow: {err}"),
    }
}
