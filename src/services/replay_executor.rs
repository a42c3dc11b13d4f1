//! Replay executor: deterministic execution of a trace's step DAG.
//!
//! Steps become eligible as soon as every dependency has reached a
//! terminal state; eligible steps run concurrently on a bounded task
//! pool. A step waiting out its retry delay occupies only its own slot,
//! so unrelated branches keep flowing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, timeout, Duration, Instant};
use uuid::Uuid;

use crate::domain::errors::{TraceError, TraceResult};
use crate::domain::models::{
    BindingTable, ErrorPolicy, ExecutionTrace, Outcome, ReplayConfig, Step, StepStatus,
};
use crate::domain::ports::{ToolRunner, TraceRepository};

/// Trace-level result of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStatus {
    /// Every non-skipped step succeeded.
    Success,
    /// A step failed after exhausting its error policy, or a fail-policy
    /// step aborted the replay.
    Failed,
    /// Cancelled by the caller or by the trace-level timeout. Not
    /// reported to the store as failure evidence.
    Cancelled,
    /// An escalate-policy step asked the dispatcher to retry the goal in
    /// learner mode.
    Escalated,
}

/// Per-step result.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step_id: Uuid,
    pub tool_name: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Full replay report handed back to the dispatcher.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub trace_id: Uuid,
    pub status: ReplayStatus,
    /// Reports in trace step order. Steps never started remain Pending.
    pub step_reports: Vec<StepReport>,
    /// The step whose failure ended the replay, if any.
    pub failed_step: Option<Uuid>,
    /// Error surfaced by the failing step.
    pub error: Option<String>,
    /// Steps whose side effects had already committed (reached Success).
    pub committed: Vec<Uuid>,
    pub duration_ms: u64,
}

/// What a finished step task reports back to the scheduler.
struct StepRun {
    step_id: Uuid,
    status: StepStatus,
    output: Option<serde_json::Value>,
    error: Option<String>,
    attempts: u32,
    duration_ms: u64,
    abort: Option<AbortSignal>,
}

enum AbortSignal {
    Fail(String),
    Escalate,
}

/// Executes trace DAGs against the tool abstraction and reports outcomes
/// to the store.
pub struct ReplayExecutor<R>
where
    R: TraceRepository + 'static,
{
    repo: Arc<R>,
    tools: Arc<dyn ToolRunner>,
    config: ReplayConfig,
    confidence: crate::domain::models::ConfidenceParams,
}

impl<R> ReplayExecutor<R>
where
    R: TraceRepository + 'static,
{
    pub fn new(
        repo: Arc<R>,
        tools: Arc<dyn ToolRunner>,
        config: ReplayConfig,
        confidence: crate::domain::models::ConfidenceParams,
    ) -> Self {
        Self { repo, tools, config, confidence }
    }

    /// Create a cancellation channel for [`Self::execute_with_cancel`].
    pub fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    /// Replay a trace to completion.
    pub async fn execute(
        &self,
        trace: &ExecutionTrace,
        context: Option<&str>,
    ) -> TraceResult<ReplayReport> {
        let (_cancel_tx, cancel_rx) = Self::cancel_channel();
        self.execute_with_cancel(trace, context, cancel_rx).await
    }

    /// Replay a trace; sending `true` on the paired channel cancels the
    /// replay, abandoning in-flight steps and discarding partial output.
    pub async fn execute_with_cancel(
        &self,
        trace: &ExecutionTrace,
        context: Option<&str>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> TraceResult<ReplayReport> {
        trace.validate()?;

        let started = Instant::now();
        let deadline = started + self.trace_timeout(trace);
        let step_timeout = Duration::from_secs(self.config.step_timeout_secs);

        let mut statuses: HashMap<Uuid, StepStatus> =
            trace.steps.iter().map(|s| (s.id, StepStatus::Pending)).collect();
        // For skipped steps: whether dependents may continue with the
        // unavailable sentinel.
        let mut continue_flags: HashMap<Uuid, bool> = HashMap::new();
        let mut bindings = BindingTable::new();
        let mut runs: HashMap<Uuid, StepRun> = HashMap::new();
        let mut spawned: HashSet<Uuid> = HashSet::new();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut join_set: JoinSet<StepRun> = JoinSet::new();

        let mut abort: Option<(ReplayStatus, Uuid, String)> = None;
        let mut cancelled: Option<String> = None;
        let mut cancel_open = true;

        'schedule: loop {
            // Cascade skips and spawn every step that became ready.
            let mut progressed = true;
            while progressed {
                progressed = false;
                for step in &trace.steps {
                    if statuses[&step.id] != StepStatus::Pending || spawned.contains(&step.id) {
                        continue;
                    }
                    if !step.depends_on.iter().all(|d| statuses[d].is_terminal()) {
                        continue;
                    }

                    let blocked_by_skip = step.depends_on.iter().any(|d| {
                        statuses[d] == StepStatus::Skipped
                            && !continue_flags.get(d).copied().unwrap_or(false)
                    });
                    if blocked_by_skip {
                        statuses.insert(step.id, StepStatus::Skipped);
                        continue_flags.insert(step.id, false);
                        runs.insert(step.id, StepRun {
                            step_id: step.id,
                            status: StepStatus::Skipped,
                            output: None,
                            error: Some("skipped: upstream step was skipped".to_string()),
                            attempts: 0,
                            duration_ms: 0,
                            abort: None,
                        });
                        progressed = true;
                        continue;
                    }

                    let params = match bindings.resolve(step) {
                        Ok(p) => p,
                        Err(e) => {
                            abort = Some((ReplayStatus::Failed, step.id, e.to_string()));
                            break;
                        }
                    };

                    tracing::debug!(step_id = %step.id, tool = step.tool_name.as_str(), "step ready");
                    spawned.insert(step.id);
                    statuses.insert(step.id, StepStatus::Running);

                    let tools = self.tools.clone();
                    let semaphore = semaphore.clone();
                    let step = step.clone();
                    join_set.spawn(async move {
                        run_step(step, params, tools, semaphore, step_timeout).await
                    });
                }
                if abort.is_some() {
                    break;
                }
            }

            if abort.is_some() {
                join_set.abort_all();
                break 'schedule;
            }
            if trace.steps.iter().all(|s| statuses[&s.id].is_terminal()) {
                break 'schedule;
            }

            tokio::select! {
                changed = cancel_rx.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancel_rx.borrow() => {
                            cancelled = Some("cancelled by caller".to_string());
                            join_set.abort_all();
                            break 'schedule;
                        }
                        Ok(()) => {}
                        // Sender dropped: cancellation can no longer arrive.
                        Err(_) => cancel_open = false,
                    }
                }
                _ = sleep_until(deadline) => {
                    cancelled = Some(format!(
                        "trace timeout exceeded ({:.0}s)",
                        self.trace_timeout(trace).as_secs_f64()
                    ));
                    join_set.abort_all();
                    break 'schedule;
                }
                Some(joined) = join_set.join_next() => {
                    match joined {
                        Ok(run) => {
                            statuses.insert(run.step_id, run.status);
                            match run.status {
                                StepStatus::Success => {
                                    if let Some(ref output) = run.output {
                                        bindings.bind(run.step_id, output.clone());
                                    }
                                }
                                StepStatus::Skipped => {
                                    let continues = trace
                                        .steps
                                        .iter()
                                        .find(|s| s.id == run.step_id)
                                        .map(|s| matches!(
                                            s.error_policy,
                                            ErrorPolicy::Skip { continue_on_skip: true }
                                        ))
                                        .unwrap_or(false);
                                    continue_flags.insert(run.step_id, continues);
                                    if continues {
                                        bindings.mark_unavailable(run.step_id);
                                    }
                                }
                                StepStatus::Failed => {
                                    let (status, message) = match run.abort {
                                        Some(AbortSignal::Escalate) => (
                                            ReplayStatus::Escalated,
                                            "escalated to learner mode".to_string(),
                                        ),
                                        Some(AbortSignal::Fail(ref m)) => {
                                            (ReplayStatus::Failed, m.clone())
                                        }
                                        None => (
                                            ReplayStatus::Failed,
                                            run.error.clone().unwrap_or_else(|| {
                                                "step failed".to_string()
                                            }),
                                        ),
                                    };
                                    abort = Some((status, run.step_id, message));
                                }
                                _ => {}
                            }
                            runs.insert(run.step_id, run);
                            if abort.is_some() {
                                join_set.abort_all();
                                break 'schedule;
                            }
                        }
                        Err(join_err) if join_err.is_cancelled() => {}
                        Err(join_err) => {
                            return Err(TraceError::ExecutionFailed(format!(
                                "step task failed: {join_err}"
                            )));
                        }
                    }
                }
            }
        }

        let status = if let Some(reason) = &cancelled {
            tracing::info!(trace_id = %trace.id, reason = reason.as_str(), "replay cancelled");
            ReplayStatus::Cancelled
        } else if let Some((status, step_id, ref message)) = abort {
            tracing::warn!(trace_id = %trace.id, step_id = %step_id, message = message.as_str(),
                "replay aborted");
            status
        } else {
            ReplayStatus::Success
        };

        let committed: Vec<Uuid> = trace
            .steps
            .iter()
            .filter(|s| statuses[&s.id] == StepStatus::Success)
            .map(|s| s.id)
            .collect();

        let step_reports = trace
            .steps
            .iter()
            .map(|step| match runs.get(&step.id) {
                Some(run) => StepReport {
                    step_id: step.id,
                    tool_name: step.tool_name.clone(),
                    status: run.status,
                    attempts: run.attempts,
                    output: run.output.clone(),
                    error: run.error.clone(),
                    duration_ms: run.duration_ms,
                },
                None => StepReport {
                    step_id: step.id,
                    tool_name: step.tool_name.clone(),
                    status: statuses[&step.id],
                    attempts: 0,
                    output: None,
                    error: None,
                    duration_ms: 0,
                },
            })
            .collect();

        // Report the outcome to the store. Cancellation is deliberately
        // not reported: it is not evidence about the trace.
        let outcome = match status {
            ReplayStatus::Success => Some(Outcome::Success),
            ReplayStatus::Failed | ReplayStatus::Escalated => Some(Outcome::Failure),
            ReplayStatus::Cancelled => None,
        };
        if let Some(outcome) = outcome {
            if let Err(e) = self
                .repo
                .update_stats(trace.id, outcome, context, &self.confidence)
                .await
            {
                tracing::warn!(trace_id = %trace.id, error = %e, "failed to record replay outcome");
            }
        }

        Ok(ReplayReport {
            trace_id: trace.id,
            status,
            step_reports,
            failed_step: abort.as_ref().map(|(_, id, _)| *id),
            error: cancelled.or(abort.map(|(_, _, m)| m)),
            committed,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn trace_timeout(&self, trace: &ExecutionTrace) -> Duration {
        let secs = (trace.estimated_secs * self.config.trace_timeout_multiplier)
            .max(self.config.min_trace_timeout_secs as f64);
        Duration::from_secs_f64(secs)
    }
}

/// Run one step to a terminal state, applying its error policy.
async fn run_step(
    step: Step,
    params: BTreeMap<String, serde_json::Value>,
    tools: Arc<dyn ToolRunner>,
    semaphore: Arc<Semaphore>,
    step_timeout: Duration,
) -> StepRun {
    let started = Instant::now();

    let Ok(_permit) = semaphore.acquire_owned().await else {
        return StepRun {
            step_id: step.id,
            status: StepStatus::Failed,
            output: None,
            error: Some("scheduler shut down".to_string()),
            attempts: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            abort: None,
        };
    };

    let (retries, delay) = match step.error_policy {
        ErrorPolicy::Retry { count, delay_ms } => (count, Duration::from_millis(delay_ms)),
        _ => (0, Duration::ZERO),
    };

    let mut attempts = 0u32;
    let mut last_error = String::new();
    loop {
        attempts += 1;
        let failure = match timeout(step_timeout, tools.invoke(&step.tool_name, &params)).await {
            Ok(Ok(outcome)) => {
                if !outcome.success {
                    TraceError::ToolInvocation {
                        tool: step.tool_name.clone(),
                        message: outcome
                            .error
                            .unwrap_or_else(|| "tool reported failure".to_string()),
                    }
                    .to_string()
                } else {
                    match step.first_failed_validation(&outcome.result, outcome.success) {
                        None => {
                            return StepRun {
                                step_id: step.id,
                                status: StepStatus::Success,
                                output: Some(outcome.result),
                                error: None,
                                attempts,
                                duration_ms: started.elapsed().as_millis() as u64,
                                abort: None,
                            };
                        }
                        Some(check) => TraceError::ValidationFailure {
                            step: step.id,
                            check: check.describe(),
                        }
                        .to_string(),
                    }
                }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("step timed out after {}s", step_timeout.as_secs()),
        };

        last_error = failure;
        if attempts <= retries {
            tracing::debug!(step_id = %step.id, attempts, error = last_error.as_str(), "retrying step");
            sleep(delay).await;
            continue;
        }
        break;
    }

    // Policy application after the final failed attempt.
    let (status, abort) = match &step.error_policy {
        ErrorPolicy::Retry { .. } => (StepStatus::Failed, None),
        ErrorPolicy::Skip { .. } => (StepStatus::Skipped, None),
        ErrorPolicy::Fail { message } => {
            (StepStatus::Failed, Some(AbortSignal::Fail(message.clone())))
        }
        ErrorPolicy::Escalate => (StepStatus::Failed, Some(AbortSignal::Escalate)),
    };

    StepRun {
        step_id: step.id,
        status,
        output: None,
        error: Some(last_error),
        attempts,
        duration_ms: started.elapsed().as_millis() as u64,
        abort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockToolRunner;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteTraceRepository};
    use crate::domain::models::{ConfidenceParams, ValidationCheck};
    use crate::domain::ports::ToolOutcome;

    async fn executor_with(
        tools: Arc<MockToolRunner>,
        config: ReplayConfig,
    ) -> (Arc<SqliteTraceRepository>, ReplayExecutor<SqliteTraceRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteTraceRepository::new(pool));
        let executor = ReplayExecutor::new(
            repo.clone(),
            tools,
            config,
            ConfidenceParams::default(),
        );
        (repo, executor)
    }

    fn fast_config() -> ReplayConfig {
        ReplayConfig {
            max_concurrency: 4,
            step_timeout_secs: 5,
            trace_timeout_multiplier: 3.0,
            min_trace_timeout_secs: 30,
        }
    }

    #[tokio::test]
    async fn test_linear_chain_succeeds_and_binds_outputs() {
        let tools = MockToolRunner::new();
        tools.script("produce", vec![ToolOutcome::ok(serde_json::json!("artifact"))]).await;
        let (repo, executor) = executor_with(tools.clone(), fast_config()).await;

        let a = Step::new("produce");
        let b = Step::new("consume").with_output_ref("input", a.id);
        let trace = ExecutionTrace::new("chain", vec![a, b], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, Some("ctx")).await.unwrap();
        assert_eq!(report.status, ReplayStatus::Success);
        assert_eq!(report.committed.len(), 2);

        // The consumer saw the producer's output.
        let calls = tools.calls().await;
        let consume = calls.iter().find(|c| c.tool_name == "consume").unwrap();
        assert_eq!(consume.parameters["input"], serde_json::json!("artifact"));

        // Outcome was reported to the store.
        let after = repo.get(stored.id).await.unwrap().unwrap();
        assert_eq!(after.usage_count, 1);
        assert!((after.success_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_retry_policy_recovers_after_failures() {
        // Fails twice, succeeds on the third attempt; elapsed time covers
        // both retry delays.
        let tools = MockToolRunner::new();
        tools
            .script("flaky", vec![
                ToolOutcome::err("transient 1"),
                ToolOutcome::err("transient 2"),
                ToolOutcome::ok(serde_json::json!("finally")),
            ])
            .await;
        let (repo, executor) = executor_with(tools.clone(), fast_config()).await;

        let step = Step::new("flaky")
            .with_policy(ErrorPolicy::Retry { count: 2, delay_ms: 200 });
        let trace = ExecutionTrace::new("flaky goal", vec![step], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let started = std::time::Instant::now();
        let report = executor.execute(&stored, None).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.status, ReplayStatus::Success);
        assert_eq!(report.step_reports[0].attempts, 3);
        assert!(elapsed >= Duration::from_millis(400), "two retry delays must elapse");
        assert_eq!(tools.call_count("flaky").await, 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_the_replay() {
        let tools = MockToolRunner::new();
        tools
            .script("broken", vec![
                ToolOutcome::err("down"),
                ToolOutcome::err("down"),
            ])
            .await;
        let (repo, executor) = executor_with(tools, fast_config()).await;

        let step = Step::new("broken")
            .with_policy(ErrorPolicy::Retry { count: 1, delay_ms: 10 });
        let failing_id = step.id;
        let trace = ExecutionTrace::new("doomed goal", vec![step], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, None).await.unwrap();
        assert_eq!(report.status, ReplayStatus::Failed);
        assert_eq!(report.failed_step, Some(failing_id));

        let after = repo.get(stored.id).await.unwrap().unwrap();
        assert_eq!(after.usage_count, 1);
        assert!(after.success_rate < 1e-9);
    }

    #[tokio::test]
    async fn test_skip_policy_substitutes_sentinel_downstream() {
        let tools = MockToolRunner::new();
        tools.script("optional", vec![ToolOutcome::err("not available")]).await;
        let (repo, executor) = executor_with(tools.clone(), fast_config()).await;

        let optional = Step::new("optional")
            .with_policy(ErrorPolicy::Skip { continue_on_skip: true });
        let downstream = Step::new("downstream").with_output_ref("input", optional.id);
        let trace = ExecutionTrace::new("skip goal", vec![optional, downstream], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, None).await.unwrap();
        // The skipped step does not block overall success.
        assert_eq!(report.status, ReplayStatus::Success);
        assert_eq!(report.step_reports[0].status, StepStatus::Skipped);
        assert_eq!(report.step_reports[1].status, StepStatus::Success);

        let calls = tools.calls().await;
        let downstream_call = calls.iter().find(|c| c.tool_name == "downstream").unwrap();
        assert!(crate::domain::models::is_unavailable(&downstream_call.parameters["input"]));
    }

    #[tokio::test]
    async fn test_skip_without_continue_cascades() {
        let tools = MockToolRunner::new();
        tools.script("gate", vec![ToolOutcome::err("no")]).await;
        let (repo, executor) = executor_with(tools.clone(), fast_config()).await;

        let gate = Step::new("gate")
            .with_policy(ErrorPolicy::Skip { continue_on_skip: false });
        let dependent = Step::new("dependent").with_output_ref("input", gate.id);
        let unrelated = Step::new("unrelated");
        let trace =
            ExecutionTrace::new("cascade goal", vec![gate, dependent, unrelated], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, None).await.unwrap();
        assert_eq!(report.status, ReplayStatus::Success);
        assert_eq!(report.step_reports[0].status, StepStatus::Skipped);
        assert_eq!(report.step_reports[1].status, StepStatus::Skipped);
        assert_eq!(report.step_reports[2].status, StepStatus::Success);
        // The cascaded dependent never ran.
        assert_eq!(tools.call_count("dependent").await, 0);
    }

    #[tokio::test]
    async fn test_fail_policy_aborts_with_message() {
        let tools = MockToolRunner::new();
        tools.script("critical", vec![ToolOutcome::err("disk gone")]).await;
        let (repo, executor) = executor_with(tools.clone(), fast_config()).await;

        let critical = Step::new("critical").with_policy(ErrorPolicy::Fail {
            message: "critical precondition failed".to_string(),
        });
        let never = Step::new("never").with_dependency(critical.id);
        let trace = ExecutionTrace::new("abort goal", vec![critical, never], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, None).await.unwrap();
        assert_eq!(report.status, ReplayStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("critical precondition failed"));
        assert_eq!(tools.call_count("never").await, 0);
    }

    #[tokio::test]
    async fn test_escalate_policy_signals_learner_retry() {
        let tools = MockToolRunner::new();
        tools.script("fragile", vec![ToolOutcome::err("unexpected state")]).await;
        let (repo, executor) = executor_with(tools, fast_config()).await;

        let step = Step::new("fragile").with_policy(ErrorPolicy::Escalate);
        let trace = ExecutionTrace::new("escalate goal", vec![step], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, None).await.unwrap();
        assert_eq!(report.status, ReplayStatus::Escalated);
    }

    #[tokio::test]
    async fn test_validation_failure_feeds_error_policy() {
        let tools = MockToolRunner::new();
        tools.script("check_me", vec![ToolOutcome::ok(serde_json::json!(""))]).await;
        let (repo, executor) = executor_with(tools, fast_config()).await;

        let step = Step::new("check_me")
            .with_validation(ValidationCheck::ResultNonEmpty)
            .with_policy(ErrorPolicy::Retry { count: 0, delay_ms: 0 });
        let trace = ExecutionTrace::new("validation goal", vec![step], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, None).await.unwrap();
        assert_eq!(report.status, ReplayStatus::Failed);
        assert!(report.error.unwrap().contains("Validation failed"));
    }

    #[tokio::test]
    async fn test_topological_order_is_respected() {
        let tools = MockToolRunner::new();
        let (repo, executor) = executor_with(tools.clone(), fast_config()).await;

        // Diamond: a -> (b, c) -> d
        let a = Step::new("step_a");
        let b = Step::new("step_b").with_dependency(a.id);
        let c = Step::new("step_c").with_dependency(a.id);
        let d = Step::new("step_d")
            .with_dependency(b.id)
            .with_dependency(c.id);
        let trace = ExecutionTrace::new("diamond", vec![a, b, c, d], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, None).await.unwrap();
        assert_eq!(report.status, ReplayStatus::Success);

        let tools_ref = &tools;
        let pos = |name: &str| {
            let name = name.to_string();
            async move {
                tools_ref.call_position(&name).await.expect("tool was invoked")
            }
        };
        let (pa, pb, pc, pd) =
            (pos("step_a").await, pos("step_b").await, pos("step_c").await, pos("step_d").await);
        assert!(pa < pb && pa < pc, "a must start before its dependents");
        assert!(pd > pb && pd > pc, "d must start after both branches");
    }

    #[tokio::test]
    async fn test_cancellation_discards_outcome() {
        let tools = MockToolRunner::with_delay(Duration::from_secs(5));
        let (repo, executor) = executor_with(tools, fast_config()).await;

        let step = Step::new("slow");
        let trace = ExecutionTrace::new("cancel goal", vec![step], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let (cancel_tx, cancel_rx) = ReplayExecutor::<SqliteTraceRepository>::cancel_channel();
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = cancel_tx.send(true);
            // Keep the sender alive until the send is observed.
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let report = executor
            .execute_with_cancel(&stored, None, cancel_rx)
            .await
            .unwrap();
        cancel.await.unwrap();

        assert_eq!(report.status, ReplayStatus::Cancelled);

        // Cancellation reported nothing to the store: no usage, no decay.
        let after = repo.get(stored.id).await.unwrap().unwrap();
        assert_eq!(after.usage_count, 0);
        assert!((after.confidence - stored.confidence).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_trace_timeout_forces_cancellation() {
        let tools = MockToolRunner::with_delay(Duration::from_secs(10));
        let config = ReplayConfig {
            max_concurrency: 2,
            step_timeout_secs: 30,
            trace_timeout_multiplier: 1.0,
            min_trace_timeout_secs: 1,
        };
        let (repo, executor) = executor_with(tools, config).await;

        let step = Step::new("glacial");
        // estimated_secs 1.0 with multiplier 1.0 bounds the replay at ~1s.
        let trace = ExecutionTrace::new("timeout goal", vec![step], 0.6, 1.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, None).await.unwrap();
        assert_eq!(report.status, ReplayStatus::Cancelled);
        assert!(report.error.unwrap().contains("trace timeout"));
    }

    #[tokio::test]
    async fn test_independent_branches_run_while_one_retries() {
        // A step stuck in retry backoff must not block an unrelated branch.
        let tools = MockToolRunner::new();
        tools
            .script("stuck", vec![
                ToolOutcome::err("wait"),
                ToolOutcome::err("wait"),
                ToolOutcome::ok(serde_json::json!("done")),
            ])
            .await;
        let (repo, executor) = executor_with(tools.clone(), fast_config()).await;

        let stuck = Step::new("stuck")
            .with_policy(ErrorPolicy::Retry { count: 2, delay_ms: 300 });
        let free = Step::new("free");
        let trace = ExecutionTrace::new("parallel goal", vec![stuck, free], 0.6, 5.0);
        let stored = repo.put(&trace).await.unwrap();

        let report = executor.execute(&stored, None).await.unwrap();
        assert_eq!(report.status, ReplayStatus::Success);

        // The free branch finished during the stuck step's backoff.
        let calls = tools.calls().await;
        let free_pos = calls.iter().position(|c| c.tool_name == "free").unwrap();
        let last_stuck_pos = calls.iter().rposition(|c| c.tool_name == "stuck").unwrap();
        assert!(free_pos < last_stuck_pos, "free branch should not wait out the retries");
    }
}
