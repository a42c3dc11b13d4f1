//! Background consolidation daemon.
//!
//! Runs the consolidation engine on a fixed interval so tier transitions
//! and archival happen on their own schedule, decoupled from replay
//! completions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Instant};

use crate::domain::errors::TraceResult;
use crate::domain::ports::TraceRepository;
use crate::services::consolidation::{ConsolidationEngine, ConsolidationReport};

/// Configuration for the consolidation daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Interval between passes.
    pub pass_interval: Duration,
    /// Whether to run a pass immediately on startup.
    pub run_on_startup: bool,
    /// Maximum consecutive failures before stopping.
    pub max_consecutive_failures: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pass_interval: Duration::from_secs(300),
            run_on_startup: true,
            max_consecutive_failures: 5,
        }
    }
}

impl DaemonConfig {
    /// Create config with a custom interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self { pass_interval: interval, ..Default::default() }
    }
}

/// Event emitted by the daemon.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Daemon started.
    Started,
    /// Pass started.
    PassStarted { pass_number: u64 },
    /// Pass completed.
    PassCompleted {
        pass_number: u64,
        report: ConsolidationReport,
        duration_ms: u64,
    },
    /// Pass failed.
    PassFailed { pass_number: u64, error: String },
    /// Daemon stopped.
    Stopped { reason: StopReason },
}

/// Reason the daemon stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Requested to stop.
    Requested,
    /// Too many consecutive failures.
    TooManyFailures,
}

/// Daemon status snapshot.
#[derive(Debug, Clone, Default)]
pub struct DaemonStatus {
    /// Whether the daemon loop is running.
    pub running: bool,
    /// Total passes attempted.
    pub total_passes: u64,
    /// Passes that completed.
    pub successful_passes: u64,
    /// Passes that failed.
    pub failed_passes: u64,
    /// Last pass time.
    pub last_pass: Option<Instant>,
    /// Total transitions applied across all passes.
    pub total_transitions: u64,
}

/// Handle to control a running daemon.
pub struct DaemonHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<DaemonStatus>>,
}

impl DaemonHandle {
    /// Request the daemon to stop.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    /// Current status snapshot.
    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }
}

/// Periodic consolidation runner.
pub struct ConsolidationDaemon<R>
where
    R: TraceRepository + 'static,
{
    engine: Arc<ConsolidationEngine<R>>,
    config: DaemonConfig,
    status: Arc<RwLock<DaemonStatus>>,
    stop_flag: Arc<AtomicBool>,
}

impl<R> ConsolidationDaemon<R>
where
    R: TraceRepository + 'static,
{
    pub fn new(engine: Arc<ConsolidationEngine<R>>, config: DaemonConfig) -> Self {
        Self {
            engine,
            config,
            status: Arc::new(RwLock::new(DaemonStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle to control the daemon.
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            stop_flag: self.stop_flag.clone(),
            status: self.status.clone(),
        }
    }

    /// Spawn the daemon loop, returning a channel of events.
    pub async fn run(self) -> mpsc::Receiver<DaemonEvent> {
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            self.run_loop(tx).await;
        });
        rx
    }

    /// Run a single pass (manual invocation / `trigger_consolidation`).
    pub async fn run_once(&self) -> TraceResult<ConsolidationReport> {
        self.engine.run_pass().await
    }

    async fn run_loop(self, tx: mpsc::Sender<DaemonEvent>) {
        {
            let mut status = self.status.write().await;
            status.running = true;
        }
        let _ = tx.send(DaemonEvent::Started).await;

        let mut consecutive_failures = 0u32;
        let mut interval_timer = interval(self.config.pass_interval);
        // The first tick fires immediately; skip it unless a startup pass
        // was requested.
        if !self.config.run_on_startup {
            interval_timer.tick().await;
        }

        let reason = loop {
            interval_timer.tick().await;
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }

            self.run_pass_cycle(&tx, &mut consecutive_failures).await;

            if consecutive_failures >= self.config.max_consecutive_failures {
                break StopReason::TooManyFailures;
            }
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }
        };

        {
            let mut status = self.status.write().await;
            status.running = false;
        }
        let _ = tx.send(DaemonEvent::Stopped { reason }).await;
    }

    async fn run_pass_cycle(
        &self,
        tx: &mpsc::Sender<DaemonEvent>,
        consecutive_failures: &mut u32,
    ) {
        let pass_number = {
            let mut status = self.status.write().await;
            status.total_passes += 1;
            status.total_passes
        };

        let _ = tx.send(DaemonEvent::PassStarted { pass_number }).await;

        let start = Instant::now();
        let result = self.engine.run_pass().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(report) => {
                *consecutive_failures = 0;
                {
                    let mut status = self.status.write().await;
                    status.successful_passes += 1;
                    status.last_pass = Some(Instant::now());
                    status.total_transitions += report.transitions.len() as u64;
                }
                let _ = tx
                    .send(DaemonEvent::PassCompleted { pass_number, report, duration_ms })
                    .await;
            }
            Err(e) => {
                *consecutive_failures += 1;
                {
                    let mut status = self.status.write().await;
                    status.failed_passes += 1;
                }
                tracing::warn!(pass_number, error = %e, "consolidation pass failed");
                let _ = tx
                    .send(DaemonEvent::PassFailed { pass_number, error: e.to_string() })
                    .await;
            }
        }
    }
}
