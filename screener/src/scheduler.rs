//! Background scan scheduler.
//!
//! Drives a [`ScanFetcher`] at a fixed cadence on a single Tokio task and
//! commits every successful result into the shared [`DataStore`].
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start──▶ Running ──stop──▶ Stopping ──loop exits──▶ Stopped
//! ```
//!
//! - The first scan runs as soon as the loop starts; afterwards the next
//!   attempt is due exactly `interval` after the previous one finished,
//!   whether it succeeded or not. There is no backoff.
//! - Failures (fetch errors, rejected snapshots, panics inside the fetcher)
//!   are recorded in [`ScanState`] and never touch stored data.
//! - `stop` is cooperative: an in-flight fetch always runs to completion.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::data::{DataStore, Snapshot, ValidationError};
use crate::fetch::{FetchError, ScanFetcher};

// ============================================================================
// Scan State
// ============================================================================

/// Lifecycle status of the scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// No loop is running
    Stopped,
    /// Loop is running
    Running,
    /// Stop requested, loop finishing its current iteration
    Stopping,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Point-in-time view of the scheduler for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanState {
    pub status: ScanStatus,
    /// Whether a fetch cycle is executing right now
    pub scanning: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub interval_secs: Option<u64>,
    /// Name of the active fetcher
    pub source: Option<String>,
    /// When the next scheduled scan is due; `None` while scanning or stopped
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_scan_id: Option<String>,
    pub last_record_count: Option<usize>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub total_scans: u64,
    pub failed_scans: u64,
    pub consecutive_failures: u32,
}

impl ScanState {
    fn new() -> Self {
        Self {
            status: ScanStatus::Stopped,
            scanning: false,
            started_at: None,
            interval_secs: None,
            source: None,
            next_run_at: None,
            last_success_at: None,
            last_scan_id: None,
            last_record_count: None,
            last_error: None,
            last_error_at: None,
            total_scans: 0,
            failed_scans: 0,
            consecutive_failures: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ScanStatus::Running
    }
}

/// Result of [`ScanScheduler::trigger_now`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// An immediate scan was queued
    Queued,
    /// A scan is executing or already queued; nothing was done
    AlreadyScanning,
    /// The loop is not running; nothing was done
    NotRunning,
}

/// Why a single scan cycle did not produce a committed snapshot.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Snapshot rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("A scan is already in progress")]
    AlreadyScanning,
}

// ============================================================================
// Shared Core
// ============================================================================

// Scan slot values. At most one scan runs or is queued at any time.
const SLOT_IDLE: u8 = 0;
const SLOT_QUEUED: u8 = 1;
const SLOT_SCANNING: u8 = 2;

/// State shared between the scheduler handle and its worker task.
struct Shared {
    store: Arc<DataStore>,
    state: RwLock<ScanState>,
    slot: AtomicU8,
}

impl Shared {
    fn claim_slot(&self, from: u8, to: u8) -> Result<(), u8> {
        self.slot
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
    }

    fn set_slot(&self, value: u8) {
        self.slot.store(value, Ordering::SeqCst);
    }

    fn state(&self) -> ScanState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update_state<R>(&self, f: impl FnOnce(&mut ScanState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Run one fetch-and-commit cycle. The caller holds the scan slot.
    async fn execute(&self, fetcher: &dyn ScanFetcher) -> Result<Arc<Snapshot>, ScanError> {
        self.update_state(|s| s.scanning = true);
        let started = Instant::now();

        let outcome = AssertUnwindSafe(fetcher.fetch()).catch_unwind().await;
        let result = match outcome {
            Ok(Ok(snapshot)) => self.store.commit(snapshot).map_err(ScanError::from),
            Ok(Err(e)) => Err(ScanError::from(e)),
            Err(payload) => Err(ScanError::from(FetchError::Panicked(panic_message(
                payload.as_ref(),
            )))),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let now = Utc::now();

        match &result {
            Ok(snapshot) => {
                self.update_state(|s| {
                    s.scanning = false;
                    s.last_success_at = Some(now);
                    s.last_scan_id = Some(snapshot.id.clone());
                    s.last_record_count = Some(snapshot.len());
                    s.total_scans += 1;
                    s.consecutive_failures = 0;
                });
                info!(
                    source = fetcher.name(),
                    scan_id = %snapshot.id,
                    records = snapshot.len(),
                    status = %snapshot.source_status,
                    elapsed_ms,
                    "Scan completed"
                );
            }
            Err(e) => {
                let consecutive = self.update_state(|s| {
                    s.scanning = false;
                    s.last_error = Some(e.to_string());
                    s.last_error_at = Some(now);
                    s.failed_scans += 1;
                    s.consecutive_failures += 1;
                    s.consecutive_failures
                });
                warn!(
                    source = fetcher.name(),
                    error = %e,
                    consecutive_failures = consecutive,
                    elapsed_ms,
                    "Scan failed, keeping previous data"
                );
            }
        }

        result
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// Worker Loop
// ============================================================================

/// Handle to the running loop task.
struct Worker {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
    trigger: mpsc::Sender<()>,
}

struct ScanLoop {
    shared: Arc<Shared>,
    fetcher: Arc<dyn ScanFetcher>,
    interval: Duration,
    shutdown: CancellationToken,
    trigger_rx: mpsc::Receiver<()>,
}

impl ScanLoop {
    async fn run(mut self) {
        info!(
            source = self.fetcher.name(),
            interval_secs = self.interval.as_secs(),
            "Scan loop started"
        );

        let mut next_run = Instant::now();

        loop {
            self.publish_next_run(next_run);

            let manual = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(()) = self.trigger_rx.recv() => true,
                _ = tokio::time::sleep_until(next_run) => false,
            };

            if manual {
                debug!("Running manually triggered scan");
            } else {
                match self.shared.claim_slot(SLOT_IDLE, SLOT_SCANNING) {
                    Ok(()) => {}
                    Err(SLOT_QUEUED) => {
                        // The trigger's message is on its way; consume it so
                        // this cycle serves that trigger.
                        tokio::select! {
                            biased;
                            _ = self.shutdown.cancelled() => break,
                            _ = self.trigger_rx.recv() => {}
                        }
                    }
                    Err(_) => {
                        debug!("Inline scan in progress, skipping scheduled cycle");
                        next_run = Instant::now() + self.interval;
                        continue;
                    }
                }
            }

            self.shared.set_slot(SLOT_SCANNING);
            self.shared.update_state(|s| s.next_run_at = None);
            let _ = self.shared.execute(self.fetcher.as_ref()).await;
            self.shared.set_slot(SLOT_IDLE);
            next_run = Instant::now() + self.interval;

            if self.shutdown.is_cancelled() {
                break;
            }
        }

        self.release_pending_trigger();

        self.shared.update_state(|s| {
            s.status = ScanStatus::Stopped;
            s.scanning = false;
            s.next_run_at = None;
        });
        info!(source = self.fetcher.name(), "Scan loop stopped");
    }

    /// Free the slot held by a trigger the loop will never serve.
    ///
    /// Closing first makes any later `try_send` fail, and `trigger_now`
    /// frees the slot itself in that case.
    fn release_pending_trigger(&mut self) {
        self.trigger_rx.close();
        if self.trigger_rx.try_recv().is_ok() {
            debug!("Dropping manual scan queued during shutdown");
            let _ = self.shared.claim_slot(SLOT_QUEUED, SLOT_IDLE);
        }
    }

    fn publish_next_run(&self, next_run: Instant) {
        let wait = next_run.saturating_duration_since(Instant::now());
        let at = Utc::now()
            + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero());
        self.shared.update_state(|s| s.next_run_at = Some(at));
    }
}

// ============================================================================
// Scan Scheduler
// ============================================================================

/// Owns the background scan loop and the store it writes into.
///
/// Construct one per process and share it by `Arc`; readers can also hold the
/// [`DataStore`] directly via [`ScanScheduler::store`].
pub struct ScanScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl ScanScheduler {
    /// Create a stopped scheduler writing into `store`.
    pub fn new(store: Arc<DataStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                state: RwLock::new(ScanState::new()),
                slot: AtomicU8::new(SLOT_IDLE),
            }),
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The store this scheduler commits into.
    pub fn store(&self) -> &Arc<DataStore> {
        &self.shared.store
    }

    /// Current status and timestamps.
    pub fn get_state(&self) -> ScanState {
        self.shared.state()
    }

    /// Spawn the scan loop. Must be called from within a Tokio runtime.
    ///
    /// A no-op returning the current state while the loop is running or stopping.
    pub fn start(&self, fetcher: Arc<dyn ScanFetcher>, interval: Duration) -> ScanState {
        let mut slot = self.worker();

        let started = self.shared.update_state(|s| {
            if s.status != ScanStatus::Stopped {
                return false;
            }
            s.status = ScanStatus::Running;
            s.started_at = Some(Utc::now());
            s.interval_secs = Some(interval.as_secs());
            s.source = Some(fetcher.name().to_string());
            true
        });

        if !started {
            debug!("Scan loop already active, start ignored");
            return self.get_state();
        }

        let interval = if interval.is_zero() {
            warn!("Zero scan interval requested, using 1ms");
            Duration::from_millis(1)
        } else {
            interval
        };

        let shutdown = CancellationToken::new();
        let (trigger, trigger_rx) = mpsc::channel(1);
        let scan_loop = ScanLoop {
            shared: Arc::clone(&self.shared),
            fetcher,
            interval,
            shutdown: shutdown.clone(),
            trigger_rx,
        };

        // A finished worker from an earlier run may still sit in the slot.
        *slot = Some(Worker {
            handle: tokio::spawn(scan_loop.run()),
            shutdown,
            trigger,
        });
        drop(slot);

        self.get_state()
    }

    /// Ask the loop to exit and wait up to `timeout` for it.
    ///
    /// Returns `true` once the loop has exited (or was never running). On
    /// `false` the status stays `Stopping` and `stop` may be called again.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let worker = self.worker().take();

        let Some(mut worker) = worker else {
            return self.get_state().status == ScanStatus::Stopped;
        };

        self.shared.update_state(|s| {
            if s.status == ScanStatus::Running {
                s.status = ScanStatus::Stopping;
            }
        });
        info!("Scan loop stopping");
        worker.shutdown.cancel();

        match tokio::time::timeout(timeout, &mut worker.handle).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    error!(error = %e, "Scan loop task ended abnormally");
                }
                self.shared.update_state(|s| {
                    s.status = ScanStatus::Stopped;
                    s.scanning = false;
                    s.next_run_at = None;
                });
                true
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Scan loop did not stop in time"
                );
                *self.worker() = Some(worker);
                false
            }
        }
    }

    /// Queue an immediate scan if none is executing or queued.
    ///
    /// The interval restarts from the completion of the triggered scan.
    pub fn trigger_now(&self) -> TriggerOutcome {
        if !self.get_state().is_running() {
            return TriggerOutcome::NotRunning;
        }

        if self.shared.claim_slot(SLOT_IDLE, SLOT_QUEUED).is_err() {
            debug!("Scan already in progress, trigger ignored");
            return TriggerOutcome::AlreadyScanning;
        }

        let sent = self
            .worker()
            .as_ref()
            .map(|w| w.trigger.try_send(()).is_ok())
            .unwrap_or(false);

        if sent {
            info!("Manual scan queued");
            TriggerOutcome::Queued
        } else {
            let _ = self.shared.claim_slot(SLOT_QUEUED, SLOT_IDLE);
            TriggerOutcome::NotRunning
        }
    }

    /// Run one fetch-and-commit cycle on the caller's task.
    ///
    /// Shares the scan slot with the loop, so it fails with
    /// [`ScanError::AlreadyScanning`] while another scan is executing or
    /// queued. A scheduled cycle that comes due meanwhile is skipped.
    pub async fn run_once(&self, fetcher: &dyn ScanFetcher) -> Result<Arc<Snapshot>, ScanError> {
        if self.shared.claim_slot(SLOT_IDLE, SLOT_SCANNING).is_err() {
            return Err(ScanError::AlreadyScanning);
        }

        let result = self.shared.execute(fetcher).await;
        self.shared.set_slot(SLOT_IDLE);
        result
    }
}

impl Drop for ScanScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().take() {
            worker.shutdown.cancel();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
