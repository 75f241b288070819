//! # primenet-manager
//!
//! Keeps the work queues of unattended GIMPS clients (mfakto/mfaktc trial
//! factoring, clLucas Lucas-Lehmer testing) topped off and sends their
//! finished results back to Primenet.
//!
//! Each configured device has a work directory holding the client's
//! `worktodo.txt` and `results.txt`. One update cycle:
//!
//! 1. logs in to Primenet,
//! 2. for every device, tops off `worktodo.txt` with new assignments from
//!    GPU72 or Primenet ([`WorkCache`]),
//! 3. submits every result whose exponent is no longer queued, records it in
//!    `results_sent.txt` and removes it from `results.txt`
//!    ([`ResultReconciler`]).
//!
//! Files shared with the GIMPS client are only touched while holding
//! `.lck` marker files ([`lock`]), so several managers and the client's own
//! tooling can work on the same directories.
//!
//! ## Quick Start
//!
//! ```no_run
//! use primenet_manager::{
//!     BatchSubmitter, LockManager, ManagerMode, Orchestrator, PrimenetClient, RecordGrammar,
//!     ResultReconciler, Settings, WorkCache,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let path = std::path::Path::new("TFsettings.yml");
//!     let mut settings = Settings::load(path, ManagerMode::TrialFactoring)?;
//!     settings.prepare()?;
//!
//!     let grammar = RecordGrammar::for_mode(settings.mode)?;
//!     let primenet = Arc::new(PrimenetClient::from_settings(&settings, grammar.clone())?);
//!     let locks = LockManager::default();
//!
//!     let orchestrator = Orchestrator::new(
//!         WorkCache::new(locks.clone(), grammar.clone(), vec![primenet.clone()]),
//!         ResultReconciler::new(locks, grammar, BatchSubmitter::new(primenet.clone())),
//!         settings.devices.clone(),
//!     )
//!     .with_session(primenet, true)
//!     .with_poll_interval(settings.poll_interval());
//!
//!     primenet_manager::run_with_shutdown(orchestrator).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Settings file and device profiles
pub mod config;
/// Error types
pub mod error;
/// Marker-file locking
pub mod lock;
/// Device update orchestrator
pub mod orchestrator;
/// Result reconciliation
pub mod reconcile;
/// Record patterns and line helpers
pub mod records;
/// Remote service boundaries and HTTP clients
pub mod remote;
/// Fixed-delay retry
pub mod retry;
/// Chunked result submission
pub mod submit;
/// File helpers
pub mod utils;
/// Work queue top-off
pub mod work_cache;

// Re-export commonly used types
pub use config::{DeviceProfile, ManagerMode, RetryPolicy, Settings, WorkType};
pub use error::{Error, ErrorClass, Result};
pub use lock::{LockGuard, LockManager};
pub use orchestrator::{CyclePhase, DeviceReport, Orchestrator, RunOutcome};
pub use reconcile::{ReconcileOutcome, ResultReconciler, classify_results};
pub use records::RecordGrammar;
pub use remote::{AssignmentSource, Gpu72Client, PrimenetClient, ResultSink, SessionClient};
pub use submit::{BatchSubmitter, SEND_LIMIT, split_batches};
pub use work_cache::{TopOff, WorkCache};

/// Run the orchestrator until it finishes or a termination signal arrives
///
/// A signal cancels the orchestrator's shutdown token. A cycle already in
/// progress runs to completion; the run stops at the next sleep.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(orchestrator: Orchestrator) -> Result<RunOutcome> {
    let token = orchestrator.shutdown_token();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => token.cancel(),
            _ = token.cancelled() => {}
        }
    });

    let outcome = orchestrator.run().await;
    orchestrator.shutdown_token().cancel();
    if let Err(e) = watcher.await {
        tracing::warn!(error = %e, "signal watcher task failed");
    }
    outcome
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
