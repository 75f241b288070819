//! Device update orchestrator
//!
//! One update cycle logs in, then tops off and reconciles every device in
//! configured order. Any failure abandons the rest of the cycle; after the
//! back-off the next attempt starts again from the login and the first
//! device. A run ends after one successful cycle in single-shot mode, when
//! the retry policy gives up, or when the shutdown token is cancelled while
//! the orchestrator is sleeping.

use crate::config::{DeviceProfile, RetryPolicy};
use crate::error::{Error, Result};
use crate::reconcile::{ReconcileOutcome, ResultReconciler};
use crate::remote::SessionClient;
use crate::work_cache::{TopOff, WorkCache};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default wait after a failed cycle
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(120);

/// Where a cycle is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Establishing the session
    LoggingIn,
    /// Working on the device at this index
    UpdatingDevice(usize),
    /// Every device updated
    Complete,
    /// The cycle was abandoned
    Failed,
}

/// Per-device result of a successful cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    /// Device number from the profile
    pub device: u32,
    /// Queue top-off outcome
    pub top_off: TopOff,
    /// Result reconciliation outcome
    pub reconcile: ReconcileOutcome,
}

/// Why [`Orchestrator::run`] returned normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Single-shot mode and the cycle succeeded
    Finished,
    /// The shutdown token was cancelled
    Cancelled,
}

/// Drives update cycles over all device profiles
pub struct Orchestrator {
    session: Option<Arc<dyn SessionClient>>,
    login_required: bool,
    work_cache: WorkCache,
    reconciler: ResultReconciler,
    profiles: Vec<DeviceProfile>,
    backoff: Duration,
    poll: Option<Duration>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Single-shot orchestrator without a session, retrying forever
    pub fn new(
        work_cache: WorkCache,
        reconciler: ResultReconciler,
        profiles: Vec<DeviceProfile>,
    ) -> Self {
        Self {
            session: None,
            login_required: false,
            work_cache,
            reconciler,
            profiles,
            backoff: DEFAULT_BACKOFF,
            poll: None,
            retry: RetryPolicy::Unbounded,
            shutdown: CancellationToken::new(),
        }
    }

    /// Log in at the start of every cycle
    ///
    /// When `required` is false a failed login is logged and the cycle goes
    /// on, for setups whose assignment provider authenticates per request.
    pub fn with_session(mut self, session: Arc<dyn SessionClient>, required: bool) -> Self {
        self.session = Some(session);
        self.login_required = required;
        self
    }

    /// Wait after a failed cycle
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay between successful cycles; `None` runs a single cycle
    pub fn with_poll_interval(mut self, poll: Option<Duration>) -> Self {
        self.poll = poll;
        self
    }

    /// Consecutive failed cycles tolerated
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Token that stops the run at the next sleep
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle for cancelling a running orchestrator
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run cycles until done, cancelled or out of retries
    ///
    /// # Errors
    ///
    /// [`Error::CyclesExhausted`] once a bounded retry policy runs out.
    /// Individual cycle failures are logged and retried, never returned.
    pub async fn run(&self) -> Result<RunOutcome> {
        let mut failures: u32 = 0;

        loop {
            match self.run_cycle().await {
                Ok(_) => {
                    failures = 0;
                    let Some(poll) = self.poll else {
                        info!("update complete, exiting");
                        return Ok(RunOutcome::Finished);
                    };
                    info!(next_in_secs = poll.as_secs(), "update complete");
                    if !self.pause(poll).await {
                        return Ok(RunOutcome::Cancelled);
                    }
                }
                Err(_) => {
                    failures += 1;
                    match self.retry {
                        RetryPolicy::Bounded(max) if failures >= max => {
                            return Err(Error::CyclesExhausted { attempts: failures });
                        }
                        _ => {}
                    }
                    warn!(
                        failures,
                        retry_in_secs = self.backoff.as_secs(),
                        "update failed, backing off"
                    );
                    if !self.pause(self.backoff).await {
                        return Ok(RunOutcome::Cancelled);
                    }
                }
            }
        }
    }

    /// Run one full cycle over every device
    ///
    /// Stops at the first failing step and returns its error; the phase it
    /// failed in is logged.
    pub async fn run_cycle(&self) -> Result<Vec<DeviceReport>> {
        let mut phase = CyclePhase::LoggingIn;
        let result = self.cycle_steps(&mut phase).await;
        match &result {
            Ok(_) => phase = CyclePhase::Complete,
            Err(e) => {
                warn!(phase = ?phase, error = %e, class = ?e.class(), "update cycle abandoned");
                phase = CyclePhase::Failed;
            }
        }
        tracing::debug!(phase = ?phase, "cycle finished");
        result
    }

    async fn cycle_steps(&self, phase: &mut CyclePhase) -> Result<Vec<DeviceReport>> {
        if let Some(session) = &self.session {
            if let Err(e) = session.login().await {
                if self.login_required {
                    return Err(e);
                }
                warn!(error = %e, "login failed, continuing without a session");
            }
        }

        let mut reports = Vec::with_capacity(self.profiles.len());
        for (index, profile) in self.profiles.iter().enumerate() {
            *phase = CyclePhase::UpdatingDevice(index);
            info!(device = profile.device, dir = %profile.workdir.display(), "updating device");

            let top_off = self.work_cache.top_off(profile).await?;
            let reconcile = self.reconciler.reconcile(profile).await?;
            reports.push(DeviceReport {
                device: profile.device,
                top_off,
                reconcile,
            });
        }
        Ok(reports)
    }

    /// Sleep for `duration`; false if shutdown was requested first
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.cancelled() => {
                info!("shutdown requested");
                false
            }
        }
    }
}
