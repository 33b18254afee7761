//! Run coordination
//!
//! One run is: take the run lock, load state, sample, evaluate, persist,
//! deliver alerts, release the lock. Daemon mode repeats that on a timer;
//! one-shot mode does it once. Both go through [`RunCoordinator::run_once`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alerting::{AlertSink, DispatchOutcome, Evaluation, ThresholdEvaluator, WebhookDispatcher};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::HostIdentity;
use crate::models::{AlertEvent, EngineState, MetricKey, MetricKind, MetricSample};
use crate::sampler::{summarize, MetricSampler, SystemSampler};
use crate::store::{LockPolicy, RunLock, StateStore};

/// What happened during a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Samples gathered
    pub samples: Vec<MetricSample>,
    /// Alerts the evaluator produced, in key order
    pub alerts: Vec<AlertEvent>,
    /// Delivery outcome per alert that was attempted before the deadline
    pub deliveries: Vec<(MetricKey, DispatchOutcome)>,
    /// Alerts whose delivery was abandoned at the deadline
    pub abandoned: usize,
    /// Whether the updated state reached disk
    pub state_saved: bool,
}

/// Result of asking for a run
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The run executed
    Completed(RunReport),
    /// Another run held the lock past the wait budget
    Skipped,
}

/// Current readings plus persisted state, for display
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Fresh samples
    pub samples: Vec<MetricSample>,
    /// Persisted breach state
    pub state: EngineState,
}

/// Ties sampler, evaluator, store and dispatcher together
pub struct RunCoordinator {
    store: StateStore,
    sampler: Box<dyn MetricSampler>,
    evaluator: ThresholdEvaluator,
    sink: Box<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    lock_policy: LockPolicy,
    deadline: Duration,
}

impl RunCoordinator {
    /// Create a new coordinator with the system clock and default policies
    pub fn new(
        store: StateStore,
        sampler: Box<dyn MetricSampler>,
        evaluator: ThresholdEvaluator,
        sink: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            store,
            sampler,
            evaluator,
            sink,
            clock: Arc::new(SystemClock),
            lock_policy: LockPolicy::default(),
            deadline: Duration::from_secs(55),
        }
    }

    /// Build the production pipeline from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        let identity = HostIdentity::detect(config.ec2_metadata).await;
        debug!(hostname = %identity.hostname, ip = %identity.ip_address, "Host identity resolved");

        let dispatcher = WebhookDispatcher::new(
            config.webhook_endpoint().map(String::from),
            identity,
            config.dispatch.timeout,
            config.retry_policy(),
        )?;
        let sampler = SystemSampler::new(config.disk_partitions.clone(), config.cpu_sample_window());

        Ok(Self::new(
            StateStore::new(&config.state_file),
            Box::new(sampler),
            ThresholdEvaluator::new(config.thresholds()),
            Box::new(dispatcher),
        )
        .with_lock_policy(config.lock_policy())
        .with_deadline(config.run_deadline()))
    }

    /// Use a different time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different lock wait policy
    #[must_use]
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    /// Use a different soft deadline per run
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// The state store this coordinator writes to
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Execute one run under the run lock
    pub async fn run_once(&mut self) -> Result<RunOutcome> {
        // Report and skip; the next run tries again.
        let mut lock = match RunLock::open(self.store.lock_path()) {
            Ok(lock) => lock,
            Err(e) => {
                error!(error = %e, "Could not open run lock, skipping run");
                return Ok(RunOutcome::Skipped);
            }
        };
        let waiting_since = Instant::now();

        loop {
            if let Some(_guard) = lock.try_acquire()? {
                let report = self.run_locked().await;
                return Ok(RunOutcome::Completed(report));
            }

            if waiting_since.elapsed() >= self.lock_policy.wait {
                debug!(lock = %lock.path().display(), "Another run holds the state lock, skipping");
                return Ok(RunOutcome::Skipped);
            }
            tokio::time::sleep(self.lock_policy.poll).await;
        }
    }

    /// Repeat [`run_once`](Self::run_once) every `interval` until `shutdown` resolves
    pub async fn run_loop<F>(&mut self, interval: Duration, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Stopping monitor");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(RunOutcome::Completed(report)) => {
                    debug!(alerts = report.alerts.len(), state_saved = report.state_saved, "Run complete");
                }
                Ok(RunOutcome::Skipped) => {}
                Err(e) => error!(error = %e, "Run failed"),
            }
        }
    }

    /// Send a synthetic alert, bypassing the evaluator and state
    pub async fn send_test_alert(&mut self) -> Result<DispatchOutcome> {
        let samples = self.sampler.sample();
        let cpu = samples
            .iter()
            .find(|sample| sample.kind == MetricKind::Cpu)
            .map_or(0.0, |sample| sample.value);

        let event = AlertEvent::synthetic(
            MetricKind::Cpu,
            cpu,
            self.evaluator.thresholds().cpu,
            self.clock.now(),
        );

        match self.sink.dispatch(&event).await {
            DispatchOutcome::Disabled => Err(Error::config("webhook_url is not configured")),
            DispatchOutcome::Failed { attempts, error } => Err(Error::Delivery {
                attempts,
                reason: error,
            }),
            delivered @ DispatchOutcome::Delivered { .. } => Ok(delivered),
        }
    }

    /// Sample now and read persisted state without changing anything
    pub fn status(&mut self) -> StatusReport {
        StatusReport {
            samples: self.sampler.sample(),
            state: self.store.load(),
        }
    }

    async fn run_locked(&mut self) -> RunReport {
        let deadline = Instant::now() + self.deadline;

        let prior = self.store.load();
        let samples = self.sampler.sample();
        debug!(readings = %summarize(&samples), "Sampled metrics");

        let Evaluation { state, alerts } = self.evaluator.evaluate(prior, &samples, self.clock.now());

        // State first: a slow or failing webhook must not cost us the timers.
        let state_saved = self.persist(&state);

        let mut deliveries = Vec::with_capacity(alerts.len());
        let sink = &self.sink;
        let dispatch_all = async {
            for alert in &alerts {
                let outcome = sink.dispatch(alert).await;
                deliveries.push((alert.key.clone(), outcome));
            }
        };

        let abandoned = if tokio::time::timeout_at(deadline, dispatch_all).await.is_err() {
            let abandoned = alerts.len() - deliveries.len();
            warn!(abandoned, "Run deadline reached, abandoning remaining alert deliveries");
            abandoned
        } else {
            0
        };

        RunReport {
            samples,
            alerts,
            deliveries,
            abandoned,
            state_saved,
        }
    }

    /// Save with one retry; failure is logged loudly but not propagated
    fn persist(&self, state: &EngineState) -> bool {
        let Err(first) = self.store.save(state) else {
            return true;
        };
        warn!(error = %first, "State save failed, retrying once");

        match self.store.save(state) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    error = %e,
                    path = %self.store.path().display(),
                    "Could not persist monitor state; breach timers from this run are lost"
                );
                false
            }
        }
    }
}
