//! # Request Scheduler
//!
//! The only active component of the pipeline. Each pass:
//!
//! 1. selects due requests of its environment (payment before notifications,
//!    then oldest due first),
//! 2. claims each one with a conditional write ([`RequestClaimer`]),
//! 3. dispatches it to the resolved [`ChannelAdapter`](crate::channel::ChannelAdapter)
//!    under a hard timeout,
//! 4. classifies a failure ([`ErrorClassifier`]) and
//! 5. applies the result to both lifecycles ([`RequestOutcomeProcessor`]).
//!
//! Schedulers share nothing in memory. Any number of them, on any number of
//! hosts, may poll the same store; the claim is the only mutual exclusion.
//!
//! ## Running
//!
//! [`RequestScheduler::run_once_at`] performs one pass inline and is what tests
//! drive. [`RequestScheduler::spawn`] starts a poller feeding a bounded queue
//! that `worker_count` workers drain until the shutdown signal flips.
//!
//! The queue carries unclaimed snapshots. A worker claims its snapshot right
//! before dispatching it, so the lease always covers the attempt and never the
//! time spent waiting in the queue. A snapshot that went stale while queued
//! fails the claim and is skipped.

use super::error_classifier::{ErrorClassifier, ErrorClassifierConfig, ErrorContext, StandardErrorClassifier};
use super::outcome_processor::{RequestOutcome, RequestOutcomeProcessor};
use super::request_claimer::RequestClaimer;
use crate::channel::{ChannelRegistry, DispatchError};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::logging::log_error;
use crate::models::ChannelRequest;
use crate::persistence::{ChannelRequestStoreRef, PayOrderStoreRef};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// How one claimed request ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed(RequestOutcome),
    /// Another writer changed the row while we were dispatching
    Conflict,
    /// The outcome could not be applied. If the request row was not written its
    /// lease expires and the row is retried; `OrderSettlementFailed` means the
    /// request is decided and its order needs `reconcile_order`.
    Errored(String),
}

/// Counters for one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerRunSummary {
    pub polled: usize,
    pub claimed: usize,
    pub lost_claims: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub closed: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl SchedulerRunSummary {
    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Completed(RequestOutcome::Succeeded) => self.succeeded += 1,
            ProcessOutcome::Completed(RequestOutcome::Retrying { .. }) => self.retried += 1,
            ProcessOutcome::Completed(RequestOutcome::Closed { .. }) => self.closed += 1,
            ProcessOutcome::Conflict => self.conflicts += 1,
            ProcessOutcome::Errored(_) => self.errors += 1,
        }
    }
}

pub struct RequestScheduler {
    env: String,
    config: SchedulerConfig,
    requests: ChannelRequestStoreRef,
    claimer: RequestClaimer,
    channels: Arc<ChannelRegistry>,
    classifier: Arc<dyn ErrorClassifier>,
    processor: RequestOutcomeProcessor,
}

impl RequestScheduler {
    pub fn new(
        env: impl Into<String>,
        config: SchedulerConfig,
        order_store: PayOrderStoreRef,
        request_store: ChannelRequestStoreRef,
        channels: Arc<ChannelRegistry>,
    ) -> Self {
        let classifier = Arc::new(StandardErrorClassifier::with_config(
            ErrorClassifierConfig::from(&config),
        ));
        Self::with_classifier(env, config, order_store, request_store, channels, classifier)
    }

    pub fn with_classifier(
        env: impl Into<String>,
        config: SchedulerConfig,
        order_store: PayOrderStoreRef,
        request_store: ChannelRequestStoreRef,
        channels: Arc<ChannelRegistry>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        Self {
            env: env.into(),
            claimer: RequestClaimer::new(request_store.clone(), config.lease()),
            processor: RequestOutcomeProcessor::new(order_store, request_store.clone()),
            requests: request_store,
            config,
            channels,
            classifier,
        }
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn worker_id(&self) -> &str {
        self.claimer.worker_id()
    }

    /// One poll/claim/process pass at the given instant
    #[instrument(skip(self), fields(worker_id = %self.claimer.worker_id(), env = %self.env))]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<SchedulerRunSummary> {
        let due = self
            .requests
            .find_due(&self.env, now, self.config.batch_size)
            .await?;

        let mut summary = SchedulerRunSummary {
            polled: due.len(),
            ..Default::default()
        };

        for request in due {
            match self.claimer.claim(&request, now).await? {
                Some(claimed) => {
                    summary.claimed += 1;
                    let outcome = self.process_claimed(claimed, now).await;
                    summary.record(&outcome);
                }
                None => summary.lost_claims += 1,
            }
        }

        if summary.polled > 0 {
            info!(
                polled = summary.polled,
                claimed = summary.claimed,
                succeeded = summary.succeeded,
                retried = summary.retried,
                closed = summary.closed,
                "Scheduler pass complete"
            );
        } else {
            debug!("No due channel requests");
        }

        Ok(summary)
    }

    pub async fn run_once(&self) -> Result<SchedulerRunSummary> {
        self.run_once_at(Utc::now()).await
    }

    /// Dispatch a request this worker holds the lease on and apply the result.
    ///
    /// `now` is the attempt time; backoff and timestamps are measured from it.
    #[instrument(skip(self, request), fields(request_id = request.id, request_type = %request.request_type))]
    pub async fn process_claimed(&self, request: ChannelRequest, now: DateTime<Utc>) -> ProcessOutcome {
        if request.request_type.is_payment() {
            if let Err(e) = self.processor.begin_payment(&request.pay_order_no, now).await {
                log_error(
                    "request_scheduler",
                    "begin_payment",
                    &e.to_string(),
                    Some(&request.pay_order_no),
                );
                return ProcessOutcome::Errored(e.to_string());
            }
        }

        let started = Instant::now();
        let dispatched = self.dispatch(&request).await;

        let applied = match dispatched {
            Ok(response) => self.processor.apply_success(&request, &response, now).await,
            Err(dispatch_error) => {
                let context = ErrorContext {
                    request_id: request.id,
                    pay_order_no: request.pay_order_no.clone(),
                    request_type: request.request_type,
                    retry_count: request.retry_count,
                    execution_duration: started.elapsed(),
                };
                let classification = self.classifier.classify(&dispatch_error, &context);
                debug!(
                    classifier = self.classifier.classifier_name(),
                    code = %classification.error.code,
                    retryable = classification.is_retryable(),
                    "Dispatch failure classified"
                );
                self.processor
                    .apply_failure(&request, &classification, now)
                    .await
            }
        };

        match applied {
            Ok(outcome) => ProcessOutcome::Completed(outcome),
            Err(crate::error::PayflowError::StateMachine(e)) if e.is_conflict() => {
                warn!(
                    pay_order_no = %request.pay_order_no,
                    "Request changed during dispatch, outcome dropped"
                );
                ProcessOutcome::Conflict
            }
            Err(e) => {
                log_error(
                    "request_scheduler",
                    "apply_outcome",
                    &e.to_string(),
                    Some(&request.pay_order_no),
                );
                ProcessOutcome::Errored(e.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ChannelRequest,
    ) -> std::result::Result<crate::channel::ChannelResponse, DispatchError> {
        let adapter = self.channels.resolve(request)?;
        let timeout = self.config.dispatch_timeout();

        debug!(adapter = adapter.name(), timeout_ms = self.config.dispatch_timeout_ms, "Dispatching");
        match tokio::time::timeout(timeout, adapter.dispatch(request)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(timeout)),
        }
    }

    /// Start the poller and the worker pool; stops when `shutdown` becomes `true`.
    ///
    /// Snapshots queued at shutdown are still claimed and processed before the
    /// returned handle completes.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (sender, receiver) = mpsc::channel::<ChannelRequest>(self.config.queue_capacity);
            let receiver = Arc::new(Mutex::new(receiver));

            info!(
                worker_id = %self.worker_id(),
                env = %self.env,
                worker_count = self.config.worker_count,
                "Request scheduler starting"
            );

            let workers: Vec<JoinHandle<()>> = (0..self.config.worker_count)
                .map(|index| {
                    let scheduler = Arc::clone(&self);
                    let receiver = Arc::clone(&receiver);
                    tokio::spawn(async move { scheduler.worker_loop(index, receiver).await })
                })
                .collect();

            loop {
                if *shutdown.borrow() {
                    break;
                }

                if let Err(e) = self.poll_into(&sender).await {
                    error!(error = %e, "Scheduler poll failed");
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            drop(sender);
            for joined in join_all(workers).await {
                if let Err(e) = joined {
                    error!(error = %e, "Scheduler worker panicked");
                }
            }
            info!(worker_id = %self.worker_id(), "Request scheduler stopped");
        })
    }

    /// Queue due snapshots once the workers have drained the previous batch
    async fn poll_into(&self, sender: &mpsc::Sender<ChannelRequest>) -> Result<()> {
        // Queued rows are still due until claimed; polling now would queue them twice
        if sender.capacity() < sender.max_capacity() {
            debug!(queued = sender.max_capacity() - sender.capacity(), "Worker queue busy, skipping poll");
            return Ok(());
        }

        let limit = self.config.batch_size.min(sender.max_capacity());
        let due = self.requests.find_due(&self.env, Utc::now(), limit).await?;

        for request in due {
            if sender.send(request).await.is_err() {
                warn!("Worker queue closed, stopping poll");
                break;
            }
        }
        Ok(())
    }

    async fn worker_loop(&self, index: usize, receiver: Arc<Mutex<mpsc::Receiver<ChannelRequest>>>) {
        debug!(worker = index, "Scheduler worker started");
        loop {
            let next = receiver.lock().await.recv().await;
            let Some(snapshot) = next else {
                break;
            };

            let now = Utc::now();
            match self.claimer.claim(&snapshot, now).await {
                Ok(Some(claimed)) => {
                    let outcome = self.process_claimed(claimed, now).await;
                    debug!(worker = index, outcome = ?outcome, "Request processed");
                }
                Ok(None) => {
                    debug!(worker = index, request_id = snapshot.id, "Queued request no longer claimable, skipped");
                }
                Err(e) => {
                    error!(worker = index, request_id = snapshot.id, error = %e, "Claim failed");
                }
            }
        }
        debug!(worker = index, "Scheduler worker stopped");
    }
}
