//! Per-delivery processing.
//!
//! A delivery carries only a task pointer. The processor loads the row,
//! takes the lease, runs the step's work unit unless the output already
//! exists, and records the outcome. Every path ends in a [`Settlement`]
//! telling the executor what to do with the delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, Instrument};

use mediaflow_db::TaskStore;
use mediaflow_models::{
    Clock, NoopObserver, PipelineEvent, PipelineObserver, ProcessingTask, SystemClock, TaskId,
    TaskMessage,
};
use mediaflow_storage::ObjectStore;

use crate::claim::{route_claim_failure, ClaimRoute};
use crate::config::WorkerConfig;
use crate::error::WorkError;
use crate::logging::TaskLogger;
use crate::pipeline::PipelineAdvancer;
use crate::retry::{Disposition, RetryPolicy};
use crate::settlement::Settlement;
use crate::work::WorkRegistry;

/// Margin past a lease's end before its pointer is shown again.
const LEASE_GRACE: Duration = Duration::from_secs(1);

/// Knobs the processor needs from the worker configuration.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub worker_id: String,
    pub lease: Duration,
    pub work_timeout: Duration,
    pub retry: RetryPolicy,
}

impl From<&WorkerConfig> for ProcessorSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            lease: config.lease,
            work_timeout: config.work_timeout,
            retry: RetryPolicy::new(config.max_retries, config.retry_backoff),
        }
    }
}

/// Turns one delivery body into one settlement.
pub struct TaskProcessor {
    tasks: Arc<dyn TaskStore>,
    objects: Arc<dyn ObjectStore>,
    registry: WorkRegistry,
    advancer: PipelineAdvancer,
    observer: Arc<dyn PipelineObserver>,
    clock: Arc<dyn Clock>,
    settings: ProcessorSettings,
}

impl TaskProcessor {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        objects: Arc<dyn ObjectStore>,
        registry: WorkRegistry,
        advancer: PipelineAdvancer,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            tasks,
            objects,
            registry,
            advancer,
            observer: Arc::new(NoopObserver),
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Clock used to route refused claims. Must agree with the store's.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Process one delivery body.
    pub async fn process(&self, body: &[u8]) -> Settlement {
        let message = match TaskMessage::from_bytes(body) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, bytes = body.len(), "Rejecting malformed task pointer");
                self.observer.record(&PipelineEvent::Rejected);
                return Settlement::Reject(e.to_string());
            }
        };

        let logger = TaskLogger::new(&message, &self.settings.worker_id);
        let span = logger.create_span();
        self.process_message(&message, &logger)
            .instrument(span)
            .await
    }

    async fn process_message(&self, message: &TaskMessage, logger: &TaskLogger) -> Settlement {
        // Read before claiming so a lost read never strands a RUNNING row.
        let task = match self.tasks.get_task(&message.task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                logger.log_warning(0, "task row not found, dropping pointer");
                return Settlement::Ack;
            }
            Err(e) => {
                logger.log_warning(0, &format!("task load failed: {}", e));
                self.observer.record(&PipelineEvent::Transient);
                return Settlement::requeue();
            }
        };

        if task.status.is_terminal() {
            debug!(status = %task.status, "Task already resolved");
            self.observer.record(&PipelineEvent::ClaimContended);
            return Settlement::Ack;
        }

        match self
            .tasks
            .claim(&task.id, &self.settings.worker_id, self.settings.lease)
            .await
        {
            Ok(true) => {}
            Ok(false) => return self.route_refused(&task.id, logger).await,
            Err(e) => {
                logger.log_warning(task.retry_count, &format!("claim failed: {}", e));
                self.observer.record(&PipelineEvent::Transient);
                return Settlement::requeue();
            }
        }

        // The pre-claim read may predate a retry recorded by another worker.
        let task = match self.tasks.get_task(&task.id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                logger.log_warning(0, "task row vanished after claim");
                return Settlement::Ack;
            }
            Err(e) => {
                logger.log_warning(task.retry_count, &format!("reload after claim failed: {}", e));
                self.observer.record(&PipelineEvent::Transient);
                return Settlement::Hold {
                    after: self.settings.lease + LEASE_GRACE,
                };
            }
        };

        self.observer.record(&PipelineEvent::Claimed {
            step: task.step.clone(),
        });
        self.run_owned(&task, logger).await
    }

    async fn route_refused(&self, id: &TaskId, logger: &TaskLogger) -> Settlement {
        let current = match self.tasks.get_task(id).await {
            Ok(current) => current,
            Err(e) => {
                logger.log_warning(0, &format!("reload after refused claim failed: {}", e));
                self.observer.record(&PipelineEvent::Transient);
                return Settlement::requeue();
            }
        };

        match route_claim_failure(current.as_ref(), self.clock.now()) {
            ClaimRoute::Contended => {
                debug!("Claim lost, another owner holds the task or it is resolved");
                self.observer.record(&PipelineEvent::ClaimContended);
                Settlement::Ack
            }
            ClaimRoute::Missing => {
                logger.log_warning(0, "task row vanished after refused claim");
                Settlement::Ack
            }
            ClaimRoute::Deferred { wait } => {
                debug!(wait = ?wait, "Backoff window still running");
                self.observer.record(&PipelineEvent::ClaimDeferred);
                Settlement::Requeue { after: wait }
            }
            ClaimRoute::Abandoned => match self.tasks.release_expired_lease(id).await {
                Ok(released) => {
                    if released {
                        logger.log_warning(0, "released expired lease of a dead owner");
                        self.observer.record(&PipelineEvent::LeaseRecovered);
                    }
                    Settlement::requeue()
                }
                Err(e) => {
                    logger.log_warning(0, &format!("lease release failed: {}", e));
                    self.observer.record(&PipelineEvent::Transient);
                    Settlement::requeue()
                }
            },
        }
    }

    /// Runs with the lease held by this worker.
    async fn run_owned(&self, task: &ProcessingTask, logger: &TaskLogger) -> Settlement {
        match self.objects.exists(&task.output_key).await {
            Ok(true) => {
                debug!(output_key = %task.output_key, "Output exists, skipping work");
                return self.finish(task, logger, None).await;
            }
            Ok(false) => {}
            Err(e) => return self.escalate(task, WorkError::from(e), logger).await,
        }

        let Some(unit) = self.registry.get(&task.step) else {
            let err = WorkError::permanent(format!("no work unit registered for step {}", task.step));
            return self.escalate(task, err, logger).await;
        };

        logger.log_start(&format!("{} -> {}", task.input_key, task.output_key));
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.settings.work_timeout,
            unit.execute(&task.input_key, &task.output_key),
        )
        .await;

        match result {
            Ok(Ok(())) => self.finish(task, logger, Some(started.elapsed())).await,
            Ok(Err(e)) => self.escalate(task, e, logger).await,
            Err(_) => {
                let err = WorkError::Timeout(self.settings.work_timeout);
                self.escalate(task, err, logger).await
            }
        }
    }

    /// Chain the pipeline, then record success. `elapsed` is `None` when the
    /// work unit was skipped.
    async fn finish(
        &self,
        task: &ProcessingTask,
        logger: &TaskLogger,
        elapsed: Option<Duration>,
    ) -> Settlement {
        if let Err(e) = self.advancer.advance(task).await {
            let err = WorkError::failed(format!("pipeline advance failed: {}", e));
            return self.escalate(task, err, logger).await;
        }

        if let Err(e) = self.tasks.mark_succeeded(&task.id).await {
            let err = WorkError::failed(format!("recording success failed: {}", e));
            return self.escalate(task, err, logger).await;
        }

        let step = task.step.clone();
        match elapsed {
            Some(elapsed) => {
                logger.log_completion(&format!("took {:?}", elapsed));
                self.observer
                    .record(&PipelineEvent::Succeeded { step, elapsed });
            }
            None => {
                logger.log_completion("output already present");
                self.observer.record(&PipelineEvent::Skipped { step });
            }
        }
        Settlement::Ack
    }

    async fn escalate(&self, task: &ProcessingTask, err: WorkError, logger: &TaskLogger) -> Settlement {
        let reason = err.to_string();

        match self.settings.retry.decide(task.retry_count, err.is_permanent()) {
            Disposition::Retry { attempt, backoff } => {
                match self
                    .tasks
                    .mark_retry(&task.id, attempt, &reason, backoff)
                    .await
                {
                    Ok(()) => {
                        logger.log_warning(attempt, &reason);
                        self.observer.record(&PipelineEvent::Retried {
                            step: task.step.clone(),
                            attempt,
                        });
                        Settlement::Requeue {
                            after: Some(backoff),
                        }
                    }
                    Err(e) => self.unrecorded(task, attempt, &reason, e, logger),
                }
            }
            Disposition::Fail { attempt } => {
                match self.tasks.mark_failed(&task.id, attempt, &reason).await {
                    Ok(()) => {
                        logger.log_error(attempt, &reason);
                        self.advancer.fail(task).await;
                        self.observer.record(&PipelineEvent::Failed {
                            step: task.step.clone(),
                            attempt,
                        });
                        Settlement::DeadLetter(reason)
                    }
                    Err(e) => self.unrecorded(task, attempt, &reason, e, logger),
                }
            }
        }
    }

    /// The outcome could not be written and the row is still RUNNING under
    /// our lease. Withhold the pointer until that lease has lapsed so the
    /// next delivery finds it abandoned and recovers it.
    fn unrecorded(
        &self,
        task: &ProcessingTask,
        attempt: u32,
        reason: &str,
        e: mediaflow_db::DbError,
        logger: &TaskLogger,
    ) -> Settlement {
        logger.log_error(
            attempt,
            &format!("could not record outcome ({}): {}", reason, e),
        );
        self.observer.record(&PipelineEvent::Transient);
        let remaining = task
            .lock_until
            .and_then(|until| (until - self.clock.now()).to_std().ok())
            .unwrap_or(self.settings.lease);
        Settlement::Hold {
            after: remaining + LEASE_GRACE,
        }
    }
}
