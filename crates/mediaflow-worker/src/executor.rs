//! Task executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mediaflow_queue::{Delivery, QueueResult, Transport};

use crate::config::{Redelivery, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::processor::TaskProcessor;
use crate::settlement::Settlement;

const CONSUME_ERROR_BACKOFF: Duration = Duration::from_secs(5);
const BUSY_POLL: Duration = Duration::from_millis(100);

/// Consumes task pointers and runs them through a [`TaskProcessor`] with at
/// most `prefetch` deliveries in flight.
pub struct TaskExecutor {
    config: WorkerConfig,
    processor: Arc<TaskProcessor>,
    transport: Arc<dyn Transport>,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl TaskExecutor {
    pub fn new(
        config: WorkerConfig,
        processor: Arc<TaskProcessor>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.prefetch));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            processor,
            transport,
            semaphore,
            shutdown,
        }
    }

    /// Run until [`TaskExecutor::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            worker_id = %self.config.worker_id,
            prefetch = self.config.prefetch,
            redelivery = %self.config.redelivery,
            "Starting task executor"
        );

        let reclaim_task = self.spawn_reclaimer();
        // Held deliveries land in the delayed set whatever the redelivery mode.
        let promote_task = self.spawn_promoter();

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_tasks() => {
                    if let Err(e) = result {
                        error!("Error consuming tasks: {}", e);
                        tokio::time::sleep(CONSUME_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        reclaim_task.abort();
        promote_task.abort();

        info!("Waiting for in-flight tasks to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_tasks())
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "In-flight tasks still running at shutdown; their leases will lapse"
            );
        }

        info!("Task executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_tasks(&self) -> WorkerResult<()> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(BUSY_POLL).await;
            return Ok(());
        }

        let deliveries = self
            .transport
            .consume(&self.config.worker_id, self.config.poll_block, available)
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }
        debug!(count = deliveries.len(), "Consumed deliveries");

        for delivery in deliveries {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("semaphore closed"))?;
            let processor = Arc::clone(&self.processor);
            let transport = Arc::clone(&self.transport);
            let redelivery = self.config.redelivery;

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) =
                    handle_delivery(&processor, transport.as_ref(), &delivery, redelivery).await
                {
                    error!(message_id = %delivery.id, "Failed to settle delivery: {}", e);
                }
            });
        }

        Ok(())
    }

    /// Periodically take over deliveries left unsettled by dead consumers.
    fn spawn_reclaimer(&self) -> JoinHandle<()> {
        let processor = Arc::clone(&self.processor);
        let transport = Arc::clone(&self.transport);
        let semaphore = Arc::clone(&self.semaphore);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.reclaim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let reclaimed = transport
                            .reclaim_idle(&config.worker_id, config.reclaim_min_idle, config.prefetch)
                            .await;
                        match reclaimed {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Reclaimed {} idle deliveries", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        break;
                                    };
                                    let processor = Arc::clone(&processor);
                                    let transport = Arc::clone(&transport);
                                    let redelivery = config.redelivery;

                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        if let Err(e) = handle_delivery(
                                            &processor,
                                            transport.as_ref(),
                                            &delivery,
                                            redelivery,
                                        )
                                        .await
                                        {
                                            error!(message_id = %delivery.id, "Failed to settle reclaimed delivery: {}", e);
                                        }
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to reclaim idle deliveries: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Move due delayed requeues back onto the stream.
    fn spawn_promoter(&self) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let period = self.config.promote_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = transport.promote_due().await {
                            warn!("Failed to promote delayed deliveries: {}", e);
                        }
                    }
                }
            }
        })
    }

    async fn wait_for_tasks(&self) {
        loop {
            if self.semaphore.available_permits() == self.config.prefetch {
                break;
            }
            tokio::time::sleep(BUSY_POLL).await;
        }
    }
}

/// Process one delivery and settle it. Returns the settlement applied.
pub async fn handle_delivery(
    processor: &TaskProcessor,
    transport: &dyn Transport,
    delivery: &Delivery,
    redelivery: Redelivery,
) -> QueueResult<Settlement> {
    let settlement = processor.process(&delivery.body).await;
    debug!(message_id = %delivery.id, settlement = settlement.label(), "Settling delivery");
    settlement.apply(transport, delivery, redelivery).await?;
    Ok(settlement)
}
