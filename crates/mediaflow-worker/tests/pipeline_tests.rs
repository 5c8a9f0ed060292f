//! Worker integration tests against the in-memory store, object store and
//! transport.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, RgbImage};
use rand::Rng;

use mediaflow_db::{InMemoryStore, MediaStore, TaskStore};
use mediaflow_models::{
    Clock, ManualClock, Media, MediaId, MediaStatus, NewTask, ProcessingTask, RecordingObserver, TaskId,
    TaskMessage, TaskStatus,
};
use mediaflow_queue::{
    Delivery, DispatchOutcome, InMemoryTransport, Settled, TaskDispatcher, Transport,
};
use mediaflow_storage::{InMemoryObjectStore, ObjectStore};
use mediaflow_worker::{
    builtin_registry, handle_delivery, Pipeline, PipelineAdvancer, ProcessorSettings, Redelivery,
    RetryPolicy, Settlement, TaskExecutor, TaskProcessor, WorkError, WorkRegistry, WorkUnit,
    WorkerConfig,
};

const ORIGINAL: &str = "media/m1/original.png";

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
}

/// Work unit that counts invocations and tracks overlap.
struct CountingUnit {
    objects: Arc<InMemoryObjectStore>,
    behaviour: Behaviour,
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl CountingUnit {
    fn new(objects: Arc<InMemoryObjectStore>, behaviour: Behaviour) -> Arc<Self> {
        Self::slow(objects, behaviour, Duration::ZERO)
    }

    fn slow(objects: Arc<InMemoryObjectStore>, behaviour: Behaviour, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            objects,
            behaviour,
            delay,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkUnit for CountingUnit {
    async fn execute(&self, _input_key: &str, output_key: &str) -> Result<(), WorkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = match self.behaviour {
            Behaviour::Succeed => self
                .objects
                .put_bytes(output_key, b"out".to_vec(), "image/jpeg")
                .await
                .map_err(WorkError::from),
            Behaviour::Fail => Err(WorkError::failed("encoder exploded")),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Work unit whose first failure also takes the task store down.
struct StoreOutageUnit {
    store: Arc<InMemoryStore>,
    objects: Arc<InMemoryObjectStore>,
    calls: AtomicUsize,
}

#[async_trait]
impl WorkUnit for StoreOutageUnit {
    async fn execute(&self, _input_key: &str, output_key: &str) -> Result<(), WorkError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.store.set_unavailable(true);
            return Err(WorkError::failed("disk full"));
        }
        self.objects
            .put_bytes(output_key, b"out".to_vec(), "image/jpeg")
            .await
            .map_err(WorkError::from)
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<InMemoryStore>,
    objects: Arc<InMemoryObjectStore>,
    transport: Arc<InMemoryTransport>,
    observer: Arc<RecordingObserver>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        Self {
            store: Arc::new(InMemoryStore::with_clock(clock.clone())),
            objects: Arc::new(InMemoryObjectStore::new()),
            transport: Arc::new(InMemoryTransport::with_clock(clock.clone())),
            observer: Arc::new(RecordingObserver::new()),
            clock,
        }
    }

    fn dispatcher(&self) -> TaskDispatcher {
        TaskDispatcher::new(
            self.store.clone(),
            self.transport.clone(),
            self.observer.clone(),
        )
    }

    fn advancer(&self, steps: &[&str]) -> PipelineAdvancer {
        PipelineAdvancer::new(
            Pipeline::new(steps.iter().map(|s| s.to_string()).collect()),
            self.dispatcher(),
            self.store.clone(),
        )
    }

    fn processor_as(
        &self,
        worker_id: &str,
        steps: &[&str],
        registry: WorkRegistry,
        retry: RetryPolicy,
    ) -> Arc<TaskProcessor> {
        let settings = ProcessorSettings {
            worker_id: worker_id.to_string(),
            lease: Duration::from_secs(60),
            work_timeout: Duration::from_secs(10),
            retry,
        };
        Arc::new(
            TaskProcessor::new(
                self.store.clone(),
                self.objects.clone(),
                registry,
                self.advancer(steps),
                settings,
            )
            .with_observer(self.observer.clone())
            .with_clock(self.clock.clone()),
        )
    }

    fn processor(&self, unit: Arc<dyn WorkUnit>, retry: RetryPolicy) -> Arc<TaskProcessor> {
        self.processor_as(
            "w1",
            &["resize"],
            WorkRegistry::new().with("resize", unit),
            retry,
        )
    }

    async fn create_media(&self, id: &str) -> MediaId {
        let media_id = MediaId::from(id);
        self.store
            .insert_media(&Media::new(media_id.clone(), ORIGINAL))
            .await
            .expect("Failed to insert media");
        media_id
    }

    async fn start(&self, media_id: &MediaId, step: &str) -> TaskId {
        match self
            .dispatcher()
            .dispatch(media_id, step, ORIGINAL)
            .await
            .expect("Failed to dispatch")
        {
            DispatchOutcome::Created(id) => id,
            DispatchOutcome::Duplicate => panic!("task already existed"),
        }
    }

    async fn next(&self) -> Option<Delivery> {
        self.transport
            .consume("w1", Duration::ZERO, 1)
            .await
            .expect("Failed to consume")
            .pop()
    }

    async fn deliver_next(&self, processor: &TaskProcessor, mode: Redelivery) -> Settlement {
        let delivery = self.next().await.expect("Nothing to deliver");
        handle_delivery(processor, self.transport.as_ref(), &delivery, mode)
            .await
            .expect("Failed to settle")
    }

    /// Deliver until the ready queue is empty.
    async fn drain(&self, processor: &TaskProcessor) -> Vec<Settlement> {
        let mut settled = Vec::new();
        while let Some(delivery) = self.next().await {
            let s = handle_delivery(processor, self.transport.as_ref(), &delivery, Redelivery::Immediate)
                .await
                .expect("Failed to settle");
            settled.push(s);
        }
        settled
    }

    async fn task(&self, id: &TaskId) -> ProcessingTask {
        self.store
            .get_task(id)
            .await
            .expect("Failed to load task")
            .expect("Task missing")
    }

    async fn media(&self, id: &MediaId) -> Media {
        self.store
            .get_media(id)
            .await
            .expect("Failed to load media")
            .expect("Media missing")
    }
}

fn pointer(id: &TaskId, media_id: &MediaId, step: &str) -> Vec<u8> {
    TaskMessage::new(id.clone(), media_id.clone(), step)
        .to_bytes()
        .expect("Failed to encode pointer")
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut out, ImageOutputFormat::Png)
        .expect("Failed to encode png");
    out.into_inner()
}

/// Two failures with a budget of two: RETRY with a 30s lease, refused early
/// reclaim, then FAILED and dead-lettered once the window passes.
#[tokio::test]
async fn test_bounded_retries_with_backoff_window() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Fail);
    let processor = h.processor(unit.clone(), RetryPolicy::new(2, Duration::from_secs(30)));
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;
    let t0 = h.clock.now();

    // Attempt 1
    let settlement = h.deliver_next(&processor, Redelivery::Delayed).await;
    assert_eq!(
        settlement,
        Settlement::Requeue {
            after: Some(Duration::from_secs(30))
        }
    );
    let task = h.task(&id).await;
    assert_eq!(task.status, TaskStatus::Retry);
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.lock_until, Some(t0 + chrono::Duration::seconds(30)));
    assert!(task.lock_owner.is_none());
    assert_eq!(h.transport.delayed_len(), 1);

    // Early reclaim is refused and does not run the unit
    h.clock.advance(chrono::Duration::seconds(10));
    assert!(!h
        .store
        .claim(&id, "w2", Duration::from_secs(60))
        .await
        .unwrap());
    let early = processor.process(&pointer(&id, &media_id, "resize")).await;
    assert_eq!(
        early,
        Settlement::Requeue {
            after: Some(Duration::from_secs(20))
        }
    );
    assert_eq!(unit.calls(), 1);
    assert_eq!(h.transport.promote_due().await.unwrap(), 0);

    // Attempt 2 after the window
    h.clock.advance(chrono::Duration::seconds(21));
    assert_eq!(h.transport.promote_due().await.unwrap(), 1);
    let settlement = h.deliver_next(&processor, Redelivery::Delayed).await;
    assert!(matches!(settlement, Settlement::DeadLetter(_)));

    let task = h.task(&id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.lock_owner.is_none());
    assert!(task.lock_until.is_none());
    assert_eq!(unit.calls(), 2);

    assert_eq!(h.transport.dead_letters().len(), 1);
    assert_eq!(h.transport.ready_len(), 0);
    assert_eq!(h.transport.delayed_len(), 0);
    assert_eq!(h.media(&media_id).await.status, MediaStatus::Failed);
    assert_eq!(h.observer.count("retried"), 1);
    assert_eq!(h.observer.count("failed"), 1);
}

/// Immediate redelivery during the backoff window requeues without work.
#[tokio::test]
async fn test_immediate_redelivery_spins_until_window_passes() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Fail);
    let processor = h.processor(unit.clone(), RetryPolicy::new(3, Duration::from_secs(30)));
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;

    h.deliver_next(&processor, Redelivery::Immediate).await;
    for _ in 0..3 {
        let s = h.deliver_next(&processor, Redelivery::Immediate).await;
        assert!(matches!(s, Settlement::Requeue { .. }));
    }
    assert_eq!(unit.calls(), 1);
    assert_eq!(h.observer.count("deferred"), 3);

    h.clock.advance(chrono::Duration::seconds(31));
    h.deliver_next(&processor, Redelivery::Immediate).await;
    assert_eq!(unit.calls(), 2);
    assert_eq!(h.task(&id).await.retry_count, 2);
}

/// Many workers racing on one pointer: one claim, one execution.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_owner() {
    let h = Harness::new();
    let unit = CountingUnit::slow(h.objects.clone(), Behaviour::Succeed, Duration::from_millis(50));
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;
    let body = pointer(&id, &media_id, "resize");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let processor = h.processor_as(
                &format!("w{}", i),
                &["resize"],
                WorkRegistry::new().with("resize", unit.clone() as Arc<dyn WorkUnit>),
                RetryPolicy::default(),
            );
            let body = body.clone();
            tokio::spawn(async move { processor.process(&body).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Settlement::Ack);
    }

    assert_eq!(unit.calls(), 1);
    assert_eq!(unit.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(h.observer.count("claimed"), 1);
    assert_eq!(h.task(&id).await.status, TaskStatus::Succeeded);
}

/// The same pointer delivered twice with random interleaving.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_delivery_randomized_interleaving() {
    for round in 0..25 {
        let h = Harness::new();
        let (work_ms, first_ms, second_ms) = {
            let mut rng = rand::rng();
            (
                rng.random_range(0..5u64),
                rng.random_range(0..3u64),
                rng.random_range(0..3u64),
            )
        };
        let unit = CountingUnit::slow(
            h.objects.clone(),
            Behaviour::Succeed,
            Duration::from_millis(work_ms),
        );
        let processor = h.processor(unit.clone(), RetryPolicy::default());
        let media_id = h.create_media("m1").await;
        let id = h.start(&media_id, "resize").await;

        let original = h.next().await.unwrap();
        h.transport.inject(original.body.clone());
        let duplicate = h.next().await.unwrap();

        let spawn = |delivery: Delivery, pause: u64| {
            let processor = processor.clone();
            let transport = h.transport.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(pause)).await;
                handle_delivery(&processor, transport.as_ref(), &delivery, Redelivery::Immediate)
                    .await
                    .unwrap()
            })
        };
        let a = spawn(original, first_ms);
        let b = spawn(duplicate, second_ms);
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!((a, b), (Settlement::Ack, Settlement::Ack), "round {}", round);
        assert_eq!(unit.calls(), 1, "round {}", round);
        assert_eq!(h.task(&id).await.status, TaskStatus::Succeeded);
        assert_eq!(h.transport.in_flight_len(), 0);
        assert_eq!(h.transport.ready_len(), 0);
    }
}

/// Redelivering a SUCCEEDED task changes nothing.
#[tokio::test]
async fn test_succeeded_task_is_never_reexecuted() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Succeed);
    let processor = h.processor(unit.clone(), RetryPolicy::default());
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;
    let body = pointer(&id, &media_id, "resize");

    assert_eq!(processor.process(&body).await, Settlement::Ack);
    let mutations = h.store.mutations();
    let before = h.task(&id).await;

    assert_eq!(processor.process(&body).await, Settlement::Ack);
    assert_eq!(h.store.mutations(), mutations);
    assert_eq!(h.task(&id).await, before);
    assert_eq!(unit.calls(), 1);
}

/// Existing output short-circuits the unit but still succeeds and chains.
#[tokio::test]
async fn test_existing_output_is_skipped() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Succeed);
    let processor = h.processor(unit.clone(), RetryPolicy::default());
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;
    h.objects.insert(h.task(&id).await.output_key, b"done".to_vec());

    assert_eq!(h.deliver_next(&processor, Redelivery::Immediate).await, Settlement::Ack);

    assert_eq!(unit.calls(), 0);
    assert_eq!(h.task(&id).await.status, TaskStatus::Succeeded);
    assert_eq!(h.observer.count("skipped"), 1);
    assert_eq!(h.media(&media_id).await.status, MediaStatus::Done);
}

/// Advancing the same task twice schedules the next step once.
#[tokio::test]
async fn test_advance_is_idempotent() {
    let h = Harness::new();
    let media_id = h.create_media("m1").await;
    let task = NewTask::new(media_id.clone(), "resize", ORIGINAL).into_record(h.clock.now());
    let advancer = h.advancer(&["resize", "thumbnail"]);

    advancer.advance(&task).await.unwrap();
    advancer.advance(&task).await.unwrap();

    let tasks = h.store.tasks_for_media(&media_id);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].step, "thumbnail");
    assert_eq!(tasks[0].input_key, task.output_key);
    assert_eq!(h.transport.published(), 1);
    assert_eq!(h.observer.count("duplicate"), 1);
}

/// Undecodable pointers are dead-lettered without touching the store.
#[tokio::test]
async fn test_malformed_pointer_is_rejected() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Succeed);
    let processor = h.processor(unit, RetryPolicy::default());
    h.transport.inject(b"{\"task_id\": 7".to_vec());

    let settlement = h.deliver_next(&processor, Redelivery::Immediate).await;
    assert!(matches!(settlement, Settlement::Reject(_)));
    assert_eq!(h.transport.dead_letters().len(), 1);
    assert_eq!(h.store.mutations(), 0);
}

/// A store outage before ownership requeues and leaves the row alone.
#[tokio::test]
async fn test_store_outage_requeues_pointer() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Succeed);
    let processor = h.processor(unit.clone(), RetryPolicy::default());
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;

    h.store.set_unavailable(true);
    let delivery = h.next().await.unwrap();
    let settlement =
        handle_delivery(&processor, h.transport.as_ref(), &delivery, Redelivery::Immediate)
            .await
            .unwrap();
    h.store.set_unavailable(false);

    assert_eq!(settlement, Settlement::requeue());
    assert_eq!(
        h.transport.settlements().last().map(|(_, s)| s.clone()),
        Some(Settled::Requeued)
    );
    let task = h.task(&id).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 0);

    h.drain(&processor).await;
    assert_eq!(h.task(&id).await.status, TaskStatus::Succeeded);
    assert_eq!(unit.calls(), 1);
}

/// A RUNNING row whose owner died is released and then processed.
#[tokio::test]
async fn test_abandoned_lease_is_recovered() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Succeed);
    let processor = h.processor(unit.clone(), RetryPolicy::default());
    let media_id = h.create_media("m1").await;

    let mut task = NewTask::new(media_id.clone(), "resize", ORIGINAL).into_record(h.clock.now());
    task.status = TaskStatus::Running;
    task.lock_owner = Some("crashed-worker".to_string());
    task.lock_until = Some(h.clock.now() - chrono::Duration::seconds(5));
    let id = task.id.clone();
    h.store.put_task(task);
    let body = pointer(&id, &media_id, "resize");

    assert_eq!(processor.process(&body).await, Settlement::requeue());
    let released = h.task(&id).await;
    assert_eq!(released.status, TaskStatus::Retry);
    assert!(released.lock_owner.is_none());
    assert!(released.lock_until.is_none());
    assert_eq!(released.retry_count, 0);
    assert_eq!(h.observer.count("recovered"), 1);

    assert_eq!(processor.process(&body).await, Settlement::Ack);
    assert_eq!(h.task(&id).await.status, TaskStatus::Succeeded);
    assert_eq!(unit.calls(), 1);
}

/// A live lease held by someone else is left alone.
#[tokio::test]
async fn test_live_foreign_lease_is_contended() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Succeed);
    let processor = h.processor(unit.clone(), RetryPolicy::default());
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;
    assert!(h
        .store
        .claim(&id, "other-worker", Duration::from_secs(60))
        .await
        .unwrap());

    assert_eq!(h.deliver_next(&processor, Redelivery::Immediate).await, Settlement::Ack);
    assert_eq!(unit.calls(), 0);
    assert_eq!(h.task(&id).await.lock_owner.as_deref(), Some("other-worker"));
    assert_eq!(h.observer.count("contended"), 1);
}

/// An outcome that cannot be written keeps its pointer until the lease
/// lapses, then lease recovery hands the task to the next delivery.
#[tokio::test]
async fn test_unwritable_outcome_is_recovered_after_lease() {
    let h = Harness::new();
    let unit = Arc::new(StoreOutageUnit {
        store: h.store.clone(),
        objects: h.objects.clone(),
        calls: AtomicUsize::new(0),
    });
    let processor = h.processor(unit.clone(), RetryPolicy::default());
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;

    let settlement = h.deliver_next(&processor, Redelivery::Immediate).await;
    h.store.set_unavailable(false);
    assert_eq!(
        settlement,
        Settlement::Hold {
            after: Duration::from_secs(61)
        }
    );
    assert_eq!(h.task(&id).await.status, TaskStatus::Running);
    assert_eq!(h.transport.ready_len(), 0);
    assert_eq!(h.transport.delayed_len(), 1);

    // Still inside our own lease: nothing to deliver
    h.clock.advance(chrono::Duration::seconds(30));
    assert_eq!(h.transport.promote_due().await.unwrap(), 0);

    h.clock.advance(chrono::Duration::seconds(31));
    assert_eq!(h.transport.promote_due().await.unwrap(), 1);
    assert_eq!(
        h.deliver_next(&processor, Redelivery::Immediate).await,
        Settlement::requeue()
    );
    assert_eq!(h.observer.count("recovered"), 1);
    assert_eq!(h.task(&id).await.status, TaskStatus::Retry);

    assert_eq!(h.deliver_next(&processor, Redelivery::Immediate).await, Settlement::Ack);
    assert_eq!(h.task(&id).await.status, TaskStatus::Succeeded);
    assert_eq!(unit.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.media(&media_id).await.status, MediaStatus::Done);
    assert_eq!(h.transport.ready_len(), 0);
    assert_eq!(h.transport.delayed_len(), 0);
}

/// A transport outage while chaining retries the step and the next step is
/// still scheduled once the transport is back.
#[tokio::test]
async fn test_next_step_is_published_after_transport_outage() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Succeed);
    let processor = h.processor_as(
        "w1",
        &["resize", "thumbnail"],
        WorkRegistry::new()
            .with("resize", unit.clone())
            .with("thumbnail", unit.clone()),
        RetryPolicy::default(),
    );
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;
    let delivery = h.next().await.expect("Nothing to deliver");

    h.transport.set_unavailable(true);
    let settlement = processor.process(&delivery.body).await;
    h.transport.set_unavailable(false);
    assert_eq!(
        settlement,
        Settlement::Requeue {
            after: Some(Duration::from_secs(30))
        }
    );

    let tasks = h.store.tasks_for_media(&media_id);
    assert_eq!(tasks.len(), 1, "unpublished next step must not linger");
    assert_eq!(tasks[0].status, TaskStatus::Retry);

    settlement
        .apply(h.transport.as_ref(), &delivery, Redelivery::Delayed)
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::seconds(31));
    assert_eq!(h.transport.promote_due().await.unwrap(), 1);

    // Output already written: skipped, then the next step goes out
    assert_eq!(h.deliver_next(&processor, Redelivery::Delayed).await, Settlement::Ack);
    assert_eq!(h.task(&id).await.status, TaskStatus::Succeeded);
    assert_eq!(unit.calls(), 1);
    assert_eq!(h.observer.count("skipped"), 1);

    assert_eq!(h.deliver_next(&processor, Redelivery::Delayed).await, Settlement::Ack);
    assert_eq!(unit.calls(), 2);

    let tasks = h.store.tasks_for_media(&media_id);
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Succeeded));
    let media = h.media(&media_id).await;
    assert_eq!(media.status, MediaStatus::Done);
    assert_eq!(media.final_key.as_deref(), Some("media/m1/thumbnail.jpg"));
}

/// resize -> thumbnail -> media DONE with the built-in image units.
#[tokio::test]
async fn test_two_step_pipeline_completes_media() {
    let h = Harness::new();
    h.objects.insert(ORIGINAL, png(2000, 1000));
    let processor = h.processor_as(
        "w1",
        &["resize", "thumbnail"],
        builtin_registry(h.objects.clone()),
        RetryPolicy::default(),
    );
    let media_id = h.create_media("m1").await;
    h.start(&media_id, "resize").await;

    let settled = h.drain(&processor).await;
    assert_eq!(settled, vec![Settlement::Ack, Settlement::Ack]);

    let tasks = h.store.tasks_for_media(&media_id);
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Succeeded));

    let media = h.media(&media_id).await;
    assert_eq!(media.status, MediaStatus::Done);
    assert_eq!(media.final_key.as_deref(), Some("media/m1/thumbnail.jpg"));

    let resized = h.objects.get_bytes("media/m1/resize.jpg").await.unwrap();
    assert_eq!(image::load_from_memory(&resized).unwrap().dimensions(), (1024, 512));
    let thumb = h.objects.get_bytes("media/m1/thumbnail.jpg").await.unwrap();
    assert_eq!(image::load_from_memory(&thumb).unwrap().dimensions(), (256, 128));
}

/// Undecodable input fails on the first attempt.
#[tokio::test]
async fn test_permanent_failure_is_dead_lettered() {
    let h = Harness::new();
    h.objects.insert(ORIGINAL, b"definitely not a png".to_vec());
    let processor = h.processor_as(
        "w1",
        &["resize", "thumbnail"],
        builtin_registry(h.objects.clone()),
        RetryPolicy::default(),
    );
    let media_id = h.create_media("m1").await;
    let id = h.start(&media_id, "resize").await;

    let settlement = h.deliver_next(&processor, Redelivery::Immediate).await;
    assert!(matches!(settlement, Settlement::DeadLetter(_)));

    let task = h.task(&id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 1);
    assert_eq!(h.media(&media_id).await.status, MediaStatus::Failed);
    assert_eq!(h.store.tasks_for_media(&media_id).len(), 1);
}

/// The executor consumes, processes and settles until shut down.
#[tokio::test]
async fn test_executor_processes_until_shutdown() {
    let h = Harness::new();
    let unit = CountingUnit::new(h.objects.clone(), Behaviour::Succeed);
    let processor = h.processor(unit.clone(), RetryPolicy::default());
    let config = WorkerConfig {
        worker_id: "w1".to_string(),
        prefetch: 2,
        poll_block: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(2),
        ..WorkerConfig::default()
    };
    let executor = Arc::new(TaskExecutor::new(config, processor, h.transport.clone()));
    let runner = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.run().await })
    };

    let first = h.create_media("m1").await;
    let second = h.create_media("m2").await;
    let ids = vec![
        h.start(&first, "resize").await,
        h.start(&second, "resize").await,
    ];

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut done = 0;
        for id in &ids {
            if h.task(id).await.status == TaskStatus::Succeeded {
                done += 1;
            }
        }
        if done == ids.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "tasks did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    executor.shutdown();
    runner.await.unwrap().unwrap();

    assert_eq!(unit.calls(), 2);
    assert_eq!(h.transport.in_flight_len(), 0);
    assert_eq!(h.media(&second).await.status, MediaStatus::Done);
}
