use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use sqlx::{Acquire, PgPool};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::Instrument;

use crate::event::{Event, EventSource, PgEventSource};
use crate::flag::ShutdownFlag;
use crate::queue::{self, DequeuedTask};
use crate::registry::{Registry, TaskContext};
use crate::{schema, Config};

/// Every this many dequeues, one worker vacuums the task table to bound the
/// bloat caused by the constant INSERT/DELETE churn.
const VACUUM_CYCLE: i64 = 256;

pub(crate) struct SharedState {
    pub shutdown: ShutdownFlag,
    pub pool: PgPool,
    pub config: Config,
    pub registry: Registry,

    /// Wakes idle workers. Permits start at zero; the number of permits is
    /// the number of work-available signals not yet consumed, so adding one
    /// wakes exactly one waiter.
    semaphore: Semaphore,

    /// Counters, the sleep-race flag and the ticker handle are always read
    /// and written together, so they live behind a single lock.
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    /// Live workers.
    size: usize,
    /// Workers currently blocked on the semaphore.
    free: usize,
    /// Set by a worker about to decide whether to go idle, cleared by
    /// [`SharedState::wake_up_one`] when no worker is free to take a permit.
    /// The clearing tells the deciding worker to scan the queue once more
    /// instead of sleeping, so an event arriving while every worker is busy
    /// is never lost.
    may_sleep: bool,
    /// The single shared timer for deferred tasks.
    ticker: Option<Ticker>,
    /// Bumped every time a ticker is armed. A ticker task carries the epoch
    /// it was armed under and touches the slot only while that epoch is
    /// still current.
    ticker_epoch: u64,
}

struct Ticker {
    next_tick: Instant,
    epoch: u64,
    handle: JoinHandle<()>,
}

enum StepOutcome {
    /// Go back to waiting on the semaphore.
    Sleep,
    /// Keep popping: there may be more due work.
    Continue,
}

impl SharedState {
    fn running(&self) -> bool {
        !self.shutdown.is_raised()
    }

    /// Wake one idle worker, or stop the worker that is currently deciding
    /// to sleep from doing so.
    fn wake_up_one(&self) {
        let mut state = self.state.lock();
        if state.free > 0 {
            self.semaphore.add_permits(1);
        } else {
            state.may_sleep = false;
        }
    }

    /// Arm the shared ticker to fire `delay` seconds from now.
    ///
    /// All workers compete on the same schedule-ordered queue, so only the
    /// earliest future task matters: an earlier deadline cancels and
    /// replaces the armed timer, a later or equal one leaves it alone.
    fn arm_ticker(self: &Arc<Self>, delay: f64) {
        let next_tick = Instant::now() + Duration::from_secs_f64(delay);

        let mut state = self.state.lock();
        if let Some(ticker) = &state.ticker {
            if next_tick < ticker.next_tick {
                ticker.handle.abort();
                state.ticker = None;
            }
        }

        if state.ticker.is_none() {
            tracing::debug!(delay, "arming the deferred-task ticker");

            state.ticker_epoch += 1;
            let epoch = state.ticker_epoch;

            let shared = self.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep_until(next_tick).await;

                // abort() only lands at an await point, so a ticker whose
                // sleep already resolved can outlive its replacement. The
                // epoch tells such a straggler that the slot is no longer
                // its own: it must neither clear it nor wake anyone, the
                // ticker armed in its place owns both.
                {
                    let mut state = shared.state.lock();
                    let current = state.ticker.as_ref().map(|ticker| ticker.epoch);
                    if current != Some(epoch) {
                        return;
                    }
                    state.ticker = None;
                }
                shared.wake_up_one();
            });

            state.ticker = Some(Ticker {
                next_tick,
                epoch,
                handle,
            });
        }
    }

    fn stop_ticker(&self) {
        if let Some(ticker) = self.state.lock().ticker.take() {
            ticker.handle.abort();
        }
    }
}

pub struct ConsumerBuilder {
    pool: PgPool,
    config: Config,
    registry: Registry,
    event_source: Option<Box<dyn EventSource>>,
    create_schema: bool,
}

impl ConsumerBuilder {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            config: Config::default(),
            registry: Registry::new(),
            event_source: None,
            create_schema: true,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// The registry consulted to resolve task names into executable tasks.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the default `LISTEN`-backed event source.
    ///
    /// Mostly useful for tests that want to drive the coordinator without a
    /// notification trigger.
    pub fn event_source(mut self, source: Box<dyn EventSource>) -> Self {
        self.event_source = Some(source);
        self
    }

    /// Whether the `aintq` schema should be created on startup if it does
    /// not exist yet. The bootstrap is idempotent and on by default.
    pub fn create_schema(mut self, create: bool) -> Self {
        self.create_schema = create;
        self
    }

    pub async fn build(self) -> anyhow::Result<Consumer> {
        anyhow::ensure!(self.config.size >= 1, "consumer pool size must be at least 1");

        let event_source: Box<dyn EventSource> = match self.event_source {
            Some(source) => source,
            None => Box::new(
                PgEventSource::new(&self.pool)
                    .await
                    .context("failed to start listening for task events")?,
            ),
        };

        Ok(Consumer {
            shared: Arc::new(SharedState {
                shutdown: ShutdownFlag::new(),
                pool: self.pool,
                config: self.config,
                registry: self.registry,
                semaphore: Semaphore::new(0),
                state: Mutex::new(PoolState::default()),
            }),
            event_source,
            workers: JoinSet::new(),
            create_schema: self.create_schema,
        })
    }
}

/// A handle that can stop a running [`Consumer`] from anywhere.
#[derive(Clone)]
pub struct ConsumerHandle {
    shared: Arc<SharedState>,
}

impl ConsumerHandle {
    /// Request a graceful shutdown.
    ///
    /// No task is interrupted: workers finish whatever they are executing,
    /// observe the flag on their next wake-up and exit.
    pub fn shutdown(&self) {
        self.shared.shutdown.raise();
    }
}

/// The consumer coordinator: owns the worker pool, the wake-up protocol and
/// the notification listener.
pub struct Consumer {
    shared: Arc<SharedState>,
    event_source: Box<dyn EventSource>,
    workers: JoinSet<()>,
    create_schema: bool,
}

impl Consumer {
    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Run the consumer until [`ConsumerHandle::shutdown`] is called.
    ///
    /// The only error surfaced from a running consumer is the loss of the
    /// notification listener, which cannot be recovered here; the
    /// surrounding process is expected to restart.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        if self.create_schema {
            schema::create_all(&self.shared.pool).await?;
        }

        for index in 0..self.shared.config.size {
            let shared = self.shared.clone();
            self.workers
                .spawn(worker(shared).instrument(tracing::info_span!("worker", index)));
        }

        // One initial permit so the first worker to start drains whatever is
        // already sitting in the queue.
        self.shared.semaphore.add_permits(1);

        let result = self.process_events().await;

        self.shared.shutdown.raise();
        self.shared.stop_ticker();

        // Wake the whole pool so every idle worker observes the flag.
        self.shared.semaphore.add_permits(self.shared.config.size);

        while let Some(joined) = self.workers.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "a consumer worker panicked");
            }
        }

        result
    }

    async fn process_events(&mut self) -> anyhow::Result<()> {
        let shutdown = self.shared.shutdown.clone();

        loop {
            let event = tokio::select! {
                biased;

                _ = shutdown.wait() => break,
                event = self.event_source.next() => {
                    event.context("the task event listener failed")?
                }
            };

            if !self.shared.running() {
                break;
            }

            let Event::Enqueue { payload } = &event;
            tracing::trace!(payload = %payload, "received a new-task event");
            self.shared.wake_up_one();
        }

        Ok(())
    }
}

/// The outer worker loop.
///
/// A worker is idle until it is handed a semaphore permit; awake, it keeps
/// popping tasks until the queue has nothing due, then goes back to idle.
async fn worker(shared: Arc<SharedState>) {
    {
        let mut state = shared.state.lock();
        state.size += 1;
        state.free += 1;
    }
    tracing::info!("worker started");

    loop {
        let Ok(permit) = shared.semaphore.acquire().await else {
            break;
        };
        permit.forget();

        {
            let state = shared.state.lock();
            if !shared.running() || state.size > shared.config.size {
                break;
            }
        }
        tracing::debug!("awakened");
        shared.state.lock().free -= 1;

        let mut exiting = false;
        loop {
            match step(&shared).await {
                Ok(StepOutcome::Sleep) => break,
                Ok(StepOutcome::Continue) => {}
                Err(error) => {
                    // The outer transaction is gone along with its row lock;
                    // the task will be picked up again. The worker survives.
                    tracing::error!(?error, "a task step failed");
                    break;
                }
            }

            {
                let state = shared.state.lock();
                if !shared.running() || state.size > shared.config.size {
                    exiting = true;
                }
            }
            if exiting {
                break;
            }

            if let Err(error) = maybe_vacuum(&shared).await {
                tracing::error!(?error, "failed to vacuum the task table");
                break;
            }
        }

        shared.state.lock().free += 1;
        tracing::debug!("sleeping");

        if exiting {
            break;
        }
    }

    {
        let mut state = shared.state.lock();
        state.size -= 1;
        state.free -= 1;
    }
    tracing::info!("worker exited");
}

/// One dequeue attempt inside its own transaction.
///
/// Dequeuing and locking the task must be step one to avoid deadlocks. The
/// actual task code runs inside a savepoint, so a failing task rolls back
/// its own work while the outer transaction still commits with the row
/// deleted; a row is never executed twice.
async fn step(shared: &Arc<SharedState>) -> anyhow::Result<StepOutcome> {
    // Sleep after this step, unless a racing new-task event clears the flag.
    shared.state.lock().may_sleep = true;

    let mut tx = shared
        .pool
        .begin()
        .await
        .context("failed to begin a task transaction")?;

    let task = queue::dequeue_one(&mut tx).await?;

    let Some(task) = task else {
        tracing::debug!("end of queue");
        let outcome = sleep_or_continue(shared);
        tx.commit().await?;
        return Ok(outcome);
    };

    if let Some(delay) = task.delay.filter(|delay| *delay > 0.0) {
        tracing::debug!(delay, "next task is not due yet");
        shared.arm_ticker(delay);
        let outcome = sleep_or_continue(shared);
        tx.commit().await?;
        return Ok(outcome);
    }

    tracing::debug!(ctid = %task.ctid, name = %task.name, "got a task");

    // Wake another sleeping worker, if any, so the next task in the queue
    // can be picked up while this one is being executed.
    {
        let state = shared.state.lock();
        if state.free > 0 {
            shared.semaphore.add_permits(1);
        }
    }

    execute_in_savepoint(shared, &mut tx, &task).await?;

    // Always delete the task row after execution regardless of success or
    // failure, in order to avoid duplicate execution.
    queue::delete_by_ctid(&mut tx, &task.ctid).await?;
    tx.commit().await?;

    Ok(StepOutcome::Continue)
}

fn sleep_or_continue(shared: &SharedState) -> StepOutcome {
    if shared.state.lock().may_sleep {
        StepOutcome::Sleep
    } else {
        StepOutcome::Continue
    }
}

/// Resolve and execute the user task inside a savepoint.
///
/// Only a database error escapes here; a failing task is logged and its
/// savepoint rolled back, and an unregistered name is logged and treated as
/// a no-op success.
async fn execute_in_savepoint(
    shared: &SharedState,
    tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
    task: &DequeuedTask,
) -> anyhow::Result<()> {
    let Some(handler) = shared.registry.get(&task.name) else {
        tracing::warn!(name = %task.name, "no task registered under this name");
        metrics::counter!("aintq_tasks_unregistered").increment(1);
        return Ok(());
    };

    let mut savepoint = tx.begin().await.context("failed to open a task savepoint")?;

    let result: anyhow::Result<()> = async {
        let params = aintq_client::decode_params(&task.params)
            .context("failed to decode task parameters")?;
        let mut ctx = TaskContext::new(&mut savepoint, params);
        handler.run(&mut ctx).await
    }
    .await;

    match result {
        Ok(()) => {
            savepoint.commit().await?;
            metrics::counter!("aintq_tasks_executed").increment(1);
        }
        Err(error) => {
            tracing::error!(name = %task.name, ?error, "task failed, rolling back its savepoint");
            savepoint.rollback().await?;
            metrics::counter!("aintq_tasks_failed").increment(1);
        }
    }

    Ok(())
}

async fn maybe_vacuum(shared: &SharedState) -> anyhow::Result<()> {
    let seq = queue::next_delete_seq(&shared.pool).await?;
    if seq % VACUUM_CYCLE == 0 {
        tracing::debug!("vacuuming the task table");
        queue::vacuum_tasks(&shared.pool).await?;
    }

    Ok(())
}
