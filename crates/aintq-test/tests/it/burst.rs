use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aintq_client::{AintqClient, NewTask, TaskParams};
use aintq_runtime::{Config, Registry, Task, TaskContext};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

struct ItemTask {
    tx: tokio::sync::mpsc::UnboundedSender<i64>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for ItemTask {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let item: i64 = ctx.params().arg_as(0)?;
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.tx.send(item).ok();

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[sqlx::test]
async fn burst_executes_every_task_exactly_once(
    pool_opts: PgPoolOptions,
    connect_opts: PgConnectOptions,
) -> anyhow::Result<()> {
    const TASKS: i64 = 1000;
    const WORKERS: usize = 8;

    let pool = pool_opts
        .max_connections(WORKERS as u32 + 4)
        .connect_with(connect_opts)
        .await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<i64>();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut registry = Registry::new();
    registry.register(
        "item",
        ItemTask {
            tx,
            current: current.clone(),
            peak: peak.clone(),
        },
    );

    let _guard =
        aintq_test::spawn_consumer_with(pool.clone(), registry, Config::new().size(WORKERS))
            .await?;

    let client = AintqClient::new(pool)?;
    client
        .enqueue_many((0..TASKS).map(|item| NewTask::new("item", TaskParams::new().arg(item))))
        .await?;

    let mut seen = HashSet::new();
    tokio::time::timeout(Duration::from_secs(60), async {
        for _ in 0..TASKS {
            let item = rx.recv().await.context("recorder channel closed early")?;
            anyhow::ensure!(seen.insert(item), "task {item} executed twice");
        }
        Ok(())
    })
    .await
    .context("burst did not drain within 60s")??;

    assert_eq!(seen.len(), TASKS as usize);
    assert!(seen.iter().all(|item| (0..TASKS).contains(item)));

    // Concurrency never exceeded the pool size.
    assert!(peak.load(Ordering::SeqCst) <= WORKERS);

    aintq_test::wait_until(Duration::from_secs(5), || {
        let client = client.clone();
        async move { Ok(client.count_pending().await? == 0) }
    })
    .await?;

    // And no duplicate ever trickles in afterwards.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(rx.try_recv().is_err());

    Ok(())
}
