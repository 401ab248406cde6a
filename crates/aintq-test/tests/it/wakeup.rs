use std::time::Duration;

use aintq_client::{AintqClient, TaskParams};
use aintq_runtime::{Config, Registry, Task, TaskContext};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::time::Instant;

struct SlowTask {
    tx: tokio::sync::mpsc::UnboundedSender<(&'static str, Instant)>,
}

#[async_trait]
impl Task for SlowTask {
    async fn run(&self, _ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        self.tx.send(("slow", Instant::now())).ok();
        Ok(())
    }
}

/// With a single worker busy on a slow task, a task enqueued mid-execution
/// must be picked up right after the slow one finishes, not after some
/// timeout: the arrival notification cannot be lost.
#[sqlx::test]
async fn enqueue_while_the_only_worker_is_busy_is_not_lost(
    pool_opts: PgPoolOptions,
    connect_opts: PgConnectOptions,
) -> anyhow::Result<()> {
    let pool = pool_opts.max_connections(4).connect_with(connect_opts).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(&'static str, Instant)>();

    let mut registry = Registry::new();
    registry.register("slow", SlowTask { tx: tx.clone() });
    registry.register_sync("fast", move |_ctx: &mut TaskContext<'_>| {
        tx.send(("fast", Instant::now())).ok();
        Ok(())
    });

    let _guard =
        aintq_test::spawn_consumer_with(pool.clone(), registry, Config::new().size(1)).await?;

    let client = AintqClient::new(pool)?;
    client.enqueue("slow", TaskParams::new(), None).await?;

    // Enqueue the second task while the only worker is mid-execution.
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.enqueue("fast", TaskParams::new(), None).await?;

    let (label, slow_done) = tokio::time::timeout(Duration::from_secs(4), rx.recv())
        .await
        .context("slow task did not finish")?
        .context("recorder channel closed")?;
    assert_eq!(label, "slow");

    let (label, fast_done) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .context("second task was not picked up after the first completed")?
        .context("recorder channel closed")?;
    assert_eq!(label, "fast");

    // Picked up immediately, not after some poll interval or timer.
    assert!(fast_done >= slow_done);
    assert!(
        fast_done - slow_done < Duration::from_millis(500),
        "second task lagged {:?} behind the first",
        fast_done - slow_done
    );

    Ok(())
}
