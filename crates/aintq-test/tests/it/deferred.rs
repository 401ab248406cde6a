use std::time::Duration;

use aintq_client::{AintqClient, TaskParams};
use aintq_runtime::{Config, Registry, TaskContext};
use anyhow::Context;
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::time::Instant;

#[sqlx::test]
async fn deferred_task_waits_for_its_schedule(
    pool_opts: PgPoolOptions,
    connect_opts: PgConnectOptions,
) -> anyhow::Result<()> {
    let pool = pool_opts.max_connections(6).connect_with(connect_opts).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Instant>();
    let mut registry = Registry::new();
    registry.register_sync("ping", move |_ctx: &mut TaskContext<'_>| {
        tx.send(Instant::now()).ok();
        Ok(())
    });

    let _guard =
        aintq_test::spawn_consumer_with(pool.clone(), registry, Config::new().size(2)).await?;

    let client = AintqClient::new(pool)?;
    let start = Instant::now();
    client
        .enqueue(
            "ping",
            TaskParams::new(),
            Some(Utc::now() + chrono::Duration::seconds(2)),
        )
        .await?;

    // Nothing may fire in the first second.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());

    let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .context("deferred task did not execute within its window")?
        .context("consumer dropped the recorder channel")?;

    let elapsed = fired - start;
    assert!(
        elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3),
        "deferred task fired after {elapsed:?}"
    );

    aintq_test::wait_until(Duration::from_secs(1), || {
        let client = client.clone();
        async move { Ok(client.count_pending().await? == 0) }
    })
    .await?;

    Ok(())
}

#[sqlx::test]
async fn earlier_schedule_supersedes_the_armed_ticker(
    pool_opts: PgPoolOptions,
    connect_opts: PgConnectOptions,
) -> anyhow::Result<()> {
    let pool = pool_opts.max_connections(6).connect_with(connect_opts).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<&'static str>();
    let mut registry = Registry::new();
    {
        let tx = tx.clone();
        registry.register_sync("a", move |_ctx: &mut TaskContext<'_>| {
            tx.send("a").ok();
            Ok(())
        });
    }
    registry.register_sync("b", move |_ctx: &mut TaskContext<'_>| {
        tx.send("b").ok();
        Ok(())
    });

    let _guard =
        aintq_test::spawn_consumer_with(pool.clone(), registry, Config::new().size(2)).await?;

    let client = AintqClient::new(pool)?;
    client
        .enqueue(
            "a",
            TaskParams::new(),
            Some(Utc::now() + chrono::Duration::seconds(10)),
        )
        .await?;

    // Let a worker observe task `a` and arm the ticker for ~10s before the
    // earlier task arrives.
    tokio::time::sleep(Duration::from_millis(500)).await;

    client
        .enqueue(
            "b",
            TaskParams::new(),
            Some(Utc::now() + chrono::Duration::seconds(2)),
        )
        .await?;

    let first = tokio::time::timeout(Duration::from_secs(4), rx.recv())
        .await
        .context("no deferred task executed, the ticker was not re-armed")?
        .context("consumer dropped the recorder channel")?;
    assert_eq!(first, "b");

    // `b`'s row disappears while `a` stays queued for later.
    aintq_test::wait_until(Duration::from_secs(1), || {
        let client = client.clone();
        async move { Ok(client.count_pending().await? == 1) }
    })
    .await?;

    Ok(())
}
