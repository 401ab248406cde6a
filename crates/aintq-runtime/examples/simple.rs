//! Register a few tasks, enqueue some work and consume it.
//!
//! Requires `DATABASE_URL` to point at a PostgreSQL instance:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/aintq cargo run --example simple
//! ```

use std::time::Duration;

use aintq_client::{AintqClient, TaskParams};
use aintq_runtime::{Config, ConsumerBuilder, Registry, TaskContext};
use anyhow::Context;
use futures_util::future::BoxFuture;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn add(ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
    let a: i64 = ctx.params().arg_as(0)?;
    let b: i64 = ctx.params().kwarg_as("b")?;
    println!("add: {}", a + b);
    Ok(())
}

fn mul(ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
    let a: i64 = ctx.params().kwarg_as("a")?;
    let b: i64 = ctx.params().kwarg_as("b")?;
    println!("mul: {}", a * b);
    Ok(())
}

fn slow<'a>(ctx: &'a mut TaskContext<'_>) -> BoxFuture<'a, anyhow::Result<()>> {
    Box::pin(async move {
        let n: u64 = ctx.params().arg_as(0)?;
        println!("going to sleep for {n} seconds");
        tokio::time::sleep(Duration::from_secs(n)).await;
        println!("finished sleeping for {n} seconds");
        Ok(())
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .context("failed to connect to the database")?;

    let mut registry = Registry::new();
    registry.register_sync("add", add);
    registry.register_sync("mul", mul);
    registry.register_fn("slow", slow);

    let mut consumer = ConsumerBuilder::new(pool.clone())
        .config(Config::new().size(2))
        .registry(registry)
        .build()
        .await?;
    let handle = consumer.handle();

    tokio::task::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;

        tracing::info!("got ctrl-c, shutting down");
        handle.shutdown();
    });

    let client = AintqClient::new(pool)?;
    tokio::task::spawn(async move {
        // Give the consumer a moment to create the schema on first run.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let work = async {
            client
                .enqueue("add", TaskParams::new().arg(10).kwarg("b", 5), None)
                .await?;
            client
                .enqueue("mul", TaskParams::new().kwarg("a", 2).kwarg("b", 7), None)
                .await?;
            client.enqueue("slow", TaskParams::new().arg(5), None).await
        };

        if let Err(error) = work.await {
            tracing::error!(%error, "failed to enqueue example tasks");
        }
    });

    tracing::info!("consumer starting up");
    consumer.run().await
}
