use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use aintq_runtime::{Config, ConsumerBuilder, ConsumerHandle, Registry};
use futures::FutureExt;
use tokio::task::JoinHandle;

pub async fn spawn_consumer(
    pool: sqlx::PgPool,
    registry: Registry,
) -> anyhow::Result<ConsumerShutdownGuard> {
    spawn_consumer_with(pool, registry, Config::new()).await
}

pub async fn spawn_consumer_with(
    pool: sqlx::PgPool,
    registry: Registry,
    config: Config,
) -> anyhow::Result<ConsumerShutdownGuard> {
    let mut consumer = ConsumerBuilder::new(pool.clone())
        .registry(registry)
        .config(config)
        .build()
        .await?;

    let handle = consumer.handle();
    let task = tokio::spawn(async move { consumer.run().await });

    // Tests enqueue as soon as this returns, so make sure the consumer has
    // finished bootstrapping its schema first.
    wait_for_schema(&pool).await?;

    Ok(ConsumerShutdownGuard { handle, task })
}

async fn wait_for_schema(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    loop {
        let table: Option<String> =
            sqlx::query_scalar("SELECT to_regclass('aintq.tasks')::text")
                .fetch_one(pool)
                .await?;

        if table.is_some() {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("consumer did not create its schema within 5s");
        }

        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if check().await? {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not reached within {timeout:?}");
        }

        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub struct ConsumerShutdownGuard {
    handle: ConsumerHandle,
    task: JoinHandle<anyhow::Result<()>>,
}

impl ConsumerShutdownGuard {
    pub fn handle(&self) -> ConsumerHandle {
        self.handle.clone()
    }
}

impl Future for ConsumerShutdownGuard {
    type Output = anyhow::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = std::task::ready!(self.task.poll_unpin(cx));

        Poll::Ready(match result {
            Ok(result) => result,
            Err(e) => match e.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(e) => Err(anyhow::anyhow!(e)),
            },
        })
    }
}

impl Drop for ConsumerShutdownGuard {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

#[ctor::ctor]
fn setup_tracing() {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
