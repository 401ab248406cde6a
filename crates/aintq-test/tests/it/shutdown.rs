use std::time::Duration;

use aintq_runtime::Registry;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

#[sqlx::test]
async fn shutdown_timeout(
    pool_opts: PgPoolOptions,
    connect_opts: PgConnectOptions,
) -> anyhow::Result<()> {
    let pool = pool_opts.max_connections(12).connect_with(connect_opts).await?;

    let guard = aintq_test::spawn_consumer(pool.clone(), Registry::new()).await?;

    // Give the consumer a chance to start up
    tokio::time::sleep(Duration::from_secs(1)).await;

    guard.handle().shutdown();
    match tokio::time::timeout(Duration::from_secs(5), guard).await {
        Ok(result) => result,
        Err(_) => {
            panic!("unable to shut down the consumer in under 5s")
        }
    }
}
