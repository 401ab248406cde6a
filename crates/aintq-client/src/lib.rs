//! Producer client for AintQ, a task queue that uses PostgreSQL as its only
//! backing store.
//!
//! Enqueuing a task is a single-row INSERT in its own transaction; a trigger
//! installed by the consumer runtime notifies listening consumers, so there
//! is no application-level publish step.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use sqlx::{Acquire, PgConnection, PgPool};

mod error;
mod params;

pub use self::error::{AintqError, AintqErrorKind};
pub use self::params::{decode_params, encode_params, TaskParams};

/// A client for enqueuing tasks.
#[derive(Clone)]
pub struct AintqClient {
    pool: PgPool,
}

impl AintqClient {
    /// Create a new client from a PgPool instance.
    pub fn new(pool: PgPool) -> Result<Self, AintqError> {
        // At the moment this constructor is infallible. However, we return an
        // error here in case we want to validate that we are actually
        // connecting to a compatible database later on.

        Ok(Self { pool })
    }

    /// Access the connection pool this client was built from.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueue one task.
    ///
    /// A `schedule` of `None` means "execute as soon as possible"; a
    /// timestamp defers execution until that instant. The insert runs in its
    /// own transaction.
    pub async fn enqueue(
        &self,
        name: impl AsRef<str>,
        params: TaskParams,
        schedule: Option<DateTime<Utc>>,
    ) -> Result<(), AintqError> {
        let mut conn = self.pool.acquire().await?;
        self.enqueue_with(name.as_ref(), params, schedule, &mut conn)
            .await
    }

    /// Enqueue one task using the provided database connection.
    ///
    /// This allows the enqueue to be done as part of a larger transaction:
    /// if the surrounding transaction rolls back, the task is never queued
    /// and no notification is emitted.
    pub async fn enqueue_with(
        &self,
        name: &str,
        params: TaskParams,
        schedule: Option<DateTime<Utc>>,
        conn: &mut PgConnection,
    ) -> Result<(), AintqError> {
        let encoded = encode_params(&params)?;

        let mut tx = conn.begin().await?;
        sqlx::query("INSERT INTO aintq.tasks (schedule, name, params) VALUES ($1, $2, $3)")
            .bind(schedule.map(|at| at.naive_utc()))
            .bind(name)
            .bind(encoded)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Enqueue many tasks at once.
    ///
    /// This is more efficient than calling [`enqueue`] in a loop since it
    /// inserts every row with a single statement in a single transaction.
    ///
    /// [`enqueue`]: AintqClient::enqueue
    pub async fn enqueue_many<'a>(
        &self,
        tasks: impl IntoIterator<Item = NewTask<'a>>,
    ) -> Result<(), AintqError> {
        let mut names = Vec::new();
        let mut params = Vec::new();
        let mut schedules = Vec::new();
        for task in tasks {
            names.push(task.name.into_owned());
            params.push(encode_params(&task.params)?);
            schedules.push(task.schedule.map(|at| at.naive_utc()));
        }

        if names.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "
            INSERT INTO aintq.tasks (schedule, name, params)
            SELECT t.schedule, t.name, t.params
            FROM UNNEST($1::timestamp[], $2::text[], $3::bytea[]) AS t(schedule, name, params)
            ",
        )
        .bind(schedules)
        .bind(names)
        .bind(params)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Count the task rows currently in the queue.
    ///
    /// A task row exists exactly while the work is neither in flight nor
    /// completed, so this is the queue depth as of the snapshot the query
    /// runs under.
    pub async fn count_pending(&self) -> Result<i64, AintqError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM aintq.tasks")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// One task in a batch enqueue.
#[derive(Clone, Debug)]
pub struct NewTask<'a> {
    name: Cow<'a, str>,
    params: TaskParams,
    schedule: Option<DateTime<Utc>>,
}

impl<'a> NewTask<'a> {
    pub fn new(name: impl Into<Cow<'a, str>>, params: TaskParams) -> Self {
        Self {
            name: name.into(),
            params,
            schedule: None,
        }
    }

    /// Defer execution until `at`.
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.schedule = Some(at);
        self
    }
}
