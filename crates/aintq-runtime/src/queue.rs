//! Dequeue and deletion of task rows.

use sqlx::PgConnection;

/// The dequeue statement.
///
/// Pops the task with the smallest schedule (nulls first), locked with
/// `FOR UPDATE SKIP LOCKED` so concurrent workers never block on each other;
/// they simply skip rows another transaction is working on. The `delay`
/// column is computed on the server so that every consumer shares one clock.
const DEQUEUE: &str = "
    SELECT ctid::text AS ctid, name, params,
           EXTRACT(EPOCH FROM schedule - (now() AT TIME ZONE 'utc'))::float8 AS delay
    FROM aintq.tasks
    ORDER BY schedule ASC NULLS FIRST
    LIMIT 1
    FOR UPDATE SKIP LOCKED
";

/// A task row locked by the current transaction.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DequeuedTask {
    /// The physical row id. Valid only inside the transaction holding the
    /// row lock; it must never be stored or compared across transactions.
    pub ctid: String,
    pub name: String,
    pub params: Vec<u8>,
    /// Seconds until the task is due. `None` for null schedules, negative
    /// when overdue, positive when the task is scheduled in the future.
    pub delay: Option<f64>,
}

/// Pop and lock at most one task row.
///
/// Must run inside a transaction; the row lock is released when that
/// transaction commits or rolls back.
pub(crate) async fn dequeue_one(conn: &mut PgConnection) -> sqlx::Result<Option<DequeuedTask>> {
    sqlx::query_as::<_, DequeuedTask>(DEQUEUE)
        .fetch_optional(conn)
        .await
}

/// Delete a row previously locked by [`dequeue_one`] in the same transaction.
pub(crate) async fn delete_by_ctid(conn: &mut PgConnection, ctid: &str) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM aintq.tasks WHERE ctid = $1::tid")
        .bind(ctid)
        .execute(conn)
        .await?;

    Ok(())
}

/// Advance the dequeue counter sequence.
pub(crate) async fn next_delete_seq(pool: &sqlx::PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT nextval('aintq.tasks_deletes')")
        .fetch_one(pool)
        .await
}

/// Reclaim bloat from the insert/delete churn on the task table.
///
/// VACUUM cannot run inside a transaction, so this always executes on a
/// plain pool connection.
pub(crate) async fn vacuum_tasks(pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query("VACUUM ANALYZE aintq.tasks").execute(pool).await?;

    Ok(())
}
