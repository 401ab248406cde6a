//! Idempotent bootstrap of the `aintq` database namespace.

use anyhow::Context;
use sqlx::PgPool;

/// Statements safe to re-run on every startup. A failure here is fatal: the
/// consumer cannot operate without the table, index and sequence.
const CREATE: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS aintq",
    "
    CREATE TABLE IF NOT EXISTS aintq.tasks (
        schedule TIMESTAMP,
        name     TEXT NOT NULL,
        params   BYTEA NOT NULL
    )
    ",
    // Null schedules sort first so that as-soon-as-possible tasks pop before
    // every deferred one, and the dequeue's ORDER BY stays an index walk.
    "CREATE INDEX IF NOT EXISTS tasks_schedule_index ON aintq.tasks (schedule NULLS FIRST)",
    "CREATE SEQUENCE IF NOT EXISTS aintq.tasks_deletes CYCLE",
];

/// The notification trigger. `CREATE TRIGGER` has no `IF NOT EXISTS`, so a
/// duplicate-object error on re-creation is expected and swallowed.
const TRIGGER: &[&str] = &[
    "
    CREATE OR REPLACE FUNCTION aintq.notify_new_task() RETURNS TRIGGER AS $$ BEGIN
      PERFORM pg_notify('aintq_enqueue', NEW.ctid::varchar);
      RETURN NULL;
    END $$ LANGUAGE plpgsql
    ",
    "
    CREATE TRIGGER tasks_insert_notify AFTER INSERT ON aintq.tasks
    FOR EACH ROW EXECUTE PROCEDURE aintq.notify_new_task()
    ",
];

pub(crate) async fn create_all(pool: &PgPool) -> anyhow::Result<()> {
    for sql in CREATE {
        sqlx::query(sql)
            .execute(pool)
            .await
            .context("failed to create the task queue schema")?;
    }

    for sql in TRIGGER {
        if let Err(error) = sqlx::query(sql).execute(pool).await {
            if !is_duplicate_object(&error) {
                tracing::error!(%error, "failed to install the enqueue notification trigger");
            }
        }
    }

    Ok(())
}

fn is_duplicate_object(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(e) => e.code().as_deref() == Some("42710"),
        _ => false,
    }
}
