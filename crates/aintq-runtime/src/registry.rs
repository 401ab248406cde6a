use std::collections::HashMap;
use std::sync::Arc;

use aintq_client::TaskParams;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use sqlx::PgConnection;

/// Everything a task execution gets to see.
///
/// The connection points into the savepoint wrapping the execution: database
/// work done through it, including enqueues of follow-up tasks, is committed
/// only if the task returns `Ok` and is rolled back with the savepoint when
/// it fails.
pub struct TaskContext<'a> {
    conn: &'a mut PgConnection,
    params: TaskParams,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(conn: &'a mut PgConnection, params: TaskParams) -> Self {
        Self { conn, params }
    }

    /// The database connection scoped to this execution's savepoint.
    pub fn conn(&mut self) -> &mut PgConnection {
        self.conn
    }

    /// The decoded parameters this task was enqueued with.
    pub fn params(&self) -> &TaskParams {
        &self.params
    }
}

/// An executable task.
///
/// Implement this for task types that need async work or state of their own;
/// plain functions can be registered through [`Registry::register_fn`] and
/// [`Registry::register_sync`] instead.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()>;
}

struct SyncTask<F>(F);

#[async_trait]
impl<F> Task for SyncTask<F>
where
    F: Fn(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    async fn run(&self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}

struct FnTask<F>(F);

#[async_trait]
impl<F> Task for FnTask<F>
where
    F: for<'a, 'b> Fn(&'a mut TaskContext<'b>) -> BoxFuture<'a, anyhow::Result<()>>
        + Send
        + Sync,
{
    async fn run(&self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// Maps task names to executable tasks.
///
/// A registry is an explicit value handed to the consumer builder; there is
/// no process-global registration. Later registrations under the same name
/// replace earlier ones.
#[derive(Clone, Default)]
pub struct Registry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under `name`.
    pub fn register(&mut self, name: impl Into<String>, task: impl Task + 'static) {
        self.tasks.insert(name.into(), Arc::new(task));
    }

    /// Register an async function under `name`.
    ///
    /// The function receives the task context and returns a boxed future
    /// borrowing it; free functions of the shape
    /// `fn(&mut TaskContext<'_>) -> BoxFuture<'_, anyhow::Result<()>>`
    /// coerce directly.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: for<'a, 'b> Fn(&'a mut TaskContext<'b>) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.tasks.insert(name.into(), Arc::new(FnTask(f)));
    }

    /// Register a synchronous function under `name`.
    ///
    /// The function runs on the worker's async task, so it should not block
    /// for long; tasks that sleep or wait belong in [`register_fn`] or a
    /// [`Task`] implementation.
    ///
    /// [`register_fn`]: Registry::register_fn
    pub fn register_sync<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.tasks.insert(name.into(), Arc::new(SyncTask(f)));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Task>> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
