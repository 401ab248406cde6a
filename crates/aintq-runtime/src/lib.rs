//! Consumer runtime for AintQ, a task queue coordinated entirely through
//! PostgreSQL: row locks plus `FOR UPDATE SKIP LOCKED` arbitrate between
//! workers and processes, `LISTEN`/`NOTIFY` provides low-latency wake-up,
//! and a savepoint around every user task keeps execution at-most-once.

mod config;
pub mod event;
pub mod flag;
mod queue;
mod registry;
mod schema;
mod worker;

pub use self::config::Config;
pub use self::event::{Event, EventSource, PgEventSource};
pub use self::registry::{Registry, Task, TaskContext};
pub use self::worker::{Consumer, ConsumerBuilder, ConsumerHandle};
