use async_trait::async_trait;
use sqlx::postgres::PgListener;

/// The notification channel the enqueue trigger publishes on.
pub const ENQUEUE_CHANNEL: &str = "aintq_enqueue";

/// A new-task event observed by the consumer coordinator.
#[derive(Clone, Debug)]
pub enum Event {
    /// A row was inserted into `aintq.tasks`.
    ///
    /// The payload is the inserted row's ctid as text. A ctid only
    /// identifies a row within the transaction that produced it, so the
    /// coordinator reacts to the event itself and never to the payload.
    Enqueue { payload: String },
}

#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> anyhow::Result<Event>;
}

/// An event source backed by `LISTEN` on a dedicated database connection.
pub struct PgEventSource {
    listener: PgListener,
}

impl PgEventSource {
    pub async fn new(pool: &sqlx::PgPool) -> sqlx::Result<Self> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(ENQUEUE_CHANNEL).await?;

        Ok(Self { listener })
    }
}

#[async_trait]
impl EventSource for PgEventSource {
    async fn next(&mut self) -> anyhow::Result<Event> {
        // A lost listener connection means notifications were dropped on the
        // floor. There is no way to know what we missed, so surface it as
        // fatal and let the surrounding process restart the consumer.
        match self.listener.try_recv().await? {
            Some(notification) => Ok(Event::Enqueue {
                payload: notification.payload().to_owned(),
            }),
            None => anyhow::bail!("the task event listener lost its connection"),
        }
    }
}
