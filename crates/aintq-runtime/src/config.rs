/// Options for an AintQ consumer.
#[derive(Clone, Debug, derive_setters::Setters)]
pub struct Config {
    /// The number of consumer workers in the pool.
    ///
    /// Each worker holds one database connection while it is executing tasks,
    /// so the pool handed to [`ConsumerBuilder`] should allow at least this
    /// many connections plus one for the notification listener.
    ///
    /// The default pool size is 8.
    ///
    /// [`ConsumerBuilder`]: crate::ConsumerBuilder
    pub size: usize,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { size: 8 }
    }
}
