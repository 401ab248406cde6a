mod burst;
mod deferred;
mod shutdown;
mod wakeup;
