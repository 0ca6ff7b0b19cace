pub mod consumer;
pub mod producer;

pub use consumer::{EventConsumer, EventHandler, FnHandler};
pub use producer::{BusError, BusTransport, EventProducer, InMemoryTransport};
