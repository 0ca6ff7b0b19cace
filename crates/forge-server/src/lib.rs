pub mod bridge;
pub mod frames;
pub mod orchestrator;
pub mod registry;
pub mod server;

pub use orchestrator::{ChatOutcome, Orchestrator};
pub use registry::ConnectionRegistry;
pub use server::{start, ServerConfig, ServerHandle};
