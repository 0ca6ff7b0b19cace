pub mod backend;
pub mod context;
pub mod error;
pub mod intent;
pub mod state;

pub use backend::{HttpBackend, MockBackend, ProjectBackend};
pub use context::{ContextAggregator, ExtractedEntities, RelevantContext};
pub use error::EngineError;
pub use intent::{Classification, IntentClassifier};
pub use state::{NextAction, StateTracker};
