pub mod anthropic;
pub mod chain;
pub mod local;
pub mod mock;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use chain::{ChainResponse, FallbackChain, ProviderInfo};
pub use local::LocalProvider;
pub use mock::{MockProvider, MockReply};
pub use openai::OpenAiProvider;
