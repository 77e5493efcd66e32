pub mod arbiter;
pub mod openai;
pub mod retry;

pub use arbiter::LlmIntentArbiter;
pub use openai::OpenAiProvider;
pub use retry::RetryProvider;
