//! Embedding providers.
//!
//! A provider turns a batch of fragment texts into unit-length vectors of a
//! fixed dimension. A provider call either returns one vector per input or
//! fails for the whole batch.

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};
pub use providers::mock::MockProvider;
pub use providers::ollama::OllamaProvider;
