//! Provider abstractions for raw object storage and inference
//!
//! Stages depend on these traits only, so the local implementations can be
//! swapped for managed services or test doubles.

pub mod inference;
pub mod local;
pub mod object_store;
pub mod ollama;

pub use inference::InferenceProvider;
pub use local::LocalObjectStore;
pub use object_store::{ObjectStore, StoredObject};
pub use ollama::OllamaInference;
