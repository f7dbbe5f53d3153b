//! Completion Source Integration
//!
//! This module provides abstracted access to the remote completion service
//! through a common trait interface.
//!
//! # Available Backends
//!
//! - **OpenAI**: completion and chat completion endpoints (default)
//!
//! # Usage
//!
//! ```ignore
//! use gpterm_core::backend::{CompletionRequest, CompletionSource, OpenAiBackend};
//!
//! let backend = OpenAiBackend::new(DEFAULT_API_BASE, api_key)?;
//! let request = CompletionRequest::new("\nHello!\n", "text-davinci-003");
//! let mut stream = backend.open(&request).await?;
//! ```

mod openai;
mod traits;

pub use openai::{OpenAiBackend, DEFAULT_API_BASE};
pub use traits::{ApiStyle, CompletionRequest, CompletionSource, FragmentStream, StreamingToken};
