//! Hugging Face Hub client for hf2gguf
//!
//! Implements [`hf2gguf_core::HubClient`] by listing a repository revision
//! and streaming every file into the requested directory.

pub mod api;
pub mod client;

pub use api::{RepoInfo, Sibling, DEFAULT_ENDPOINT};
pub use client::HuggingFaceHub;
