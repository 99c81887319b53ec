//! LLM provider abstractions for Parley.
//!
//! - `LlmProvider`: object-safe trait for streaming provider backends
//! - `TokenCounter`: pure token counting used for window budgeting

pub mod provider;
pub mod token_counter;
