//! Conversations, their token-budgeted windows, and the completion use case.
//!
//! This module defines the `ConversationRepository` trait that the
//! infrastructure layer implements, the `Conversation` aggregate, and the
//! services that drive it.

pub mod completion;
pub mod conversation;
pub mod repository;
pub mod service;
pub mod window;

#[cfg(test)]
pub(crate) mod test_support;
