//! Business logic and repository trait definitions for Parley.
//!
//! This crate defines the "ports" (repository, provider, and token counter
//! traits) that the infrastructure layer implements. It depends only on
//! `parley-types` -- never on `parley-infra` or any database/IO crate.

pub mod chat;
pub mod llm;
