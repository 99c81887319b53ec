//! Infrastructure layer for Parley.
//!
//! Contains implementations of the traits defined in `parley-core`: SQLite
//! conversation storage and the OpenAI-compatible streaming provider, plus
//! configuration file loading and data directory resolution.

pub mod config;
pub mod llm;
pub mod sqlite;
