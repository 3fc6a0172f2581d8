//! Shared domain types for the maestro orchestration core.
//!
//! Everything that crosses a crate boundary lives here: the error taxonomy,
//! the canonical tool/chat types the LLM router normalizes to, the wire
//! schemas spoken by adapters and modules, permission ordering, and the
//! environment-driven configuration.

pub mod chat;
pub mod config;
pub mod error;
pub mod geo;
pub mod message;
pub mod notification;
pub mod permission;
pub mod tokens;
pub mod tool;

pub use error::{Error, Result};
