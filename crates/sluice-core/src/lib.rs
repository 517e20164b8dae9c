//! # sluice-core
//!
//! Core types, traits, and abstractions for the sluice pipeline.
//!
//! This crate provides the data model shared by every other sluice crate
//! (messages, jobs, processing results, notifications), the error taxonomy,
//! centralized defaults, and the collaborator traits the pipeline talks to:
//! [`MessageSource`], [`DurableSink`] and [`Notifier`].

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
