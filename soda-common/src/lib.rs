//! # SODA Common Library
//!
//! Shared code for the soda curation crates including:
//! - Error and result types
//! - Bootstrap configuration lookup and logging settings
//! - Curation event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
