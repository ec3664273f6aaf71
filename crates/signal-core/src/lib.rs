//! Core types for the Signal Synthesis local store.
//!
//! This crate is deliberately free of database dependencies. It defines the
//! persisted record shapes, the tables they live in, and the domain values
//! the repositories translate to and from.

pub mod analysis;
pub mod error;
pub mod policy;
pub mod record;

pub use error::{Error, Result};
