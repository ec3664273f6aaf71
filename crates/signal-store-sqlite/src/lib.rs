//! SQLite persistence for Signal Synthesis: watchlist, analysis history and
//! cached AI summaries.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Writes go through pooled
//! statements inside explicit transactions; reads can be one-shot or live
//! [`QueryChannel`]s that re-deliver after every commit touching their
//! tables.

mod ai_summary;
mod encode;
mod history;
mod store;
mod watchlist;

pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod invalidation;
pub mod lifecycle;
pub mod pool;
pub mod repository;
pub mod schema;
pub mod validate;

pub use ai_summary::AiSummaries;
pub use channel::{Observer, QueryChannel};
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use history::History;
pub use lifecycle::{Migration, OpenReport, StoreCallback};
pub use store::Store;
pub use validate::SchemaMismatch;
pub use watchlist::Watchlist;

#[cfg(test)]
mod tests;
