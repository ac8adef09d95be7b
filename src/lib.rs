#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

//! # Turnmem
//!
//! Session-scoped, layered memory for conversational AI agents.
//!
//! Every session accumulates three levels of memory:
//!
//! - **L0 turns** — verbatim user/assistant/tool exchanges, ingested one
//!   at a time.
//! - **L1 episodes** — contiguous groupings of turns, opened and closed
//!   automatically by boundary rules (turn count, time gap, tool results,
//!   content patterns).
//! - **L2 facts** — LLM-distilled statements produced by reflecting on a
//!   closed episode, optionally consolidated against prior facts
//!   (kept, updated, added, or removed).
//!
//! A single [`MemorySession`] wires these together: ingest turns, recall
//! a token-budgeted slice of relevant context, and let reflection run in
//! the background as episodes close.
//!
//! ## Module organization
//!
//! ### Primary API
//! - [`session`]: the [`MemorySession`] facade
//! - [`ingestion`]: turn validation, marking, embedding, and persistence
//! - [`recall`]: budgeted, relevance-ranked context assembly
//! - [`reflection`]: episode-to-fact distillation and consolidation
//!
//! ### Supporting modules
//! - [`types`]: the data model (`Turn`, `Episode`, `Fact`, `ContextItem`, ...)
//! - [`config`]: validated configuration, with an environment overlay
//! - [`error`]: the crate-wide error taxonomy
//! - [`storage`]: the storage protocol plus an in-memory reference backend
//! - [`embeddings`]: the embedding provider protocol and cosine similarity
//! - [`reflector`]: the reflection provider protocol
//! - [`episode_manager`]: episode boundary rules and lifecycle
//! - [`markers`]: marker detection and scoring
//! - [`tokens`]: the token counter protocol
//! - [`coverage`]: keyword-overlap coverage checks for consolidation
//! - [`retry`]: exponential backoff with jitter for provider calls
//! - [`validation`]: pure input validation shared across pipelines
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnmem::{
//!     config::MemoryConfig, embeddings::NullEmbedder, reflector::ReflectorHandle,
//!     session::MemorySession, storage::InMemoryStorage, tokens::HeuristicTokenCounter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = MemorySession::new(
//!         "session-123",
//!         Arc::new(InMemoryStorage::new()),
//!         Arc::new(NullEmbedder::default()),
//!         Arc::new(HeuristicTokenCounter),
//!         ReflectorHandle::default(),
//!         MemoryConfig::default(),
//!     )?;
//!     session.initialize().await?;
//!
//!     session.ingest("user", "What database should we use?", None, None, None).await?;
//!     session.ingest("assistant", "Decision: use PostgreSQL.", None, None, None).await?;
//!
//!     let context = session.recall("database choice", None, true, None).await?;
//!     println!("{} context items recalled", context.len());
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coverage;
pub mod embeddings;
pub mod episode_manager;
pub mod error;
pub mod ingestion;
pub mod markers;
pub mod recall;
pub mod reflection;
pub mod reflector;
pub mod retry;
pub mod session;
pub mod storage;
pub mod tokens;
pub mod types;
pub mod validation;

pub use config::MemoryConfig;
pub use error::{Error, Result};
pub use session::MemorySession;
pub use types::{ContextItem, Episode, Fact, Turn};
