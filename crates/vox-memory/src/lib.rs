//! Durable conversational memory for Vox.
//!
//! An append-only SQLite turn log combined with an in-memory cosine
//! similarity index, fronted by the [`MemoryStore`] contract: `append`,
//! `query`, `flush`. Embeddings come from an injected
//! [`embedding::EmbeddingService`].

pub mod db;
pub mod embedding;
pub mod index;
mod migrations;
pub mod store;

pub use db::Database;
pub use embedding::{DynEmbeddingService, EmbeddingService, HashEmbedding};
pub use index::VectorIndex;
pub use store::{MemoryHit, MemoryStore};
