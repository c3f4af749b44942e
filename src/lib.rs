//! # Bindgraph - Cross-File Binding and Type Resolution
//!
//! Language-neutral binding engine over an entity ownership tree.
//!
//! Bindgraph provides:
//! - An entity arena (files, packages, types, functions, vars, aliases)
//!   with derived qualified names and multi-declaration grouping
//! - A graph builder driven by per-language parsers through a
//!   construction-stack ingestion API
//! - A name resolver walking scopes, imports, inheritance and mixins,
//!   with duck-typed candidate inference and extension-function lookup
//! - Expression type inference in dependency order, with overload
//!   narrowing, generic binding and per-container relation recording
//! - SQLite-backed eviction of resolved expression batches to bound
//!   peak memory on large codebases

pub mod builder;
pub mod entity;
pub mod lang;
pub mod name;
pub mod resolve;
pub mod store;
pub mod topo;

// Re-exports for convenient access
pub use builder::GraphBuilder;
pub use entity::repo::EntityRepo;
pub use entity::{Entity, EntityId, EntityKind, Relation, RelationKind};
pub use name::GenericName;
pub use resolve::{BindingResolver, ResolutionContext, ResolveOptions, UnresolvedSymbol};
pub use store::{ExpressionStore, MemoryStore, SqliteStore};

/// Result type alias for bindgraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for bindgraph operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No expression store configured")]
    NoStore,

    #[error("Expression batch missing from store for container {0}")]
    MissingBatch(i32),
}
