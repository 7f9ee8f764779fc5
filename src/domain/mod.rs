// These are public API re-exports - they may not be used internally yet
#![allow(unused_imports)]

//! Domain Layer
//!
//! This module contains the value objects and port traits the repository
//! layer is written against.
//!
//! # Architecture
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for persistence and access control,
//!   plus the record and query value objects they exchange
//!
//! # Usage
//!
//! ```ignore
//! use axai_pg::domain::ports::{EntityType, Filter, Persistence, QueryOptions};
//!
//! async fn drafts<P: Persistence>(store: &P) -> Result<Vec<Record>> {
//!     let filter = Filter::new().eq("status", "draft");
//!     store
//!         .find_many(&EntityType::document(), &filter, &QueryOptions::new())
//!         .await
//! }
//! ```

pub mod ports;

// Re-export commonly used types
pub use ports::{
    // Port traits
    AccessControl,
    Persistence,
    // Value objects
    AccessContext,
    Action,
    EntityType,
    Fields,
    Filter,
    OrderBy,
    QueryOptions,
    Record,
    RecordId,
    SortDirection,
    TextSearch,
    WriteOp,
    WriteOutcome,
    RECORD_COLUMNS,
};
