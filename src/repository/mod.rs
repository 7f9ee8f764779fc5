//! Repository layer
//!
//! `BaseRepository` and `DocumentRepository` talk to the persistence port;
//! the decorators compose around them:
//!
//! ```text
//! Secured ──▶ Instrumented ──▶ Cached ──▶ Base / Document ──▶ Persistence
//! ```

pub mod base;
pub mod cached;
pub mod document;
pub mod instrumented;
pub mod secured;
pub mod traits;

pub use base::BaseRepository;
pub use cached::{CacheDependencies, CachePolicy, CachedRepository};
pub use document::{DocumentRepository, DEFAULT_RELATION_DEPTH, SEARCH_FIELDS};
pub use instrumented::InstrumentedRepository;
pub use secured::SecuredRepository;
pub use traits::{DocumentQueries, Repository, RepositoryHandle};
