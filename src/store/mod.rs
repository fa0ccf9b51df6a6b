//! Recording catalog, grouping and group persistence.

pub mod catalog;
pub mod persist;
pub mod recording;

// Re-export commonly used types
pub use catalog::{create_shared_catalog_with_persistence, Catalog, CatalogEvent, SharedCatalog};
pub use persist::{GroupRepository, Groups, PersistenceError};
pub use recording::Recording;
