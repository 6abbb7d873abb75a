mod manager;
mod memory_catalog;
mod migrations;
mod sqlite_manager;

pub use manager::MetadataStore;
pub use memory_catalog::InMemoryCatalog;
pub use sqlite_manager::SqliteCatalogManager;
