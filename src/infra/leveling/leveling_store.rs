// Implementations of the leveling storage ports.

#[cfg(test)]
pub mod in_memory;
pub mod json_store;
pub mod sqlite_store;

// Re-export for convenience
#[cfg(test)]
pub use in_memory::{InMemoryLevelStore, InMemorySettingsStore};
pub use json_store::JsonSettingsStore;
pub use sqlite_store::SqliteLevelStore;
