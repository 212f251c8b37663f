//! Filesystem artifact storage and eviction

pub mod artifacts;
pub mod sweeper;

pub use artifacts::ArtifactStore;
pub use sweeper::CleanupSweeper;
