//! Service layer module

pub mod generation_service;
pub mod types;

pub use generation_service::GenerationService;
pub use types::*;
