//! Single-Image 3D Asset Generation Service Library

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod service;
pub mod storage;

pub use config::Config;
