//! Mesh export module

pub mod glb;

pub use glb::{encode_glb, export_glb};
