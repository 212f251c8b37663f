//! Inference engine module
//!
//! OpenVINO-backed execution: one-time model loading, background matting,
//! and the wrapper around the vendored single-image-to-3D pipeline.

pub mod generator;
pub mod matting;
pub mod preprocess;
pub mod runtime;

pub use generator::{ObjectPipeline, RawObject, TextureImage, VendorPipeline};
pub use matting::{BackgroundMatting, MatteOutput, OpenVinoMatting};
pub use runtime::PipelineRuntime;
