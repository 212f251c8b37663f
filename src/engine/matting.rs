//! Background matting
//!
//! Salient-object matting with a U²-Net style model. Produces a binary
//! foreground mask at the input image's resolution plus the image itself
//! with the mask applied as its alpha channel.

use std::sync::Arc;

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, RgbaImage};
use openvino::{ElementType, Shape, Tensor};
use tracing::debug;

use crate::error::GenerationError;

use super::preprocess::{
    apply_alpha, binarize_mask, image_to_nchw, resize_mask_to, MATTING_INPUT_SIZE,
};
use super::runtime::PipelineRuntime;

/// Result of the matting pass.
#[derive(Debug, Clone)]
pub struct MatteOutput {
    /// Input image with non-subject pixels made transparent.
    /// Same pixel dimensions as the upload.
    pub foreground: RgbaImage,
    /// Binary foreground mask, 255 = subject.
    pub mask: GrayImage,
}

/// Background removal seam. The production implementation runs a matting
/// model on the device; tests substitute a stub.
pub trait BackgroundMatting: Send + Sync + 'static {
    fn matte(&self, image: &DynamicImage) -> Result<MatteOutput, GenerationError>;
}

/// OpenVINO-backed matting.
pub struct OpenVinoMatting {
    runtime: Arc<PipelineRuntime>,
}

impl OpenVinoMatting {
    pub fn new(runtime: Arc<PipelineRuntime>) -> Self {
        Self { runtime }
    }

    fn run_model(&self, image: &DynamicImage) -> Result<GrayImage> {
        let (target_w, target_h) = MATTING_INPUT_SIZE;
        let resized = image.resize_exact(
            target_w,
            target_h,
            image::imageops::FilterType::Triangle,
        );

        let input_tensor = image_to_nchw(&resized, false);

        let model = self.runtime.matting_model()?;
        let mut request = model.create_infer_request()?;

        let input_shape = Shape::new(&[1, 3, target_h as i64, target_w as i64])?;
        let mut input = Tensor::new(ElementType::F32, &input_shape)?;

        let input_data = input_tensor
            .as_slice()
            .context("matting input tensor not contiguous")?;
        unsafe {
            let tensor_data = input.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
            std::ptr::copy_nonoverlapping(input_data.as_ptr(), tensor_data, input_data.len());
        }

        request.set_input_tensor(&input)?;
        request.infer()?;

        // First output is the fused saliency map, 1x1xHxW.
        let output = request.get_output_tensor_by_index(0)?;
        let saliency = read_tensor_f32(&output)?;

        debug!("Matting produced {} saliency values", saliency.len());

        Ok(saliency_to_mask(&saliency, target_w, target_h))
    }
}

impl BackgroundMatting for OpenVinoMatting {
    fn matte(&self, image: &DynamicImage) -> Result<MatteOutput, GenerationError> {
        let mask_small = self
            .run_model(image)
            .map_err(GenerationError::Inference)?;

        let mut mask = resize_mask_to(&mask_small, image.width(), image.height());
        binarize_mask(&mut mask);

        let foreground = apply_alpha(image, &mask);

        Ok(MatteOutput { foreground, mask })
    }
}

/// Min-max normalize a saliency map and threshold it into a binary mask.
pub fn saliency_to_mask(saliency: &[f32], width: u32, height: u32) -> GrayImage {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in saliency {
        min = min.min(v);
        max = max.max(v);
    }
    let range = (max - min).max(1e-6);

    let mut mask = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            let value = saliency.get(idx).copied().unwrap_or(0.0);
            let normalized = (value - min) / range;
            mask.put_pixel(
                x,
                y,
                image::Luma([if normalized >= 0.5 { 255 } else { 0 }]),
            );
        }
    }

    mask
}

/// Read tensor data as f32 vector
pub(crate) fn read_tensor_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    let shape = tensor.get_shape()?;
    let dims: Vec<i64> = shape.get_dimensions().to_vec();
    let total_elements: i64 = dims.iter().product();

    let data: Vec<f32> = unsafe {
        let ptr = tensor.get_raw_data()?.as_ptr() as *const f32;
        std::slice::from_raw_parts(ptr, total_elements as usize).to_vec()
    };

    Ok(data)
}
