//! Vendored generation pipeline wrapper
//!
//! The actual 3D reconstruction lives in an external, unmodified pipeline.
//! This module exposes it through a single narrow capability: image + mask
//! in, raw geometry + texture out. Nothing outside this file depends on the
//! pipeline's tensor layout.

use std::sync::Arc;

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, RgbaImage};
use openvino::{ElementType, InferRequest, Shape, Tensor};
use tracing::info;

use crate::error::GenerationError;

use super::matting::read_tensor_f32;
use super::preprocess::{
    image_to_nchw, mask_to_nchw, resize_mask_with_padding, resize_with_padding,
    PIPELINE_INPUT_SIZE,
};
use super::runtime::PipelineRuntime;

/// Raw pipeline output prior to file-format encoding.
#[derive(Debug, Clone, Default)]
pub struct RawObject {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    /// Triangle indices into `positions`, three per face.
    pub indices: Vec<u32>,
    pub textures: Vec<TextureImage>,
}

/// A surface texture as raw RGBA pixels.
#[derive(Debug, Clone)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureImage {
    pub fn from_rgba(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            rgba: image.into_raw(),
        }
    }
}

/// The one capability the service needs from the vendored model.
pub trait ObjectPipeline: Send + Sync + 'static {
    /// Run the pipeline once on a foreground-isolated image.
    fn generate_single_object(
        &self,
        image: &DynamicImage,
        mask: &GrayImage,
    ) -> Result<RawObject, GenerationError>;

    /// Whether the one-time load has completed.
    fn is_loaded(&self) -> bool;
}

/// OpenVINO-backed pipeline adapter.
///
/// Output tensor layout of the exported pipeline graph:
/// 0: positions `[1, N, 3]`, 1: normals `[1, N, 3]`, 2: uvs `[1, N, 2]`,
/// 3: faces `[1, M, 3]`, 4: base-color texture `[1, 3, T, T]` in `[0, 1]`.
pub struct VendorPipeline {
    runtime: Arc<PipelineRuntime>,
}

impl VendorPipeline {
    pub fn new(runtime: Arc<PipelineRuntime>) -> Self {
        Self { runtime }
    }

    fn run_model(&self, image: &DynamicImage, mask: &GrayImage) -> Result<RawObject> {
        let (target_w, target_h) = PIPELINE_INPUT_SIZE;

        // Letterbox image and mask with the same transform so they stay
        // pixel-aligned
        let resized = resize_with_padding(image, target_w, target_h);
        let resized_mask = resize_mask_with_padding(mask, target_w, target_h);

        let image_tensor = image_to_nchw(&resized, true);
        let mask_tensor = mask_to_nchw(&resized_mask);

        let model = self.runtime.pipeline_model()?;
        let mut request = model.create_infer_request()?;

        let image_shape = Shape::new(&[1, 3, target_h as i64, target_w as i64])?;
        let mut image_input = Tensor::new(ElementType::F32, &image_shape)?;
        fill_tensor(
            &mut image_input,
            image_tensor
                .as_slice()
                .context("image tensor not contiguous")?,
        )?;

        let mask_shape = Shape::new(&[1, 1, target_h as i64, target_w as i64])?;
        let mut mask_input = Tensor::new(ElementType::F32, &mask_shape)?;
        fill_tensor(
            &mut mask_input,
            mask_tensor
                .as_slice()
                .context("mask tensor not contiguous")?,
        )?;

        request.set_input_tensor_by_index(0, &image_input)?;
        request.set_input_tensor_by_index(1, &mask_input)?;

        request.infer()?;

        let object = parse_outputs(&request)?;
        info!(
            "Pipeline produced {} vertices, {} triangles, {} texture(s)",
            object.positions.len(),
            object.indices.len() / 3,
            object.textures.len()
        );

        Ok(object)
    }
}

impl ObjectPipeline for VendorPipeline {
    fn generate_single_object(
        &self,
        image: &DynamicImage,
        mask: &GrayImage,
    ) -> Result<RawObject, GenerationError> {
        self.run_model(image, mask)
            .map_err(GenerationError::Inference)
    }

    fn is_loaded(&self) -> bool {
        self.runtime.is_loaded()
    }
}

fn fill_tensor(tensor: &mut Tensor, data: &[f32]) -> Result<()> {
    unsafe {
        let tensor_data = tensor.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
        std::ptr::copy_nonoverlapping(data.as_ptr(), tensor_data, data.len());
    }
    Ok(())
}

fn parse_outputs(request: &InferRequest) -> Result<RawObject> {
    let positions = read_tensor_f32(&request.get_output_tensor_by_index(0)?)?;
    let normals = read_tensor_f32(&request.get_output_tensor_by_index(1)?)?;
    let uvs = read_tensor_f32(&request.get_output_tensor_by_index(2)?)?;
    let faces = read_tensor_f32(&request.get_output_tensor_by_index(3)?)?;
    let texture_tensor = request.get_output_tensor_by_index(4)?;
    let texture_dims: Vec<i64> = texture_tensor.get_shape()?.get_dimensions().to_vec();
    let texture_data = read_tensor_f32(&texture_tensor)?;

    let vertex_count = positions.len() / 3;
    let indices = faces_to_indices(&faces, vertex_count)?;

    Ok(RawObject {
        positions: chunk3(&positions),
        normals: chunk3(&normals),
        uvs: chunk2(&uvs),
        indices,
        textures: vec![texture_from_chw(&texture_data, &texture_dims)?],
    })
}

/// Face tensor values arrive as floats; convert to u32 indices, rejecting
/// anything outside the vertex range.
pub fn faces_to_indices(faces: &[f32], vertex_count: usize) -> Result<Vec<u32>> {
    let mut indices = Vec::with_capacity(faces.len());
    for &value in faces {
        if !value.is_finite() || value < 0.0 {
            anyhow::bail!("pipeline emitted invalid face index {value}");
        }
        let index = value as u32;
        if index as usize >= vertex_count {
            anyhow::bail!(
                "face index {index} out of range for {vertex_count} vertices"
            );
        }
        indices.push(index);
    }
    Ok(indices)
}

fn chunk3(data: &[f32]) -> Vec<[f32; 3]> {
    data.chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect()
}

fn chunk2(data: &[f32]) -> Vec<[f32; 2]> {
    data.chunks_exact(2).map(|c| [c[0], c[1]]).collect()
}

/// Convert a 1x3xHxW float texture in [0, 1] to RGBA8.
fn texture_from_chw(data: &[f32], dims: &[i64]) -> Result<TextureImage> {
    if dims.len() != 4 || dims[1] != 3 {
        anyhow::bail!("unexpected texture tensor shape {dims:?}");
    }
    let height = dims[2] as u32;
    let width = dims[3] as u32;
    let plane = (width * height) as usize;
    if data.len() < plane * 3 {
        anyhow::bail!("texture tensor too small: {} < {}", data.len(), plane * 3);
    }

    let mut image = RgbaImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            let r = (data[idx].clamp(0.0, 1.0) * 255.0) as u8;
            let g = (data[plane + idx].clamp(0.0, 1.0) * 255.0) as u8;
            let b = (data[2 * plane + idx].clamp(0.0, 1.0) * 255.0) as u8;
            image.put_pixel(x, y, image::Rgba([r, g, b, 255]));
        }
    }

    Ok(TextureImage::from_rgba(image))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stub implementations shared by service and API tests.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::engine::matting::{BackgroundMatting, MatteOutput};
    use crate::engine::preprocess::apply_alpha;

    /// Matting stub: everything is foreground.
    pub struct StubMatting;

    impl BackgroundMatting for StubMatting {
        fn matte(&self, image: &DynamicImage) -> Result<MatteOutput, GenerationError> {
            let mask = GrayImage::from_pixel(image.width(), image.height(), image::Luma([255]));
            let foreground = apply_alpha(image, &mask);
            Ok(MatteOutput { foreground, mask })
        }
    }

    /// Pipeline stub returning a canned object, counting invocations.
    pub struct StubPipeline {
        loaded: AtomicBool,
        pub calls: AtomicUsize,
        pub object: RawObject,
    }

    impl StubPipeline {
        pub fn loaded() -> Self {
            Self {
                loaded: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
                object: unit_quad(),
            }
        }

        pub fn not_loaded() -> Self {
            Self {
                loaded: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                object: unit_quad(),
            }
        }

        pub fn mark_loaded(&self) {
            self.loaded.store(true, Ordering::SeqCst);
        }
    }

    impl ObjectPipeline for StubPipeline {
        fn generate_single_object(
            &self,
            _image: &DynamicImage,
            _mask: &GrayImage,
        ) -> Result<RawObject, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.object.clone())
        }

        fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }
    }

    /// Two-triangle quad with a 2x2 texture.
    pub fn unit_quad() -> RawObject {
        RawObject {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            indices: vec![0, 1, 2, 0, 2, 3],
            textures: vec![TextureImage::from_rgba(RgbaImage::from_pixel(
                2,
                2,
                image::Rgba([180, 60, 20, 255]),
            ))],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faces_to_indices() {
        let indices = faces_to_indices(&[0.0, 1.0, 2.0], 3).unwrap();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_faces_to_indices_rejects_out_of_range() {
        assert!(faces_to_indices(&[0.0, 5.0, 2.0], 3).is_err());
        assert!(faces_to_indices(&[-1.0], 3).is_err());
        assert!(faces_to_indices(&[f32::NAN], 3).is_err());
    }

    #[test]
    fn test_texture_from_chw() {
        // 1x3x2x2 tensor, red channel saturated
        let mut data = vec![0.0f32; 12];
        for v in data.iter_mut().take(4) {
            *v = 1.0;
        }
        let texture = texture_from_chw(&data, &[1, 3, 2, 2]).unwrap();
        assert_eq!((texture.width, texture.height), (2, 2));
        assert_eq!(&texture.rgba[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_texture_from_chw_rejects_bad_shape() {
        assert!(texture_from_chw(&[0.0; 12], &[1, 4, 2, 2]).is_err());
    }
}
