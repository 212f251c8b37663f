//! Image preprocessing utilities for the generation pipeline

use anyhow::Result;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use ndarray::Array4;

/// Input size of the salient-object matting model (U²-Net).
pub const MATTING_INPUT_SIZE: (u32, u32) = (320, 320);

/// Input size of the vendored generation pipeline.
pub const PIPELINE_INPUT_SIZE: (u32, u32) = (512, 512);

/// Decode image from bytes with EXIF orientation handling
/// This ensures images are correctly oriented regardless of how they were captured
pub fn decode_image(data: &[u8]) -> Result<DynamicImage, image::ImageError> {
    let image = image::load_from_memory(data)?;
    Ok(apply_exif_orientation(data, image))
}

/// Apply EXIF orientation to correct image rotation
/// Mobile phones often store images with EXIF orientation tags instead of rotating pixels
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    use std::io::Cursor;

    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1) as u8,
        Err(_) => 1, // No EXIF or error reading, assume normal orientation
    };

    // See: https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        1 => image,
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Convert an RGB image to an NCHW tensor.
/// normalize: if true, normalize to [-1, 1], otherwise [0, 1]
pub fn image_to_nchw(image: &DynamicImage, normalize: bool) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for y in 0..height {
        for x in 0..width {
            let pixel = rgb.get_pixel(x, y);
            let (r, g, b) = (pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);

            if normalize {
                tensor[[0, 0, y as usize, x as usize]] = (r - 127.5) / 128.0;
                tensor[[0, 1, y as usize, x as usize]] = (g - 127.5) / 128.0;
                tensor[[0, 2, y as usize, x as usize]] = (b - 127.5) / 128.0;
            } else {
                tensor[[0, 0, y as usize, x as usize]] = r / 255.0;
                tensor[[0, 1, y as usize, x as usize]] = g / 255.0;
                tensor[[0, 2, y as usize, x as usize]] = b / 255.0;
            }
        }
    }

    tensor
}

/// Convert a single-channel mask to a 1x1xHxW tensor in [0, 1].
pub fn mask_to_nchw(mask: &GrayImage) -> Array4<f32> {
    let (width, height) = mask.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 1, height as usize, width as usize));

    for y in 0..height {
        for x in 0..width {
            tensor[[0, 0, y as usize, x as usize]] = mask.get_pixel(x, y)[0] as f32 / 255.0;
        }
    }

    tensor
}

/// Binarize a mask in place: any non-zero pixel becomes 255.
pub fn binarize_mask(mask: &mut GrayImage) {
    for pixel in mask.pixels_mut() {
        pixel[0] = if pixel[0] > 0 { 255 } else { 0 };
    }
}

/// Resize a mask to the given dimensions and re-binarize.
/// Interpolation introduces intermediate grey values at the silhouette edge.
pub fn resize_mask_to(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    let mut resized = image::imageops::resize(
        mask,
        width,
        height,
        image::imageops::FilterType::Triangle,
    );
    for pixel in resized.pixels_mut() {
        pixel[0] = if pixel[0] >= 128 { 255 } else { 0 };
    }
    resized
}

/// Aspect-preserving resize onto a zero-padded canvas, subject centered.
/// The generation pipeline expects letterboxed inputs, not stretched ones.
pub fn resize_with_padding(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (fit_w, fit_h) = fit_dimensions(image.width(), image.height(), width, height);
    let scaled = image
        .resize_exact(fit_w, fit_h, image::imageops::FilterType::Lanczos3)
        .to_rgb8();
    let mut canvas = RgbImage::new(width, height);
    let x = ((width - fit_w) / 2) as i64;
    let y = ((height - fit_h) / 2) as i64;
    image::imageops::overlay(&mut canvas, &scaled, x, y);
    DynamicImage::ImageRgb8(canvas)
}

/// Mask counterpart of [`resize_with_padding`]: same fit, same centering,
/// padding counts as background.
pub fn resize_mask_with_padding(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (fit_w, fit_h) = fit_dimensions(mask.width(), mask.height(), width, height);
    let scaled = resize_mask_to(mask, fit_w, fit_h);
    let mut canvas = GrayImage::new(width, height);
    let x = ((width - fit_w) / 2) as i64;
    let y = ((height - fit_h) / 2) as i64;
    image::imageops::overlay(&mut canvas, &scaled, x, y);
    canvas
}

/// Largest dimensions with the source aspect ratio fitting the target box.
fn fit_dimensions(width: u32, height: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let ratio = f64::min(
        target_w as f64 / width as f64,
        target_h as f64 / height as f64,
    );
    let fit_w = ((width as f64 * ratio).round() as u32).clamp(1, target_w);
    let fit_h = ((height as f64 * ratio).round() as u32).clamp(1, target_h);
    (fit_w, fit_h)
}

/// Apply a foreground mask as the alpha channel of an image.
/// The mask must match the image dimensions.
pub fn apply_alpha(image: &DynamicImage, mask: &GrayImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    debug_assert_eq!(rgba.dimensions(), mask.dimensions());

    for (x, y, pixel) in rgba.enumerate_pixels_mut() {
        pixel[3] = mask.get_pixel(x, y)[0];
    }

    rgba
}
