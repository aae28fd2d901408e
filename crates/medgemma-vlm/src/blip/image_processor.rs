use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, DynamicImage};

use crate::error::VlmError;

/// Side of the square input of the BLIP vision encoder.
pub const IMAGE_SIZE: usize = 384;

// CLIP normalization used by the BLIP processor
pub const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// Decode an encoded image (png, jpeg, webp, ...) from raw bytes.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, VlmError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Convert an image into the BLIP vision input.
///
/// # Arguments
///
/// * `image` - The image to process, any color type.
/// * `device` - The device to place the tensor on.
///
/// # Returns
///
/// A normalized F32 tensor with shape [3, 384, 384].
pub fn preprocess(image: &DynamicImage, device: &Device) -> Result<Tensor, VlmError> {
    let rgb = image
        .resize_exact(IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::CatmullRom)
        .to_rgb8();

    let mean = Tensor::from_slice(&IMAGE_MEAN, (3, 1, 1), device)?;
    let std = Tensor::from_slice(&IMAGE_STD, (3, 1, 1), device)?;

    let pixels = Tensor::from_vec(rgb.into_raw(), (IMAGE_SIZE, IMAGE_SIZE, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1. / 255., 0.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;

    Ok(pixels)
}
