//! Turns uploaded image bytes into the tensor the classifier was trained on.
//!
//! The network takes a single 150x150 RGB image in NHWC order, normalized the
//! way Keras' VGG16 `preprocess_input` does it: channels flipped to BGR and the
//! ImageNet channel means subtracted, without any rescaling.

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use ndarray::Array4;

use super::model::InferenceError;

pub const INPUT_SIZE: u32 = 150;
pub const CHANNELS: usize = 3;

/// ImageNet means in B, G, R order.
const BGR_MEANS: [f32; CHANNELS] = [103.939, 116.779, 123.68];

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, InferenceError> {
    let image = image::load_from_memory(bytes)?;
    log::debug!(
        "Decoded {}x{} image ({:?})",
        image.width(),
        image.height(),
        image.color()
    );
    Ok(image)
}

/// Greyscale, alpha and 16-bit images all collapse to 8-bit RGB.
pub fn to_rgb(image: &DynamicImage) -> RgbImage {
    image.to_rgb8()
}

pub fn preprocess(image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, CHANNELS));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        tensor[[0, y, x, 0]] = b as f32 - BGR_MEANS[0];
        tensor[[0, y, x, 1]] = g as f32 - BGR_MEANS[1];
        tensor[[0, y, x, 2]] = r as f32 - BGR_MEANS[2];
    }

    tensor
}
