use image::{imageops, RgbImage};
use ndarray::Array4;

/// Converts frames into the detector's input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Preprocessor {
    /// Resize frames to this size first; `None` feeds the native resolution
    input_size: Option<(u32, u32)>,
}

impl Preprocessor {
    pub fn new(input_size: Option<(u32, u32)>) -> Self {
        Self { input_size }
    }

    /// Preprocess an RGB image into an NHWC `u8` tensor
    ///
    /// The SSD graph takes raw 0..255 pixels and normalizes internally, so the
    /// only work here is the optional resize and the batch dimension.
    ///
    /// Returns: Array4<u8> with shape [1, height, width, 3]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<u8>, ndarray::ShapeError> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = match self.input_size {
            Some((width, height)) if image.dimensions() != (width, height) => {
                imageops::resize(image, width, height, imageops::FilterType::Triangle)
            }
            _ => image.clone(),
        };

        let (width, height) = resized.dimensions();
        Array4::from_shape_vec(
            (1, height as usize, width as usize, 3),
            resized.into_raw(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn keeps_native_resolution_in_nhwc_order() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 1, Rgb([10, 20, 30]));

        let tensor = Preprocessor::default().preprocess(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 2, 3, 3]);
        assert_eq!(tensor[[0, 1, 2, 0]], 10);
        assert_eq!(tensor[[0, 1, 2, 1]], 20);
        assert_eq!(tensor[[0, 1, 2, 2]], 30);
    }

    #[test]
    fn resizes_to_input_size() {
        let image = RgbImage::new(640, 480);
        let tensor = Preprocessor::new(Some((300, 300)))
            .preprocess(&image)
            .unwrap();
        assert_eq!(tensor.shape(), &[1, 300, 300, 3]);
    }
}
