use std::io::Cursor;

use candle_core::{Device, Tensor};
use image::imageops::FilterType;

use crate::error::DecodeError;

/// Side length the classifier was trained on.
pub const IMAGE_SIZE: u32 = 128;

/// Decodes an uploaded image held in memory into a tensor with shape
/// (128, 128, 3), dtype u8, RGB channel order.
///
/// The image is stretched to size with bilinear filtering, no crop or padding,
/// which is the preprocessing the model saw during training.
pub fn load_image(bytes: &[u8]) -> Result<Tensor, DecodeError> {
    load_image_sized(bytes, IMAGE_SIZE)
}

pub fn load_image_sized(bytes: &[u8], size: u32) -> Result<Tensor, DecodeError> {
    let img = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?
        .resize_exact(size, size, FilterType::Triangle);
    let data = img.to_rgb8().into_raw();
    let side = size as usize;
    Ok(Tensor::from_vec(data, (side, side, 3), &Device::Cpu)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn solid_png(w: u32, h: u32, px: [u8; 3]) -> Vec<u8> {
        encode(DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(px))), ImageFormat::Png)
    }

    #[test]
    fn any_size_resizes_to_model_input() {
        for (w, h) in [(1, 1), (3, 200), (128, 128), (500, 40), (640, 480)] {
            let tensor = load_image(&solid_png(w, h, [10, 200, 30])).unwrap();
            assert_eq!(tensor.dims(), &[128, 128, 3], "{w}x{h}");
            assert_eq!(tensor.dtype(), DType::U8);
        }
    }

    #[test]
    fn keeps_rgb_channel_order() {
        let tensor = load_image(&solid_png(16, 16, [250, 5, 100])).unwrap();
        let px = tensor.get(64).unwrap().get(64).unwrap().to_vec1::<u8>().unwrap();
        assert_eq!(px, vec![250, 5, 100]);
    }

    #[test]
    fn jpeg_decodes() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([40, 160, 40])));
        let tensor = load_image(&encode(img, ImageFormat::Jpeg)).unwrap();
        assert_eq!(tensor.dims(), &[128, 128, 3]);
    }

    #[test]
    fn grayscale_and_alpha_become_three_channels() {
        let gray = encode(DynamicImage::ImageLuma8(GrayImage::from_pixel(9, 9, Luma([77]))), ImageFormat::Png);
        let tensor = load_image(&gray).unwrap();
        assert_eq!(tensor.dims(), &[128, 128, 3]);
        let px = tensor.get(0).unwrap().get(0).unwrap().to_vec1::<u8>().unwrap();
        assert_eq!(px, vec![77, 77, 77]);

        let rgba = RgbaImage::from_pixel(9, 9, Rgba([1, 2, 3, 0]));
        let tensor = load_image(&encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png)).unwrap();
        assert_eq!(tensor.dims(), &[128, 128, 3]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(load_image(&[]).is_err());
        assert!(load_image(b"definitely not an image").is_err());

        let mut truncated = solid_png(64, 64, [1, 2, 3]);
        truncated.truncate(truncated.len() / 2);
        let err = load_image(&truncated).unwrap_err();
        assert_eq!(err.to_string(), "Invalid image file");
    }
}
