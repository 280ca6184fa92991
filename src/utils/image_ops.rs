use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Decode an image file on the blocking pool.
pub async fn load_image_async(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || {
        image::open(&path).with_context(|| format!("Failed to open image {}", path.display()))
    })
    .await
    .context("Failed to spawn blocking task for image loading")?
}

/// Asynchronously load an image from bytes using spawn_blocking.
pub async fn load_image_from_memory_async(bytes: Vec<u8>) -> Result<DynamicImage> {
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).context("Failed to load image from memory")
    })
    .await
    .context("Failed to spawn blocking task for image loading")?
}

/// PNG-encode a single-channel mask
pub fn encode_mask_png(mask: &GrayImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    mask.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("Failed to encode mask as PNG")?;
    Ok(png_bytes)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("Failed to encode image as PNG")?;
    Ok(png_bytes)
}

/// `{dir}/{prefix}_{uuid}.png`, unique per call
pub fn unique_output_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}_{}.png", prefix, uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba, RgbaImage};

    #[tokio::test]
    async fn test_load_image_async_missing_file() {
        let result = load_image_async("/definitely/not/here.png").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_png_roundtrip_through_memory() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([255, 0, 0, 255])));
        let bytes = encode_png(&img).unwrap();

        let decoded = load_image_from_memory_async(bytes).await.unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
    }

    #[test]
    fn test_mask_png_is_single_channel() {
        let mask = GrayImage::from_pixel(4, 4, Luma([255]));
        let bytes = encode_mask_png(&mask).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[test]
    fn test_unique_output_path() {
        let dir = Path::new("/tmp/out");
        let a = unique_output_path(dir, "edited");
        let b = unique_output_path(dir, "edited");
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("edited_"));
        assert_eq!(a.extension().unwrap(), "png");
    }
}
