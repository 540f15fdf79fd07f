//! Turning captured drawings into pixel grids.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use image::imageops::FilterType;
use thiserror::Error;

use super::PixelGrid;

#[derive(Debug, Error)]
pub enum ImageInputError {
    #[error("Failed to decode drawing {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Load a drawing from disk and downsample it to `side`x`side`.
pub fn grid_from_image_path(path: &Path, side: usize) -> Result<PixelGrid, ImageInputError> {
    let image = image::open(path).map_err(|source| ImageInputError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(grid_from_image(&image, side))
}

/// Downsample `image` and keep its red channel as intensity.
///
/// Drawings are white strokes on black, so any channel carries the stroke;
/// red is what the capture canvas reports first in RGBA order.
pub fn grid_from_image(image: &DynamicImage, side: usize) -> PixelGrid {
    let side_u32 = side as u32;
    let rgba = if image.width() == side_u32 && image.height() == side_u32 {
        image.to_rgba8()
    } else {
        image
            .resize_exact(side_u32, side_u32, FilterType::Triangle)
            .to_rgba8()
    };
    let pixels = rgba.pixels().map(|pixel| pixel.0[0]).collect();
    PixelGrid {
        width: side,
        height: side,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    #[test]
    fn exact_size_keeps_red_channel() {
        let mut img = RgbaImage::from_pixel(28, 28, Rgba([0, 0, 0, 255]));
        img.put_pixel(3, 5, Rgba([255, 10, 10, 255]));
        let grid = grid_from_image(&DynamicImage::ImageRgba8(img), 28);
        assert_eq!(grid.get(3, 5), Some(255));
        assert_eq!(grid.pixels.iter().filter(|&&p| p > 0).count(), 1);
    }

    #[test]
    fn large_drawings_are_downsampled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stroke.png");
        RgbaImage::from_pixel(140, 140, Rgba([255, 255, 255, 255]))
            .save(&path)
            .unwrap();
        let grid = grid_from_image_path(&path, 28).unwrap();
        assert_eq!(grid.pixels.len(), 784);
        assert!(grid.pixels.iter().all(|&p| p == 255));
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let dir = tempdir().unwrap();
        let err = grid_from_image_path(&dir.path().join("none.png"), 28).unwrap_err();
        assert!(matches!(err, ImageInputError::Decode { .. }));
    }
}
