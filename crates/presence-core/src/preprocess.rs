//! In-place downscale and recompression of uploaded stills.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError, ImageFormat, ImageReader};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("unsupported image format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("failed to encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Downscale `path` so its longer side is at most `max_dim` (aspect kept,
/// never upscaled) and rewrite it in the format its extension names. JPEG
/// output uses `jpeg_quality`. Returns the resulting dimensions.
pub fn resize_image(path: &Path, max_dim: u32, jpeg_quality: u8) -> Result<(u32, u32), PreprocessError> {
    let format =
        ImageFormat::from_path(path).map_err(|_| PreprocessError::UnsupportedFormat(path.to_path_buf()))?;
    let io_err = |source| PreprocessError::Io {
        path: path.to_path_buf(),
        source,
    };

    let image = ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?
        .decode()
        .map_err(|source| PreprocessError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

    let (width, height) = image.dimensions();
    let longest = width.max(height);
    let image = if longest <= max_dim {
        image
    } else {
        let scale = f64::from(max_dim) / f64::from(longest);
        let new_w = ((f64::from(width) * scale) as u32).max(1);
        let new_h = ((f64::from(height) * scale) as u32).max(1);
        image.resize_exact(new_w, new_h, FilterType::Triangle)
    };

    let encode_err = |source| PreprocessError::Encode {
        path: path.to_path_buf(),
        source,
    };
    match format {
        ImageFormat::Jpeg => {
            let file = File::create(path).map_err(io_err)?;
            let mut writer = BufWriter::new(file);
            let encoder = JpegEncoder::new_with_quality(&mut writer, jpeg_quality);
            DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(encode_err)?;
            writer.flush().map_err(io_err)?;
        }
        other => image.save_with_format(path, other).map_err(encode_err)?,
    }

    let dimensions = image.dimensions();
    tracing::debug!(
        path = %path.display(),
        from_width = width,
        from_height = height,
        width = dimensions.0,
        height = dimensions.1,
        "image preprocessed"
    );
    Ok(dimensions)
}
