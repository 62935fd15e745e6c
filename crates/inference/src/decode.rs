use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage, metadata::Orientation};
use std::io::Cursor;
use thiserror::Error;

const JPEG_MAGIC: [u8; 2] = [0xFF, 0xD8];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Image buffer is empty")]
    Empty,
    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

pub fn has_jpeg_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(&JPEG_MAGIC)
}

/// Decode an encoded upload (JPEG, PNG, BMP, TIFF or WebP) into an RGB pixel
/// grid, upright according to its EXIF orientation.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    if bytes.len() > JPEG_MAGIC.len() && !has_jpeg_magic(bytes) {
        tracing::warn!(
            magic = %format!("{:02x}{:02x}", bytes[0], bytes[1]),
            "Payload does not start with JPEG magic bytes"
        );
    }

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    let mut decoded = DynamicImage::from_decoder(decoder)?;
    decoded.apply_orientation(orientation);

    tracing::debug!(
        width = decoded.width(),
        height = decoded.height(),
        "Decoded upload"
    );

    Ok(decoded.to_rgb8())
}
