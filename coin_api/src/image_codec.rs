use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageCodecError {
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Decodes any format `image` can sniff from the bytes into RGB8.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ImageCodecError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageCodecError::Decode(e.to_string()))?;

    let image = reader
        .decode()
        .map_err(|e| ImageCodecError::Decode(e.to_string()))?;

    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageCodecError> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(buffer)
}

pub fn encode_jpeg_base64(image: &RgbImage, quality: u8) -> Result<String, ImageCodecError> {
    let jpeg = encode_jpeg(image, quality)?;
    Ok(STANDARD.encode(jpeg))
}
