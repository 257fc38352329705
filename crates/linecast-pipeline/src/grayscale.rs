//! Decoding in-memory image bytes into the pipeline's grayscale input.

use image::GrayImage;

use crate::types::PipelineError;

/// Decode raw image bytes (any format the `image` crate is built with)
/// and convert to 8-bit luma.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty, and
/// [`PipelineError::ImageDecode`] if the format is unrecognized or the
/// data is corrupt.
pub fn decode_and_grayscale(bytes: &[u8]) -> Result<GrayImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    Ok(image::load_from_memory(bytes)?.to_luma8())
}
