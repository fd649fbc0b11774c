//! Bounded pixel sampling for palette clustering.
//!
//! Clustering never sees the full image: a uniform stride over the
//! buffer caps the sample at [`MAX_SAMPLES`] triples regardless of
//! source size, so a 100-megapixel input costs the same as a thumbnail.

use crate::types::PixelBuffer;

/// Upper bound on the number of RGB triples handed to the quantizer.
pub const MAX_SAMPLES: usize = 40_000;

/// Pixels more transparent than this are excluded from sampling.
const ALPHA_FLOOR: u8 = 16;

/// Extract a uniformly strided sample of opaque pixels.
pub fn sample_pixels(buffer: &PixelBuffer<'_>) -> Vec<[u8; 3]> {
    sample_pixels_capped(buffer, MAX_SAMPLES)
}

pub fn sample_pixels_capped(buffer: &PixelBuffer<'_>, cap: usize) -> Vec<[u8; 3]> {
    let total = buffer.width as usize * buffer.height as usize;
    if total == 0 || cap == 0 {
        return Vec::new();
    }
    // Round up so the stride spans the whole buffer; truncation would
    // leave the image tail unsampled whenever cap < total < 2*cap.
    let stride = total.div_ceil(cap);
    let mut samples = Vec::with_capacity(total.div_ceil(stride).min(cap));

    let w = buffer.width as usize;
    let mut i = 0;
    while i < total && samples.len() < cap {
        let x = (i % w) as u32;
        let y = (i / w) as u32;
        if buffer.alpha(x, y) >= ALPHA_FLOOR {
            samples.push(buffer.pixel(x, y));
        }
        i += stride;
    }
    samples
}
