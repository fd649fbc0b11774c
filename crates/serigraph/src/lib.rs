//! # Serigraph
//!
//! Bounded-memory raster-to-vector tracing for print and silkscreen
//! reproduction. Converts a decoded pixel buffer into a multi-layer
//! SVG 1.1 document: color clustering, per-color tile masks, Moore
//! boundary tracing with seam stitching, Douglas-Peucker reduction,
//! cubic Bezier fitting, and z-ordered layer composition.
//!
//! ## Core Features
//!
//! - **Tile streaming**: large images are processed as overlapping
//!   tiles sized to a caller-supplied memory budget
//! - **Adaptive backpressure**: buffer cleanup, then tile shrinking,
//!   then quality degradation before any hard failure
//! - **Partial-failure tolerance**: failing tiles are skipped and
//!   reported, never fatal
//! - **Bounded output**: a degradation ladder keeps the serialized
//!   document under a configurable byte cap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serigraph::{trace, PixelBuffer, TraceConfig};
//!
//! // Pixel data comes from an external decoder.
//! let (width, height) = (1024u32, 768u32);
//! let bytes = vec![255u8; (width * height * 3) as usize];
//! let buffer = PixelBuffer::new(width, height, 3, &bytes);
//!
//! let output = trace(&buffer, &TraceConfig::default())?;
//! println!(
//!     "{} layers, {} paths, {} bytes",
//!     output.summary.layer_count,
//!     output.summary.path_count,
//!     output.summary.byte_size,
//! );
//! # Ok::<(), serigraph::TraceError>(())
//! ```
//!
//! No I/O happens inside the pipeline: decoding the source image and
//! storing the SVG are the caller's responsibility.

// Core modules
pub mod compose;
pub mod config;
pub mod contour;
pub mod error;
pub mod fit;
pub mod mask;
pub mod memory;
pub mod pipeline;
pub mod quantize;
pub mod sampler;
pub mod simplify;
pub mod stitch;
pub mod svg;
pub mod tiles;
pub mod types;

// Re-exports for convenience
pub use config::{FillMethod, LayerOrder, TraceConfig};
pub use error::{Result, TraceError};
pub use memory::MemoryBudget;
pub use pipeline::{trace, trace_cancellable};
pub use types::{
    BezierPath, Contour, Layer, PaletteEntry, PixelBuffer, TraceOutput, TraceSummary,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            bytes.extend_from_slice(&rgb);
        }
        bytes
    }

    #[test]
    fn trace_solid_image_smoke() {
        let bytes = solid_rgb(64, 64, [200, 30, 30]);
        let buffer = PixelBuffer::new(64, 64, 3, &bytes);
        let config = TraceConfig {
            palette_seed: Some(1),
            ..TraceConfig::default()
        };
        let output = trace(&buffer, &config).expect("solid image traces");
        assert_eq!(output.summary.layer_count, 1);
        assert!(output.svg.contains("</svg>"));
    }

    #[test]
    fn invalid_buffer_is_rejected() {
        let bytes = vec![0u8; 10];
        let buffer = PixelBuffer::new(64, 64, 3, &bytes);
        match trace(&buffer, &TraceConfig::default()) {
            Err(TraceError::InvalidInput(_)) => {}
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }
}
