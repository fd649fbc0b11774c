//! Pipeline orchestration.
//!
//! A plain synchronous call sequence: sample, quantize, stream tiles,
//! stitch, simplify, fit, compose, emit. All run-scoped state lives in
//! a [`PipelineContext`] created at entry and dropped at exit; nothing
//! survives across runs. Resource exhaustion walks a quality ladder
//! (fewer colors, then coarser tolerance) before surfacing an error.

use std::sync::atomic::AtomicBool;
use std::time::Instant;

use tracing::{debug, info, info_span};

use crate::config::TraceConfig;
use crate::error::{Result, TraceError};
use crate::memory::MemoryBudget;
use crate::types::{PaletteEntry, PixelBuffer, TraceOutput, TraceSummary};
use crate::{compose, fit, quantize, sampler, simplify, stitch, svg, tiles};

/// Run-scoped state threaded through the stages.
struct PipelineContext<'a> {
    buffer: &'a PixelBuffer<'a>,
    config: TraceConfig,
    budget: MemoryBudget,
    cancel: &'a AtomicBool,
    /// Set when any quality or size degradation fires.
    degraded: bool,
}

/// Trace `buffer` into a layered SVG document.
pub fn trace(buffer: &PixelBuffer<'_>, config: &TraceConfig) -> Result<TraceOutput> {
    let cancel = AtomicBool::new(false);
    trace_cancellable(buffer, config, &cancel)
}

/// Like [`trace`], aborting between tiles once `cancel` is set.
pub fn trace_cancellable(
    buffer: &PixelBuffer<'_>,
    config: &TraceConfig,
    cancel: &AtomicBool,
) -> Result<TraceOutput> {
    let span = info_span!("trace", width = buffer.width, height = buffer.height);
    let _guard = span.enter();

    buffer.validate()?;
    config.validate()?;

    // Quality ladder: retry with fewer colors, then coarser tolerance,
    // when the memory budget cannot be satisfied at minimum tile size.
    let mut attempt_config = config.clone();
    for attempt in 0..3 {
        let mut ctx = PipelineContext {
            buffer,
            config: attempt_config.clone(),
            budget: MemoryBudget::new(config.memory_budget_mb * 1024 * 1024),
            cancel,
            degraded: attempt > 0,
        };
        match run_once(&mut ctx) {
            Ok(output) => return Ok(output),
            Err(TraceError::ResourceExhaustion { .. }) if attempt < 2 => {
                if attempt == 0 {
                    attempt_config.max_colors = (attempt_config.max_colors / 2).max(2);
                } else {
                    attempt_config.simplify_tolerance *= 2.0;
                }
                debug!(
                    attempt,
                    max_colors = attempt_config.max_colors,
                    simplify_tolerance = attempt_config.simplify_tolerance,
                    "resource exhaustion, degrading quality"
                );
            }
            Err(e) => return Err(e),
        }
    }
    Err(TraceError::ResourceExhaustion {
        budget_mb: config.memory_budget_mb,
    })
}

fn run_once(ctx: &mut PipelineContext<'_>) -> Result<TraceOutput> {
    let started = Instant::now();
    let config = ctx.config.clone();

    // Palette.
    let palette: Vec<PaletteEntry> = if config.binary_mode {
        vec![PaletteEntry {
            rgb: [0, 0, 0],
            weight: 1.0,
            index: 0,
        }]
    } else {
        let samples = sampler::sample_pixels(ctx.buffer);
        quantize::quantize(&samples, config.max_colors, config.palette_seed)
    };
    debug!(colors = palette.len(), elapsed = ?started.elapsed(), "palette stage done");

    // Palette entries with negligible coverage are skipped outright.
    let retained: Vec<PaletteEntry> = palette
        .iter()
        .copied()
        .filter(|e| e.weight >= config.min_coverage)
        .collect();
    let active = if retained.is_empty() { &palette } else { &retained };

    // Tile streaming: masks and contours under the memory ceiling.
    let manager = tiles::TileStreamManager {
        buffer: ctx.buffer,
        palette: active,
        config: &config,
        budget: &ctx.budget,
        cancel: ctx.cancel,
    };
    let outcome = manager.run()?;
    ctx.degraded |= outcome.shrunk;
    debug!(
        contours = outcome.contours.len(),
        skipped = outcome.skipped.len(),
        elapsed = ?started.elapsed(),
        "tile stage done"
    );

    // Single-threaded aggregation stages.
    let stitched = stitch::stitch_contours(outcome.contours, stitch::CONNECT_THRESHOLD);
    let simplified = simplify::simplify_contours(
        stitched,
        config.simplify_tolerance,
        config.corner_angle_deg,
    );
    let fitted = fit::fit_paths(&simplified, config.curve_fit_error);
    let layers = compose::compose_layers(fitted, &palette, &config);
    debug!(layers = layers.len(), elapsed = ?started.elapsed(), "vector stages done");

    let emitted = svg::emit_document(
        &layers,
        ctx.buffer.width,
        ctx.buffer.height,
        config.max_output_bytes,
    );
    ctx.degraded |= emitted.degraded;

    let summary = TraceSummary {
        layer_count: layers.len(),
        path_count: emitted.path_count,
        byte_size: emitted.svg.len(),
        skipped_tiles: outcome.skipped.len(),
        degraded: ctx.degraded,
    };
    info!(
        layers = summary.layer_count,
        paths = summary.path_count,
        bytes = summary.byte_size,
        skipped_tiles = summary.skipped_tiles,
        degraded = summary.degraded,
        peak_memory = ctx.budget.peak_bytes(),
        elapsed = ?started.elapsed(),
        "trace finished"
    );

    Ok(TraceOutput {
        svg: emitted.svg,
        summary,
    })
}
