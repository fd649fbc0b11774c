//! Tile partitioning and the streaming worker pool.
//!
//! The image is covered by a grid of overlapping tiles sized to the
//! memory budget. Workers pull tiles from a shared cursor, acquire a
//! memory ticket before allocating the tile's working buffers, and
//! append traced contours behind a single mutex. Under pressure the
//! manager first reclaims pooled buffers, then halves the tile size
//! down to a floor; only when the floor still does not fit does the
//! run fail with resource exhaustion.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::TraceConfig;
use crate::contour;
use crate::error::{Result, TraceError};
use crate::mask;
use crate::memory::{MemoryBudget, POOL_TTL};
use crate::types::{Contour, PaletteEntry, PixelBuffer, Tile, TileId};

/// Tile dimension floor for adaptive shrinking.
pub const MIN_TILE_SIZE: u32 = 128;

/// Overlap floor; seam stitching needs a band wider than its connection
/// threshold on both sides of every cut.
pub const MIN_OVERLAP: u32 = 32;

/// Ticket-acquisition retries before a tile is skipped.
const ACQUIRE_ATTEMPTS: usize = 200;

/// Compute the overlapping tile grid for the given dimensions. Cores
/// partition the image exactly; each tile extends `overlap` pixels past
/// its core where neighbors exist.
pub fn compute_grid(width: u32, height: u32, tile_size: u32, overlap: u32) -> Vec<Tile> {
    let cols = width.div_ceil(tile_size).max(1);
    let rows = height.div_ceil(tile_size).max(1);
    let mut tiles = Vec::with_capacity((cols * rows) as usize);

    for row in 0..rows {
        for col in 0..cols {
            let core_x = col * tile_size;
            let core_y = row * tile_size;
            let core_width = tile_size.min(width - core_x);
            let core_height = tile_size.min(height - core_y);

            let x = core_x.saturating_sub(overlap);
            let y = core_y.saturating_sub(overlap);
            let x2 = (core_x + core_width + overlap).min(width);
            let y2 = (core_y + core_height + overlap).min(height);

            tiles.push(Tile {
                id: TileId((row * cols + col) as usize),
                x,
                y,
                width: x2 - x,
                height: y2 - y,
                core_x,
                core_y,
                core_width,
                core_height,
            });
        }
    }
    tiles
}

/// Byte-equivalent working set of one tile: the classification plane
/// and its opened copy plus, per palette color, a mask bitmap with its
/// visited map and contour point slack. Scales with the palette so the
/// quality ladder's color reduction actually lowers the estimate.
pub fn estimate_tile_bytes(tile_size: u32, overlap: u32, colors: usize) -> usize {
    let d = (tile_size + 2 * overlap) as usize;
    d * d * (3 + colors.max(1))
}

/// Result of streaming all tiles.
#[derive(Debug)]
pub struct StreamOutcome {
    pub contours: Vec<Contour>,
    pub skipped: Vec<TileId>,
    /// True when the adaptive shrink fired.
    pub shrunk: bool,
}

/// Drives mask building and contour tracing across the tile grid.
pub struct TileStreamManager<'a> {
    pub buffer: &'a PixelBuffer<'a>,
    pub palette: &'a [PaletteEntry],
    pub config: &'a TraceConfig,
    pub budget: &'a MemoryBudget,
    pub cancel: &'a AtomicBool,
}

impl TileStreamManager<'_> {
    pub fn run(&self) -> Result<StreamOutcome> {
        let overlap = self.config.effective_overlap();
        let initial_tile_size = self
            .config
            .tile_size
            .min(self.buffer.width.max(self.buffer.height).max(MIN_TILE_SIZE));
        let mut tile_size = initial_tile_size;

        // Backpressure: cleanup, then shrink, before giving up.
        loop {
            let estimate = estimate_tile_bytes(tile_size, overlap, self.palette.len());
            if estimate <= self.budget.headroom() {
                break;
            }
            self.budget.cleanup(POOL_TTL);
            if estimate <= self.budget.headroom() {
                break;
            }
            if tile_size <= MIN_TILE_SIZE {
                return Err(TraceError::ResourceExhaustion {
                    budget_mb: self.budget.limit() / (1024 * 1024),
                });
            }
            tile_size = (tile_size / 2).max(MIN_TILE_SIZE);
            debug!(tile_size, "memory pressure: shrinking tile size");
        }
        let shrunk = tile_size < initial_tile_size;

        let tiles = compute_grid(self.buffer.width, self.buffer.height, tile_size, overlap);
        let estimate = estimate_tile_bytes(tile_size, overlap, self.palette.len());
        let workers = self.worker_count(estimate, tiles.len());
        debug!(
            tiles = tiles.len(),
            tile_size, workers, "tile streaming started"
        );

        let next = AtomicUsize::new(0);
        let processed = AtomicUsize::new(0);
        let contours: Mutex<Vec<Contour>> = Mutex::new(Vec::new());
        let skipped: Mutex<Vec<TileId>> = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    self.worker_loop(&tiles, estimate, &next, &processed, &contours, &skipped);
                });
            }
        });

        if self.cancel.load(Ordering::Relaxed) {
            return Err(TraceError::Cancelled);
        }

        let mut skipped = skipped.into_inner().unwrap();
        skipped.sort_by_key(|t| t.0);
        if !skipped.is_empty() {
            warn!(
                skipped = skipped.len(),
                total = tiles.len(),
                "run completed with skipped tiles"
            );
        }

        Ok(StreamOutcome {
            contours: contours.into_inner().unwrap(),
            skipped,
            shrunk,
        })
    }

    /// Memory, not core count, is the limiting resource: each worker
    /// must be able to hold one tile's working set under the ceiling.
    fn worker_count(&self, estimate_bytes: usize, tile_count: usize) -> usize {
        let by_memory = (self.budget.headroom() / estimate_bytes.max(1)).max(1);
        let by_cpu = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        by_memory.min(by_cpu).min(tile_count.max(1))
    }

    fn worker_loop(
        &self,
        tiles: &[Tile],
        estimate: usize,
        next: &AtomicUsize,
        processed: &AtomicUsize,
        contours: &Mutex<Vec<Contour>>,
        skipped: &Mutex<Vec<TileId>>,
    ) {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }
            let idx = next.fetch_add(1, Ordering::Relaxed);
            let Some(tile) = tiles.get(idx) else {
                return;
            };

            let Some(_ticket) = self.acquire_ticket(estimate) else {
                warn!(tile = %tile.id, "no memory ticket, tile skipped");
                skipped.lock().unwrap().push(tile.id);
                continue;
            };

            match catch_unwind(AssertUnwindSafe(|| self.process_tile(tile))) {
                Ok(tile_contours) => {
                    contours.lock().unwrap().extend(tile_contours);
                }
                Err(_) => {
                    warn!(tile = %tile.id, "tile processing panicked, tile skipped");
                    skipped.lock().unwrap().push(tile.id);
                }
            }

            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(tile = %tile.id, done, total = tiles.len(), "tile processed");
        }
    }

    fn acquire_ticket(&self, bytes: usize) -> Option<crate::memory::MemoryTicket<'_>> {
        // try_acquire reclaims stale pooled buffers on its own once the
        // reservation would cross the warning line; the retry window
        // outlasts the pool TTL.
        for _ in 0..ACQUIRE_ATTEMPTS {
            if let Some(ticket) = self.budget.try_acquire(bytes) {
                return Some(ticket);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    /// Build masks and trace contours for one tile. The classification
    /// plane is checked out of the budget's buffer pool and parked back
    /// afterwards so subsequent tiles reuse the allocation.
    fn process_tile(&self, tile: &Tile) -> Vec<Contour> {
        let mut scratch = self
            .budget
            .take_buffer(tile.pixel_count())
            .unwrap_or_default();
        let mut out = Vec::new();
        if self.config.binary_mode {
            let (mask, s) = mask::binary_mask(self.buffer, tile, scratch);
            scratch = s;
            if mask.coverage >= self.config.min_coverage {
                out.extend(contour::trace_tile(
                    &mask,
                    tile,
                    self.buffer.width,
                    self.buffer.height,
                ));
            }
        } else {
            for entry in self.palette {
                let (mask, s) = mask::color_mask(
                    self.buffer,
                    tile,
                    entry,
                    self.config.color_tolerance,
                    scratch,
                );
                scratch = s;
                if mask.coverage < self.config.min_coverage {
                    continue;
                }
                out.extend(contour::trace_tile(
                    &mask,
                    tile,
                    self.buffer.width,
                    self.buffer.height,
                ));
            }
        }
        self.budget.park_buffer(scratch);
        out
    }
}
