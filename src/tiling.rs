//! Mapping of a lowered matrix multiply onto the systolic array
//!
//! For C = A @ B where A is MxK (activations) and B is KxN (weights):
//! - K is split into row tiles of `systolic_array_height` rows
//! - N is split into column tiles of `systolic_array_width` columns
//! - all M output positions stream through every tile, in blocks of one
//!   accumulator buffer half
//!
//! Tiles are ordered row tiles outer, column tiles inner, the order in which a
//! weight-stationary array loads them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SimError, SimResult};
use crate::hardware::ArrayConfig;

/// Size of a matrix multiply C[M,N] = A[M,K] @ B[K,N]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemmShape {
    /// Output positions
    pub m: usize,
    /// Contraction length
    pub k: usize,
    /// Output channels
    pub n: usize,
}

impl GemmShape {
    pub fn new(m: usize, k: usize, n: usize) -> Self {
        Self { m, k, n }
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.m == 0 {
            return Err(SimError::invalid_shape("no output positions to compute"));
        }
        if self.k == 0 {
            return Err(SimError::invalid_shape("contraction dimension must be positive"));
        }
        if self.n == 0 {
            return Err(SimError::invalid_shape("output dimension must be positive"));
        }
        Ok(())
    }
}

/// One weight tile of the schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Index along K
    pub row_tile: usize,
    /// Index along N
    pub col_tile: usize,
    /// Range of weight rows (contraction indices)
    pub k_range: (usize, usize),
    /// Range of weight columns (output channels)
    pub n_range: (usize, usize),
    /// First tile along K for this column tile: accumulators start fresh
    pub is_first_row_tile: bool,
    /// Last tile along K for this column tile: results are final
    pub is_last_row_tile: bool,
}

impl Tile {
    /// PE rows holding weights in this tile
    pub fn active_rows(&self) -> usize {
        self.k_range.1 - self.k_range.0
    }

    /// PE columns holding weights in this tile
    pub fn active_cols(&self) -> usize {
        self.n_range.1 - self.n_range.0
    }

    pub fn active_pes(&self) -> u64 {
        self.active_rows() as u64 * self.active_cols() as u64
    }
}

/// Complete tile schedule of one lowered operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSchedule {
    pub gemm: GemmShape,
    pub row_tiles: usize,
    pub col_tiles: usize,
    /// Output positions streamed through each tile
    pub output_positions: usize,
    /// Positions per activation block
    pub position_block_size: usize,
    pub position_blocks: usize,
    pub tiles: Vec<Tile>,
}

impl TileSchedule {
    /// Positions of activation block `index`
    pub fn block_positions(&self, index: usize) -> usize {
        let start = index * self.position_block_size;
        (self.output_positions - start).min(self.position_block_size)
    }

    /// Fraction of PE-cycles doing useful work, ignoring pipeline fill
    pub fn utilization(&self, config: &ArrayConfig) -> f64 {
        let used: u64 = self.tiles.iter().map(Tile::active_pes).sum();
        let available = config.pe_count() * self.tiles.len() as u64;
        if available == 0 {
            0.0
        } else {
            used as f64 / available as f64
        }
    }
}

/// Tiling strategy for an array geometry
pub struct TilingStrategy {
    config: ArrayConfig,
}

impl TilingStrategy {
    pub fn new(config: ArrayConfig) -> Self {
        Self { config }
    }

    /// Number of row tiles needed for a contraction of length `k`
    pub fn row_tiles(&self, k: usize) -> usize {
        k.div_ceil(self.config.systolic_array_height)
    }

    /// Number of column tiles needed for `n` output channels
    pub fn col_tiles(&self, n: usize) -> usize {
        n.div_ceil(self.config.systolic_array_width)
    }

    /// Build the tile schedule of a matrix multiply
    pub fn schedule(&self, gemm: GemmShape) -> SimResult<TileSchedule> {
        self.config.validate()?;
        gemm.validate()?;

        let height = self.config.systolic_array_height;
        let width = self.config.systolic_array_width;

        let row_tiles = self.row_tiles(gemm.k);
        let col_tiles = self.col_tiles(gemm.n);
        let position_block_size = self.config.position_block_size();
        let position_blocks = gemm.m.div_ceil(position_block_size);

        let mut tiles = Vec::with_capacity(row_tiles * col_tiles);
        for r in 0..row_tiles {
            for c in 0..col_tiles {
                tiles.push(Tile {
                    row_tile: r,
                    col_tile: c,
                    k_range: (r * height, ((r + 1) * height).min(gemm.k)),
                    n_range: (c * width, ((c + 1) * width).min(gemm.n)),
                    is_first_row_tile: r == 0,
                    is_last_row_tile: r == row_tiles - 1,
                });
            }
        }

        debug!(
            m = gemm.m,
            k = gemm.k,
            n = gemm.n,
            row_tiles,
            col_tiles,
            position_blocks,
            "built tile schedule"
        );

        Ok(TileSchedule {
            gemm,
            row_tiles,
            col_tiles,
            output_positions: gemm.m,
            position_block_size,
            position_blocks,
            tiles,
        })
    }
}
