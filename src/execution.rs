//! Execution model of the weight-stationary systolic array
//!
//! Walks a [`TileSchedule`] and counts what the hardware would do: weight
//! loads, activation staging, multiply-accumulates, systolic shifts and
//! accumulator traffic. Tile counters are independent of each other and are
//! reduced in parallel; FIFO backpressure depends on issue order and is
//! replayed sequentially afterwards.

use std::collections::VecDeque;

use rayon::prelude::*;
use tracing::trace;

use crate::error::{SimError, SimResult};
use crate::hardware::ArrayConfig;
use crate::statistics::SimulationStatistics;
use crate::tiling::{Tile, TileSchedule};

/// Cycle-level activity model for one array geometry
pub struct ExecutionModel {
    config: ArrayConfig,
}

impl ExecutionModel {
    pub fn new(config: ArrayConfig) -> Self {
        Self { config }
    }

    /// Simulate a schedule against a row-major KxN weight matrix
    pub fn run(&self, schedule: &TileSchedule, weights: &[f32]) -> SimResult<SimulationStatistics> {
        let gemm = schedule.gemm;
        if weights.len() != gemm.k * gemm.n {
            return Err(SimError::mismatch(
                format!("{}x{} weight matrix", gemm.k, gemm.n),
                format!("{} weights", weights.len()),
            ));
        }

        let mut stats: SimulationStatistics = schedule
            .tiles
            .par_iter()
            .map(|tile| self.tile_statistics(tile, schedule, weights))
            .sum();

        let stalls = self.fifo_stall_cycles(schedule);
        stats.cycles += stalls;
        stats.stalled_cycles += stalls;

        Ok(stats)
    }

    /// Counters of a single weight tile, without FIFO stalls
    fn tile_statistics(
        &self,
        tile: &Tile,
        schedule: &TileSchedule,
        weights: &[f32],
    ) -> SimulationStatistics {
        let height = self.config.systolic_array_height as u64;
        let positions = schedule.output_positions as u64;
        let rows = tile.active_rows() as u64;
        let cols = tile.active_cols() as u64;
        let n = schedule.gemm.n;

        let zero_weights = (tile.k_range.0..tile.k_range.1)
            .map(|k| {
                weights[k * n + tile.n_range.0..k * n + tile.n_range.1]
                    .iter()
                    .filter(|&&w| w == 0.0)
                    .count() as u64
            })
            .sum::<u64>();

        // Activations move right, partial sums move down, weights shift down on load
        let activation_shifts = positions
            .saturating_mul(rows)
            .saturating_mul(cols.saturating_sub(1));
        let partial_sum_shifts = positions
            .saturating_mul(cols)
            .saturating_mul(rows.saturating_sub(1));
        let weight_shifts = cols * rows * rows.saturating_sub(1) / 2;

        let partial_sums = positions.saturating_mul(cols);
        let (accumulator_loads, accumulator_peak) = if tile.is_first_row_tile {
            (0, 0)
        } else {
            (partial_sums, cols)
        };
        let accumulator_stores = if tile.is_last_row_tile { partial_sums } else { 0 };

        SimulationStatistics {
            intra_pe_data_movements: positions.saturating_mul(rows).saturating_mul(cols),
            inter_pe_data_movements: activation_shifts
                .saturating_add(partial_sum_shifts)
                .saturating_add(weight_shifts),
            systolic_data_setup_unit_loads: schedule.position_blocks as u64,
            weight_fetcher_loads: 1,
            weight_fetcher_concurrent_loads_max: cols,
            weight_fetcher_concurrent_loads_per_column_max: 1,
            accumulator_array_loads: accumulator_loads,
            accumulator_array_concurrent_loads_max: accumulator_peak,
            accumulator_array_concurrent_loads_per_column_max: accumulator_peak.min(1),
            accumulator_array_stores: accumulator_stores,
            cycles: height + positions - 1,
            stalled_cycles: 0,
            zero_weight_multiplications: positions.saturating_mul(zero_weights),
        }
    }

    /// Cycles the array waits on the activation FIFO over the whole schedule.
    ///
    /// The setup unit needs `systolic_array_height` cycles to stage a block and
    /// may run ahead until `activation_fifo_depth` blocks are queued. A block
    /// leaves the FIFO when the array starts streaming it, one cycle per
    /// position; the first block of every tile additionally pays the pipeline
    /// fill. The very first block overlaps the initial weight load.
    fn fifo_stall_cycles(&self, schedule: &TileSchedule) -> u64 {
        let stage_cycles = self.config.systolic_array_height as u64;
        let fill_cycles = stage_cycles - 1;
        let depth = self.config.activation_fifo_depth;

        let mut fifo = ActivationFifo::new(depth);
        let mut staged_at = 0u64;
        let mut array_free_at = 0u64;
        let mut stalls = 0u64;
        let mut first = true;

        for _ in &schedule.tiles {
            for block in 0..schedule.position_blocks {
                // The setup unit blocks while the FIFO is full
                let slot_free_at = fifo.slot_free_at();
                staged_at = staged_at.max(slot_free_at) + stage_cycles;

                let start = if first {
                    first = false;
                    staged_at
                } else {
                    let start = array_free_at.max(staged_at);
                    stalls += start - array_free_at;
                    start
                };
                fifo.pop_at(start);

                let mut busy = schedule.block_positions(block) as u64;
                if block == 0 {
                    busy += fill_cycles;
                }
                array_free_at = start + busy;
            }
        }

        trace!(stalls, "activation fifo replay done");
        stalls
    }
}

/// Bounded queue of activation blocks between the setup unit and the array.
///
/// Only the times at which slots were released are tracked; that is all the
/// producer needs to know to decide when it may stage the next block.
struct ActivationFifo {
    depth: usize,
    released: VecDeque<u64>,
}

impl ActivationFifo {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            released: VecDeque::with_capacity(depth),
        }
    }

    /// Earliest time a slot is available for the next staged block
    fn slot_free_at(&self) -> u64 {
        if self.released.len() < self.depth {
            0
        } else {
            self.released.front().copied().unwrap_or(0)
        }
    }

    /// Record that the array took a block out of the FIFO at `time`
    fn pop_at(&mut self, time: u64) {
        if self.released.len() == self.depth {
            self.released.pop_front();
        }
        self.released.push_back(time);
    }
}
