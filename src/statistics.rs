//! Counters collected while simulating one operation

use serde::{Deserialize, Serialize};

use crate::hardware::{bits_for, ArrayConfig, DatatypeConfig};
use crate::tiling::TileSchedule;

/// Activity counters of one simulated operation.
///
/// Totals are summed tile by tile; the `*_max` fields hold the largest value
/// seen in any single cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimulationStatistics {
    pub intra_pe_data_movements: u64,
    pub inter_pe_data_movements: u64,
    pub systolic_data_setup_unit_loads: u64,
    pub weight_fetcher_loads: u64,
    pub weight_fetcher_concurrent_loads_max: u64,
    pub weight_fetcher_concurrent_loads_per_column_max: u64,
    pub accumulator_array_loads: u64,
    pub accumulator_array_concurrent_loads_max: u64,
    pub accumulator_array_concurrent_loads_per_column_max: u64,
    pub accumulator_array_stores: u64,
    pub cycles: u64,
    pub stalled_cycles: u64,
    pub zero_weight_multiplications: u64,
}

impl SimulationStatistics {
    /// Fold another set of counters into this one
    pub fn combine(mut self, other: Self) -> Self {
        self += other;
        self
    }

    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl std::ops::AddAssign for SimulationStatistics {
    fn add_assign(&mut self, other: Self) {
        self.intra_pe_data_movements += other.intra_pe_data_movements;
        self.inter_pe_data_movements += other.inter_pe_data_movements;
        self.systolic_data_setup_unit_loads += other.systolic_data_setup_unit_loads;
        self.weight_fetcher_loads += other.weight_fetcher_loads;
        self.weight_fetcher_concurrent_loads_max = self
            .weight_fetcher_concurrent_loads_max
            .max(other.weight_fetcher_concurrent_loads_max);
        self.weight_fetcher_concurrent_loads_per_column_max = self
            .weight_fetcher_concurrent_loads_per_column_max
            .max(other.weight_fetcher_concurrent_loads_per_column_max);
        self.accumulator_array_loads += other.accumulator_array_loads;
        self.accumulator_array_concurrent_loads_max = self
            .accumulator_array_concurrent_loads_max
            .max(other.accumulator_array_concurrent_loads_max);
        self.accumulator_array_concurrent_loads_per_column_max = self
            .accumulator_array_concurrent_loads_per_column_max
            .max(other.accumulator_array_concurrent_loads_per_column_max);
        self.accumulator_array_stores += other.accumulator_array_stores;
        self.cycles += other.cycles;
        self.stalled_cycles += other.stalled_cycles;
        self.zero_weight_multiplications += other.zero_weight_multiplications;
    }
}

impl std::ops::Add for SimulationStatistics {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.combine(other)
    }
}

impl std::iter::Sum for SimulationStatistics {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::combine)
    }
}

impl std::fmt::Display for SimulationStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cycles: {} ({} stalled)", self.cycles, self.stalled_cycles)?;
        writeln!(f, "Intra PE data movements: {}", self.intra_pe_data_movements)?;
        writeln!(f, "Inter PE data movements: {}", self.inter_pe_data_movements)?;
        writeln!(f, "Setup unit loads: {}", self.systolic_data_setup_unit_loads)?;
        writeln!(f, "Weight fetcher loads: {}", self.weight_fetcher_loads)?;
        writeln!(
            f,
            "Accumulator loads/stores: {}/{}",
            self.accumulator_array_loads, self.accumulator_array_stores
        )?;
        write!(
            f,
            "Zero weight multiplications: {}",
            self.zero_weight_multiplications
        )
    }
}

/// Register and buffer footprint an operation requires of the hardware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FootprintStatistics {
    pub mpu_control_register_bits: u64,
    pub systolic_data_setup_unit_control_register_bits: u64,
    pub activation_fifo_control_register_bits: u64,
    pub weight_fetcher_control_register_bits: u64,
    pub systolic_array_control_register_bits: u64,
    pub accumulator_array_control_register_bits: u64,
    pub activation_fifo_data_register_bits: u64,
    pub systolic_array_data_register_bits: u64,
    pub accumulator_array_data_register_bits: u64,
    pub unified_buffer_bits: u64,
}

impl FootprintStatistics {
    pub fn from_schedule(
        schedule: &TileSchedule,
        array: &ArrayConfig,
        datatypes: &DatatypeConfig,
    ) -> Self {
        let height = array.systolic_array_height as u64;
        let width = array.systolic_array_width as u64;
        let depth = array.activation_fifo_depth as u64;
        let acc_height = array.accumulator_array_height as u64;
        let gemm = schedule.gemm;
        let (m, k, n) = (gemm.m as u64, gemm.k as u64, gemm.n as u64);

        let act_bits = datatypes.activation_bits();
        let weight_bits = datatypes.weight_bits();
        let result_bits = datatypes.result_bits();

        // Tile, block and position counters plus one busy bit
        let mpu_control = bits_for(schedule.row_tiles as u64)
            + bits_for(schedule.col_tiles as u64)
            + bits_for(schedule.position_blocks as u64)
            + bits_for(schedule.position_block_size as u64)
            + 1;

        let operands = m
            .saturating_mul(k)
            .saturating_mul(act_bits)
            .saturating_add(k.saturating_mul(n).saturating_mul(weight_bits))
            .saturating_add(m.saturating_mul(n).saturating_mul(result_bits));

        Self {
            mpu_control_register_bits: mpu_control,
            // Row and column address of the activation matrix
            systolic_data_setup_unit_control_register_bits: bits_for(m) + bits_for(k),
            // Fill level per FIFO lane
            activation_fifo_control_register_bits: height * bits_for(depth + 1),
            weight_fetcher_control_register_bits: bits_for(schedule.row_tiles as u64)
                + bits_for(schedule.col_tiles as u64)
                + bits_for(height),
            // Weight select bit per PE
            systolic_array_control_register_bits: height * width,
            accumulator_array_control_register_bits: width * bits_for(acc_height),
            activation_fifo_data_register_bits: height * depth * act_bits,
            // Stationary weight, passing activation and partial sum per PE
            systolic_array_data_register_bits: height * width * (weight_bits + act_bits + result_bits),
            accumulator_array_data_register_bits: acc_height * width * result_bits,
            unified_buffer_bits: operands,
        }
    }
}
