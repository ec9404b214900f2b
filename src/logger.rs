//! Statistics log files
//!
//! Every simulated operation appends one tab separated row to the log of its
//! model. The file name encodes the model, the array geometry and the
//! datatype sizes:
//!
//! `{log_file_output_dir}/{model_name}_{height}_{width}_W_{w}_ACT_{a}_ACC_{r}.csv`
//!
//! Downstream tooling reads columns by position, so the column order below is
//! part of the format.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LogError;
use crate::hardware::{ArrayConfig, SimConfig};
use crate::statistics::{FootprintStatistics, SimulationStatistics};
use crate::tiling::GemmShape;

/// Column names, in file order
pub const COLUMNS: [&str; 30] = [
    "Operation",
    "GEMM Size M",
    "GEMM Size N",
    "GEMM Size K",
    "Systolic Array Height",
    "Systolic Array Width",
    "Activation FIFO Depth",
    "Accumulator Array Height",
    "MPU Control Register Bits",
    "Systolic Data Setup Unit Control Register Bits",
    "Activation FIFO Control Register Bits",
    "Weight Fetcher Control Register Bits",
    "Systolic Array Control Register Bits",
    "Accumulator Array Control Register Bits",
    "Activation FIFO Data Register Bits",
    "Systolic Array Data Register Bits",
    "Accumulator Array Data Register Bits",
    "Unified Buffer Bits",
    "Intra PE Data Movements",
    "Inter PE Data Movements",
    "Systolic Data Setup Unit Load Count Total",
    "Weight Fetcher Load Count Total",
    "Weight Fetcher Concurrent Load Count Max",
    "Weight Fetcher Concurrent Load Count Per Column Max",
    "Accumulator Array Load Count Total",
    "Accumulator Array Concurrent Load Count Max",
    "Accumulator Array Concurrent Load Count Per Column Max",
    "Iterations Total",
    "Iterations Stalled",
    "Multiplications With Weight Zero Count Total",
];

/// One row of a statistics log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub operation_name: String,
    pub gemm: GemmShape,
    pub array: ArrayConfig,
    pub footprint: FootprintStatistics,
    pub statistics: SimulationStatistics,
}

impl LogRecord {
    /// Header line, terminated by a newline
    pub fn header() -> String {
        let mut line = COLUMNS[0].to_string();
        for name in &COLUMNS[1..] {
            line.push_str(&format!("\t\"{}\"", name));
        }
        line.push('\n');
        line
    }

    /// Data line, terminated by a newline
    pub fn to_row(&self) -> String {
        let f = &self.footprint;
        let s = &self.statistics;
        let values: [u64; 29] = [
            self.gemm.m as u64,
            self.gemm.n as u64,
            self.gemm.k as u64,
            self.array.systolic_array_height as u64,
            self.array.systolic_array_width as u64,
            self.array.activation_fifo_depth as u64,
            self.array.accumulator_array_height as u64,
            f.mpu_control_register_bits,
            f.systolic_data_setup_unit_control_register_bits,
            f.activation_fifo_control_register_bits,
            f.weight_fetcher_control_register_bits,
            f.systolic_array_control_register_bits,
            f.accumulator_array_control_register_bits,
            f.activation_fifo_data_register_bits,
            f.systolic_array_data_register_bits,
            f.accumulator_array_data_register_bits,
            f.unified_buffer_bits,
            s.intra_pe_data_movements,
            s.inter_pe_data_movements,
            s.systolic_data_setup_unit_loads,
            s.weight_fetcher_loads,
            s.weight_fetcher_concurrent_loads_max,
            s.weight_fetcher_concurrent_loads_per_column_max,
            s.accumulator_array_loads,
            s.accumulator_array_concurrent_loads_max,
            s.accumulator_array_concurrent_loads_per_column_max,
            s.cycles,
            s.stalled_cycles,
            s.zero_weight_multiplications,
        ];

        let mut line = format!("\"{}\"", self.operation_name.replace('"', "'"));
        for value in values {
            line.push('\t');
            line.push_str(&value.to_string());
        }
        line.push('\n');
        line
    }
}

/// Path of the log file a configuration writes to
pub fn log_file_path(config: &SimConfig) -> PathBuf {
    let array = &config.array;
    let datatypes = &config.datatypes;
    config.log_file_output_dir.join(format!(
        "{}_{}_{}_W_{}_ACT_{}_ACC_{}.csv",
        config.model_name,
        array.systolic_array_height,
        array.systolic_array_width,
        datatypes.weights_datatype_size_byte,
        datatypes.activations_datatype_size_byte,
        datatypes.results_datatype_size_byte,
    ))
}

/// Appends rows to per-model log files.
///
/// No file handle outlives a row: each row reopens its file in append mode,
/// so a log removed between calls is recreated with a fresh header. Rows for
/// the same path are serialised by a per-path lock; different paths only
/// share the lock lookup.
#[derive(Default)]
pub struct StatisticsLogger {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl StatisticsLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one row and flush it. Returns the file written to.
    pub fn record(&self, record: &LogRecord, config: &SimConfig) -> Result<PathBuf, LogError> {
        let path = log_file_path(config);
        let lock = self.lock_for(&path);
        let _guard = lock
            .lock()
            .map_err(|_| LogError::Poisoned { path: path.clone() })?;

        let mut file = open_log_file(&path)?;
        file.write_all(record.to_row().as_bytes())
            .and_then(|_| file.flush())
            .map_err(|source| LogError::Write {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), operation = %record.operation_name, "appended statistics row");
        Ok(path)
    }

    /// Number of distinct log files written through this logger
    pub fn known_files(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

fn open_log_file(path: &Path) -> Result<BufWriter<File>, LogError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(|source| LogError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    let is_new = file
        .metadata()
        .map(|meta| meta.len() == 0)
        .map_err(|source| LogError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let mut writer = BufWriter::new(file);
    if is_new {
        writer
            .write_all(LogRecord::header().as_bytes())
            .map_err(|source| LogError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "created statistics log");
    }
    Ok(writer)
}
