//! Hardware configuration of the simulated matrix processing unit
//!
//! The defaults match the attribute defaults of the convolution and fully
//! connected operations the simulator stands in for: a 256x256 systolic array,
//! an activation FIFO depth of 8, a 4096 entry accumulator array, 1 byte
//! activations and weights and 4 byte results.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Geometry of the systolic array and its buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    /// Number of PE rows (the contraction dimension of one tile)
    pub systolic_array_height: usize,
    /// Number of PE columns (the output dimension of one tile)
    pub systolic_array_width: usize,
    /// Rows of the accumulator array, split into two halves for double buffering
    pub accumulator_array_height: usize,
    /// Activation blocks the FIFO can hold ahead of the array
    pub activation_fifo_depth: usize,
}

impl ArrayConfig {
    pub fn new(
        systolic_array_height: usize,
        systolic_array_width: usize,
        accumulator_array_height: usize,
        activation_fifo_depth: usize,
    ) -> Self {
        Self {
            systolic_array_height,
            systolic_array_width,
            accumulator_array_height,
            activation_fifo_depth,
        }
    }

    /// Square array with the default buffer sizes
    pub fn square(size: usize) -> Self {
        Self {
            systolic_array_height: size,
            systolic_array_width: size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        let fields = [
            ("systolic_array_height", self.systolic_array_height),
            ("systolic_array_width", self.systolic_array_width),
            ("accumulator_array_height", self.accumulator_array_height),
            ("activation_fifo_depth", self.activation_fifo_depth),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(SimError::invalid_config(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Number of processing elements in the array
    pub fn pe_count(&self) -> u64 {
        self.systolic_array_height as u64 * self.systolic_array_width as u64
    }

    /// Output positions one accumulator buffer half can hold
    pub fn position_block_size(&self) -> usize {
        (self.accumulator_array_height / 2).max(1)
    }
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self::new(256, 256, 4096, 8)
    }
}

/// Element sizes used for storage and data movement cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DatatypeConfig {
    pub activations_datatype_size_byte: usize,
    pub weights_datatype_size_byte: usize,
    pub results_datatype_size_byte: usize,
}

impl DatatypeConfig {
    pub fn new(activations: usize, weights: usize, results: usize) -> Self {
        Self {
            activations_datatype_size_byte: activations,
            weights_datatype_size_byte: weights,
            results_datatype_size_byte: results,
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        let fields = [
            ("activations_datatype_size_byte", self.activations_datatype_size_byte),
            ("weights_datatype_size_byte", self.weights_datatype_size_byte),
            ("results_datatype_size_byte", self.results_datatype_size_byte),
        ];
        for (name, value) in fields {
            if !(1..=8).contains(&value) {
                return Err(SimError::invalid_config(format!(
                    "{} must be between 1 and 8, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn activation_bits(&self) -> u64 {
        8 * self.activations_datatype_size_byte as u64
    }

    pub fn weight_bits(&self) -> u64 {
        8 * self.weights_datatype_size_byte as u64
    }

    pub fn result_bits(&self) -> u64 {
        8 * self.results_datatype_size_byte as u64
    }
}

impl Default for DatatypeConfig {
    fn default() -> Self {
        Self::new(1, 1, 4)
    }
}

/// How the numeric core evaluates products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericMode {
    /// Plain f32 arithmetic; datatype sizes only affect cost
    #[default]
    Float,
    /// Round and saturate operands to signed integers of their datatype width
    FixedPoint,
}

/// Everything one simulated operation needs besides its tensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub numeric: NumericMode,
    pub log_file_output_dir: PathBuf,
    pub model_name: String,
    pub array: ArrayConfig,
    pub datatypes: DatatypeConfig,
}

impl SimConfig {
    pub fn new(array: ArrayConfig, datatypes: DatatypeConfig) -> Self {
        Self {
            array,
            datatypes,
            ..Self::default()
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_file_output_dir = dir.into();
        self
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    pub fn with_numeric(mut self, numeric: NumericMode) -> Self {
        self.numeric = numeric;
        self
    }

    pub fn validate(&self) -> SimResult<()> {
        self.array.validate()?;
        self.datatypes.validate()?;
        if self.model_name.is_empty() {
            return Err(SimError::invalid_config("model_name must not be empty"));
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            array: ArrayConfig::default(),
            datatypes: DatatypeConfig::default(),
            numeric: NumericMode::default(),
            log_file_output_dir: PathBuf::from("."),
            model_name: "unnamed".to_string(),
        }
    }
}

/// Largest signed integer representable in `size_byte` bytes
pub fn max_value(size_byte: usize) -> i128 {
    (1i128 << (8 * size_byte - 1)) - 1
}

/// Smallest signed integer representable in `size_byte` bytes
pub fn min_value(size_byte: usize) -> i128 {
    -(1i128 << (8 * size_byte - 1))
}

/// Round and saturate values to signed integers of the given width
pub fn quantize(values: &[f32], size_byte: usize) -> Vec<i128> {
    let max_val = max_value(size_byte);
    let min_val = min_value(size_byte);

    values
        .iter()
        .map(|&v| {
            let rounded = v.round();
            if rounded.is_nan() {
                0
            } else if rounded >= max_val as f32 {
                max_val
            } else if rounded <= min_val as f32 {
                min_val
            } else {
                rounded as i128
            }
        })
        .collect()
}

/// Smallest number of bits that can index `count` distinct values
pub fn bits_for(count: u64) -> u64 {
    if count <= 1 {
        0
    } else {
        64 - (count - 1).leading_zeros() as u64
    }
}
