//! Run configuration for the command line simulator
//!
//! A run file describes the hardware and an ordered list of layers:
//!
//! ```toml
//! [hardware]
//! model_name = "alexnet"
//! log_file_output_dir = "logs"
//!
//! [hardware.array]
//! systolic_array_height = 256
//! systolic_array_width = 256
//!
//! [[layers]]
//! type = "conv"
//! name = "conv1"
//! input = [1, 224, 224, 3]
//! kernel = [11, 11]
//! filters = 96
//! strides = [4, 4]
//! padding = "valid"
//!
//! [[layers]]
//! type = "fc"
//! name = "fc6"
//! batch = 1
//! inputs = 9216
//! outputs = 4096
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::hardware::SimConfig;
use crate::tensor::Padding;

/// A single layer of a workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv {
        name: String,
        /// NHWC input shape
        input: [usize; 4],
        /// Kernel height and width
        kernel: [usize; 2],
        filters: usize,
        #[serde(default = "unit_strides")]
        strides: [usize; 2],
        #[serde(default)]
        padding: Padding,
        #[serde(default = "one")]
        groups: usize,
    },
    Depthwise {
        name: String,
        input: [usize; 4],
        kernel: [usize; 2],
        #[serde(default = "one")]
        multiplier: usize,
        #[serde(default = "unit_strides")]
        strides: [usize; 2],
        #[serde(default)]
        padding: Padding,
    },
    /// Depthwise convolution followed by a 1x1 convolution to `filters` channels
    Separable {
        name: String,
        input: [usize; 4],
        kernel: [usize; 2],
        #[serde(default = "one")]
        multiplier: usize,
        filters: usize,
        #[serde(default = "unit_strides")]
        strides: [usize; 2],
        #[serde(default)]
        padding: Padding,
    },
    Fc {
        name: String,
        #[serde(default = "one")]
        batch: usize,
        inputs: usize,
        outputs: usize,
    },
}

impl LayerSpec {
    pub fn name(&self) -> &str {
        match self {
            LayerSpec::Conv { name, .. }
            | LayerSpec::Depthwise { name, .. }
            | LayerSpec::Separable { name, .. }
            | LayerSpec::Fc { name, .. } => name,
        }
    }
}

fn one() -> usize {
    1
}

fn unit_strides() -> [usize; 2] {
    [1, 1]
}

fn default_fill() -> f32 {
    1.0
}

/// Complete run description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Value every input activation is set to
    #[serde(default = "default_fill")]
    pub activation_value: f32,
    /// Value every weight is set to
    #[serde(default = "default_fill")]
    pub weight_value: f32,
    #[serde(default)]
    pub hardware: SimConfig,
    #[serde(default)]
    pub layers: Vec<LayerSpec>,
}

impl RunConfig {
    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        text.parse()
    }

    pub fn to_toml(&self) -> SimResult<String> {
        toml::to_string_pretty(self).map_err(|e| SimError::config_parse(e.to_string()))
    }

    pub fn validate(&self) -> SimResult<()> {
        self.hardware.validate()?;
        if self.layers.is_empty() {
            return Err(SimError::invalid_config("run configuration has no layers"));
        }
        Ok(())
    }
}

impl std::str::FromStr for RunConfig {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| SimError::config_parse(e.to_string()))
    }
}
