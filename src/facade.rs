//! Entry points used by model code
//!
//! A [`Simulator`] validates an operation, lowers it to a matrix multiply,
//! runs the execution model and the numeric core side by side, appends one
//! statistics row and hands back the computed tensor. Logging failures never
//! fail the operation.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::compute;
use crate::error::{LogError, SimError, SimResult};
use crate::execution::ExecutionModel;
use crate::hardware::{ArrayConfig, DatatypeConfig, NumericMode, SimConfig};
use crate::logger::{LogRecord, StatisticsLogger};
use crate::statistics::{FootprintStatistics, SimulationStatistics};
use crate::tensor::{im2col, ConvGeometry, Padding, Tensor};
use crate::tiling::{GemmShape, TileSchedule, TilingStrategy};

/// Kind of simulated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Conv2d,
    DepthwiseConv2d,
    /// Only names the pair of rows a separable convolution logs
    SeparableConv2d,
    MatMul,
}

impl OperationKind {
    fn default_name(&self) -> &'static str {
        match self {
            OperationKind::Conv2d => "MpuSimConv2D",
            OperationKind::DepthwiseConv2d => "MpuSimDepthwiseConv2D",
            OperationKind::SeparableConv2d => "MpuSimSeparableConv2D",
            OperationKind::MatMul => "MpuSimMatMul",
        }
    }
}

/// Convolution parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conv2dParams {
    /// (rows, cols) stride
    pub strides: (usize, usize),
    pub padding: Padding,
    /// Number of channel groups; 1 is an ordinary convolution
    pub groups: usize,
    /// Name written to the log; the operation kind's name when empty
    pub name: String,
}

impl Conv2dParams {
    pub fn new(strides: (usize, usize), padding: Padding) -> Self {
        Self {
            strides,
            padding,
            ..Self::default()
        }
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            strides: (1, 1),
            padding: Padding::Same,
            groups: 1,
            name: String::new(),
        }
    }
}

/// Description of one simulated call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInvocation {
    pub name: String,
    pub kind: OperationKind,
    pub input_shape: Vec<usize>,
    pub weight_shape: Vec<usize>,
    pub strides: (usize, usize),
    pub padding: Padding,
    pub groups: usize,
    /// Lowered problem of a single group
    pub gemm: GemmShape,
    pub row_tiles: usize,
    pub col_tiles: usize,
}

/// Result of a simulated operation
#[derive(Debug)]
pub struct SimOutput {
    pub tensor: Tensor,
    pub statistics: SimulationStatistics,
    pub invocation: OperationInvocation,
    /// Set when the statistics row could not be written
    pub log_warning: Option<LogError>,
    pub log_file: Option<PathBuf>,
}

/// Result of a separable convolution: one output per simulated stage
#[derive(Debug)]
pub struct SeparableOutput {
    pub depthwise: SimOutput,
    /// Holds the final tensor
    pub pointwise: SimOutput,
}

impl SeparableOutput {
    /// Counters of both stages
    pub fn statistics(&self) -> SimulationStatistics {
        self.depthwise.statistics + self.pointwise.statistics
    }
}

/// Simulated matrix processing unit
#[derive(Default)]
pub struct Simulator {
    logger: StatisticsLogger,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logger(&self) -> &StatisticsLogger {
        &self.logger
    }

    /// 2-D convolution of an NHWC input with an HWIO kernel.
    ///
    /// For grouped convolutions the kernel has `in_channels / groups` input
    /// channels; each group runs through the whole pipeline and the outputs
    /// are concatenated along the channel axis.
    pub fn conv2d(
        &self,
        input: &Tensor,
        weight: &Tensor,
        params: &Conv2dParams,
        config: &SimConfig,
    ) -> SimResult<SimOutput> {
        self.grouped_conv(input, weight, params, config, OperationKind::Conv2d)
    }

    /// Depthwise convolution with an (kh, kw, channels, multiplier) kernel
    pub fn depthwise_conv2d(
        &self,
        input: &Tensor,
        weight: &Tensor,
        params: &Conv2dParams,
        config: &SimConfig,
    ) -> SimResult<SimOutput> {
        let (_, _, _, channels) = input.dims4()?;
        let (kh, kw, weight_channels, multiplier) = weight.dims4()?;
        if weight_channels != channels {
            return Err(SimError::mismatch(
                format!("depthwise kernel with {} channels", channels),
                format!("{} channels", weight_channels),
            ));
        }

        // HWIO with I = channels, O = multiplier has the same memory layout as a
        // grouped kernel with one input channel and channels * multiplier outputs
        let grouped = Tensor::new(
            vec![kh, kw, 1, channels * multiplier],
            weight.data().to_vec(),
        )?;
        let params = Conv2dParams {
            groups: channels,
            ..params.clone()
        };
        let mut output =
            self.grouped_conv(input, &grouped, &params, config, OperationKind::DepthwiseConv2d)?;
        output.invocation.weight_shape = weight.shape().to_vec();
        Ok(output)
    }

    /// Depthwise convolution followed by a 1x1 pointwise convolution.
    ///
    /// `params` applies to the depthwise stage; the pointwise stage always
    /// runs with unit stride and VALID padding. Each stage logs its own row,
    /// named `{name}/depthwise` and `{name}/pointwise`.
    pub fn separable_conv2d(
        &self,
        input: &Tensor,
        depthwise_weight: &Tensor,
        pointwise_weight: &Tensor,
        params: &Conv2dParams,
        config: &SimConfig,
    ) -> SimResult<SeparableOutput> {
        let (_, _, _, channels) = input.dims4()?;
        let (_, _, _, multiplier) = depthwise_weight.dims4()?;
        let (ph, pw, pointwise_in, _) = pointwise_weight.dims4()?;
        if ph != 1 || pw != 1 {
            return Err(SimError::mismatch(
                "1x1 pointwise kernel",
                format!("{}x{} kernel", ph, pw),
            ));
        }
        if pointwise_in != channels * multiplier {
            return Err(SimError::mismatch(
                format!("pointwise kernel with {} input channels", channels * multiplier),
                format!("{} input channels", pointwise_in),
            ));
        }

        let base = operation_name(&params.name, OperationKind::SeparableConv2d);
        let depthwise_params = params.clone().with_name(format!("{}/depthwise", base));
        let depthwise =
            self.depthwise_conv2d(input, depthwise_weight, &depthwise_params, config)?;

        let pointwise_params =
            Conv2dParams::new((1, 1), Padding::Valid).with_name(format!("{}/pointwise", base));
        let pointwise =
            self.conv2d(&depthwise.tensor, pointwise_weight, &pointwise_params, config)?;

        Ok(SeparableOutput {
            depthwise,
            pointwise,
        })
    }

    /// Fully connected layer: [M, K] @ [K, N]
    pub fn matmul(
        &self,
        input: &Tensor,
        weight: &Tensor,
        name: &str,
        config: &SimConfig,
    ) -> SimResult<SimOutput> {
        config.validate()?;
        let (m, k) = input.dims2()?;
        let (weight_k, n) = weight.dims2()?;
        if k != weight_k {
            return Err(SimError::mismatch(
                format!("weight with {} rows", k),
                format!("{} rows", weight_k),
            ));
        }

        let gemm = GemmShape::new(m, k, n);
        let name = operation_name(name, OperationKind::MatMul);
        let _span = info_span!("matmul", op = %name).entered();

        let (data, statistics, schedule) = self.run_gemm(gemm, input.data(), weight.data(), config)?;
        let invocation = OperationInvocation {
            name,
            kind: OperationKind::MatMul,
            input_shape: input.shape().to_vec(),
            weight_shape: weight.shape().to_vec(),
            strides: (1, 1),
            padding: Padding::Valid,
            groups: 1,
            gemm,
            row_tiles: schedule.row_tiles,
            col_tiles: schedule.col_tiles,
        };

        let tensor = Tensor::new(vec![m, n], data)?;
        Ok(self.finish(tensor, statistics, invocation, &schedule, config))
    }

    fn grouped_conv(
        &self,
        input: &Tensor,
        weight: &Tensor,
        params: &Conv2dParams,
        config: &SimConfig,
        kind: OperationKind,
    ) -> SimResult<SimOutput> {
        config.validate()?;
        let (batch, height, width, channels) = input.dims4()?;
        let (kh, kw, group_channels, out_channels) = weight.dims4()?;

        let groups = params.groups;
        if groups == 0 {
            return Err(SimError::invalid_config("group count must be positive"));
        }
        if channels % groups != 0 {
            return Err(SimError::GroupMismatch { channels, groups });
        }
        if out_channels % groups != 0 {
            return Err(SimError::GroupMismatch {
                channels: out_channels,
                groups,
            });
        }
        if group_channels != channels / groups {
            return Err(SimError::mismatch(
                format!("kernel with {} input channels", channels / groups),
                format!("{} input channels", group_channels),
            ));
        }

        let geometry = ConvGeometry::new(
            batch,
            height,
            width,
            group_channels,
            kh,
            kw,
            params.strides,
            params.padding,
        )?;
        let group_outputs = out_channels / groups;
        let gemm = GemmShape::new(geometry.output_positions(), geometry.patch_size(), group_outputs);
        gemm.validate()?;

        let name = operation_name(&params.name, kind);
        let _span = info_span!("conv2d", op = %name, groups).entered();

        let output_shape = vec![batch, geometry.output_height, geometry.output_width, group_outputs];
        let mut outputs = Vec::with_capacity(groups);
        let mut statistics = SimulationStatistics::default();
        let mut schedule = None;

        for g in 0..groups {
            let (group_input, group_weight) = if groups == 1 {
                (Cow::Borrowed(input), Cow::Borrowed(weight))
            } else {
                (
                    Cow::Owned(input.slice_last_axis(g * group_channels, (g + 1) * group_channels)?),
                    Cow::Owned(weight.slice_last_axis(g * group_outputs, (g + 1) * group_outputs)?),
                )
            };

            let patches = im2col(&group_input, &geometry)?;
            let (data, group_stats, group_schedule) =
                self.run_gemm(gemm, &patches, group_weight.data(), config)?;

            outputs.push(Tensor::new(output_shape.clone(), data)?);
            statistics += group_stats;
            schedule = Some(group_schedule);
        }

        let tensor = if outputs.len() == 1 {
            outputs.remove(0)
        } else {
            Tensor::concat_last_axis(&outputs)?
        };
        let schedule = schedule.ok_or_else(|| SimError::invalid_shape("no groups to simulate"))?;

        let invocation = OperationInvocation {
            name,
            kind,
            input_shape: input.shape().to_vec(),
            weight_shape: weight.shape().to_vec(),
            strides: params.strides,
            padding: params.padding,
            groups,
            gemm,
            row_tiles: schedule.row_tiles,
            col_tiles: schedule.col_tiles,
        };

        Ok(self.finish(tensor, statistics, invocation, &schedule, config))
    }

    /// Statistics and numeric result of one lowered matrix multiply
    fn run_gemm(
        &self,
        gemm: GemmShape,
        activations: &[f32],
        weights: &[f32],
        config: &SimConfig,
    ) -> SimResult<(Vec<f32>, SimulationStatistics, TileSchedule)> {
        let schedule = TilingStrategy::new(config.array).schedule(gemm)?;
        let model = ExecutionModel::new(config.array);

        let (result, statistics) = rayon::join(
            || compute::matmul(gemm, activations, weights, config.numeric, &config.datatypes),
            || model.run(&schedule, weights),
        );

        Ok((result?, statistics?, schedule))
    }

    fn finish(
        &self,
        tensor: Tensor,
        statistics: SimulationStatistics,
        invocation: OperationInvocation,
        schedule: &TileSchedule,
        config: &SimConfig,
    ) -> SimOutput {
        let mut logged_gemm = invocation.gemm;
        logged_gemm.n *= invocation.groups;

        let record = LogRecord {
            operation_name: invocation.name.clone(),
            gemm: logged_gemm,
            array: config.array,
            footprint: FootprintStatistics::from_schedule(schedule, &config.array, &config.datatypes),
            statistics,
        };

        let (log_file, log_warning) = match self.logger.record(&record, config) {
            Ok(path) => (Some(path), None),
            Err(err) => {
                warn!(path = %err.path().display(), error = %err, "statistics row not written, continuing");
                (None, Some(err))
            }
        };

        info!(
            cycles = statistics.cycles,
            stalled = statistics.stalled_cycles,
            row_tiles = invocation.row_tiles,
            col_tiles = invocation.col_tiles,
            "simulated {}",
            invocation.name
        );

        SimOutput {
            tensor,
            statistics,
            invocation,
            log_warning,
            log_file,
        }
    }
}

fn operation_name(name: &str, kind: OperationKind) -> String {
    if name.is_empty() {
        kind.default_name().to_string()
    } else {
        name.to_string()
    }
}

/// Flat argument set of the simulated operation as model code passes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpConfig {
    pub activations_datatype_size_byte: usize,
    pub weights_datatype_size_byte: usize,
    pub results_datatype_size_byte: usize,
    pub systolic_array_height: usize,
    pub systolic_array_width: usize,
    pub activation_fifo_depth: usize,
    pub accumulator_array_height: usize,
    pub log_file_output_dir: PathBuf,
    pub model_name: String,
    pub strides: (usize, usize),
    pub padding: Padding,
}

impl OpConfig {
    pub fn sim_config(&self) -> SimConfig {
        SimConfig {
            array: ArrayConfig::new(
                self.systolic_array_height,
                self.systolic_array_width,
                self.accumulator_array_height,
                self.activation_fifo_depth,
            ),
            datatypes: DatatypeConfig::new(
                self.activations_datatype_size_byte,
                self.weights_datatype_size_byte,
                self.results_datatype_size_byte,
            ),
            numeric: NumericMode::Float,
            log_file_output_dir: self.log_file_output_dir.clone(),
            model_name: self.model_name.clone(),
        }
    }
}

impl Default for OpConfig {
    fn default() -> Self {
        let sim = SimConfig::default();
        Self {
            activations_datatype_size_byte: sim.datatypes.activations_datatype_size_byte,
            weights_datatype_size_byte: sim.datatypes.weights_datatype_size_byte,
            results_datatype_size_byte: sim.datatypes.results_datatype_size_byte,
            systolic_array_height: sim.array.systolic_array_height,
            systolic_array_width: sim.array.systolic_array_width,
            activation_fifo_depth: sim.array.activation_fifo_depth,
            accumulator_array_height: sim.array.accumulator_array_height,
            log_file_output_dir: sim.log_file_output_dir,
            model_name: sim.model_name,
            strides: (1, 1),
            padding: Padding::Same,
        }
    }
}

static SHARED_SIMULATOR: OnceLock<Simulator> = OnceLock::new();

/// Simulate one operation with the process-wide simulator.
///
/// Rank 4 inputs are convolved with an HWIO kernel, rank 2 inputs are
/// multiplied with a [K, N] weight matrix.
///
/// Only the tensor is returned. A statistics row that could not be written
/// does not fail the call and is only reported as a `tracing` warning; use
/// [`Simulator`] directly to get it as [`SimOutput::log_warning`].
pub fn simulate_op(input: &Tensor, weight: &Tensor, config: &OpConfig) -> SimResult<Tensor> {
    let simulator = SHARED_SIMULATOR.get_or_init(Simulator::new);
    let sim_config = config.sim_config();

    let output = match input.shape().len() {
        4 => simulator.conv2d(
            input,
            weight,
            &Conv2dParams::new(config.strides, config.padding),
            &sim_config,
        )?,
        2 => simulator.matmul(input, weight, "", &sim_config)?,
        rank => {
            return Err(SimError::invalid_shape(format!(
                "expected a rank 2 or rank 4 input, got rank {}",
                rank
            )))
        }
    };

    Ok(output.tensor)
}
