//! Runs the layers of a [`RunConfig`] through a [`Simulator`]
//!
//! Benchmark workloads only care about the cost model, so every tensor is
//! filled with a single constant value.

use serde::Serialize;
use tracing::{info, info_span};

use crate::config::{LayerSpec, RunConfig};
use crate::error::SimResult;
use crate::facade::{Conv2dParams, OperationInvocation, SimOutput, Simulator};
use crate::hardware::SimConfig;
use crate::statistics::SimulationStatistics;
use crate::tensor::Tensor;

/// Outcome of one simulated layer
#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub name: String,
    pub output_shape: Vec<usize>,
    pub statistics: SimulationStatistics,
    pub invocation: OperationInvocation,
    /// Set when the statistics row for this layer could not be written
    pub log_warning: Option<String>,
}

/// Simulate every layer in order, stopping at the first invalid one.
///
/// Separable layers produce one report per stage.
pub fn run_workload(simulator: &Simulator, run: &RunConfig) -> SimResult<Vec<LayerReport>> {
    run.validate()?;
    let mut reports = Vec::with_capacity(run.layers.len());

    for layer in &run.layers {
        let _span = info_span!("layer", name = layer.name()).entered();
        reports.extend(run_layer(simulator, layer, run, &run.hardware)?);
    }

    let total: SimulationStatistics = reports.iter().map(|r| r.statistics).sum();
    info!(
        layers = reports.len(),
        cycles = total.cycles,
        stalled = total.stalled_cycles,
        "workload finished"
    );
    Ok(reports)
}

fn run_layer(
    simulator: &Simulator,
    layer: &LayerSpec,
    run: &RunConfig,
    config: &SimConfig,
) -> SimResult<Vec<LayerReport>> {
    let output = match layer {
        LayerSpec::Conv {
            name,
            input,
            kernel,
            filters,
            strides,
            padding,
            groups,
        } => {
            let channels = input[3];
            let group_channels = if *groups == 0 { channels } else { channels / groups };
            let input = Tensor::filled(input.to_vec(), run.activation_value);
            let weight = Tensor::filled(
                vec![kernel[0], kernel[1], group_channels, *filters],
                run.weight_value,
            );
            let params = Conv2dParams::new((strides[0], strides[1]), *padding)
                .with_groups(*groups)
                .with_name(name.as_str());
            simulator.conv2d(&input, &weight, &params, config)?
        }
        LayerSpec::Depthwise {
            name,
            input,
            kernel,
            multiplier,
            strides,
            padding,
        } => {
            let input_tensor = Tensor::filled(input.to_vec(), run.activation_value);
            let weight = Tensor::filled(
                vec![kernel[0], kernel[1], input[3], *multiplier],
                run.weight_value,
            );
            let params = Conv2dParams::new((strides[0], strides[1]), *padding).with_name(name.as_str());
            simulator.depthwise_conv2d(&input_tensor, &weight, &params, config)?
        }
        LayerSpec::Separable {
            name,
            input,
            kernel,
            multiplier,
            filters,
            strides,
            padding,
        } => {
            let input_tensor = Tensor::filled(input.to_vec(), run.activation_value);
            let depthwise = Tensor::filled(
                vec![kernel[0], kernel[1], input[3], *multiplier],
                run.weight_value,
            );
            let pointwise = Tensor::filled(
                vec![1, 1, input[3] * multiplier, *filters],
                run.weight_value,
            );
            let params = Conv2dParams::new((strides[0], strides[1]), *padding).with_name(name.as_str());
            let output =
                simulator.separable_conv2d(&input_tensor, &depthwise, &pointwise, &params, config)?;
            return Ok(vec![report(output.depthwise), report(output.pointwise)]);
        }
        LayerSpec::Fc {
            name,
            batch,
            inputs,
            outputs,
        } => {
            let input = Tensor::filled(vec![*batch, *inputs], run.activation_value);
            let weight = Tensor::filled(vec![*inputs, *outputs], run.weight_value);
            simulator.matmul(&input, &weight, name, config)?
        }
    };

    Ok(vec![report(output)])
}

fn report(output: SimOutput) -> LayerReport {
    LayerReport {
        name: output.invocation.name.clone(),
        output_shape: output.tensor.shape().to_vec(),
        statistics: output.statistics,
        invocation: output.invocation,
        log_warning: output.log_warning.map(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::ArrayConfig;
    use crate::logger::log_file_path;
    use crate::tensor::Padding;
    use pretty_assertions::assert_eq;

    fn small_run(dir: &std::path::Path) -> RunConfig {
        let mut hardware = SimConfig::default()
            .with_log_dir(dir)
            .with_model_name("tiny");
        hardware.array = ArrayConfig::new(8, 8, 32, 4);

        RunConfig {
            activation_value: 1.0,
            weight_value: 1.0,
            hardware,
            layers: vec![
                LayerSpec::Conv {
                    name: "conv1".to_string(),
                    input: [1, 6, 6, 2],
                    kernel: [3, 3],
                    filters: 4,
                    strides: [1, 1],
                    padding: Padding::Valid,
                    groups: 1,
                },
                LayerSpec::Depthwise {
                    name: "dw".to_string(),
                    input: [1, 4, 4, 4],
                    kernel: [3, 3],
                    multiplier: 1,
                    strides: [1, 1],
                    padding: Padding::Same,
                },
                LayerSpec::Fc {
                    name: "fc".to_string(),
                    batch: 1,
                    inputs: 64,
                    outputs: 10,
                },
                LayerSpec::Separable {
                    name: "sep".to_string(),
                    input: [1, 4, 4, 4],
                    kernel: [3, 3],
                    multiplier: 2,
                    filters: 6,
                    strides: [2, 2],
                    padding: Padding::Same,
                },
            ],
        }
    }

    #[test]
    fn test_layers_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let run = small_run(dir.path());
        let reports = run_workload(&Simulator::new(), &run).unwrap();

        let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["conv1", "dw", "fc", "sep/depthwise", "sep/pointwise"]);
        assert_eq!(reports[0].output_shape, vec![1, 4, 4, 4]);
        assert_eq!(reports[1].output_shape, vec![1, 4, 4, 4]);
        assert_eq!(reports[2].output_shape, vec![1, 10]);
        assert_eq!(reports[3].output_shape, vec![1, 2, 2, 8]);
        assert_eq!(reports[4].output_shape, vec![1, 2, 2, 6]);
        assert!(reports.iter().all(|r| r.log_warning.is_none()));

        let log = std::fs::read_to_string(log_file_path(&run.hardware)).unwrap();
        let rows: Vec<&str> = log.lines().skip(1).collect();
        assert_eq!(rows.len(), 5);
        assert!(rows[0].starts_with("\"conv1\""));
        assert!(rows[1].starts_with("\"dw\""));
        assert!(rows[2].starts_with("\"fc\""));
        assert!(rows[3].starts_with("\"sep/depthwise\""));
        assert!(rows[4].starts_with("\"sep/pointwise\""));
    }

    #[test]
    fn test_fc_layer_needs_eight_row_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let run = small_run(dir.path());
        let reports = run_workload(&Simulator::new(), &run).unwrap();

        // K = 64 on an 8 row array
        assert_eq!(reports[2].invocation.row_tiles, 8);
        assert_eq!(reports[2].invocation.col_tiles, 2);
    }

    #[test]
    fn test_invalid_layer_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = small_run(dir.path());
        run.layers.insert(
            1,
            LayerSpec::Conv {
                name: "bad".to_string(),
                input: [1, 4, 4, 3],
                kernel: [1, 1],
                filters: 4,
                strides: [1, 1],
                padding: Padding::Same,
                groups: 2,
            },
        );

        assert!(run_workload(&Simulator::new(), &run).is_err());
    }
}
