use std::fs;

use pretty_assertions::assert_eq;

use mpusim::logger::log_file_path;
use mpusim::{run_workload, RunConfig, SimError, Simulator};

fn write_workload(dir: &std::path::Path, layers: &str) -> std::path::PathBuf {
    let text = format!(
        r#"
[hardware]
model_name = "mobilenet"
log_file_output_dir = "{}"

[hardware.array]
systolic_array_height = 32
systolic_array_width = 16
accumulator_array_height = 128
activation_fifo_depth = 4

{}
"#,
        dir.join("logs").display(),
        layers
    );
    let path = dir.join("workload.toml");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn workload_file_runs_every_layer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_workload(
        dir.path(),
        r#"
[[layers]]
type = "conv"
name = "conv1"
input = [1, 16, 16, 3]
kernel = [3, 3]
filters = 32
strides = [2, 2]

[[layers]]
type = "depthwise"
name = "conv_dw_1"
input = [1, 8, 8, 32]
kernel = [3, 3]

[[layers]]
type = "conv"
name = "conv_pw_1"
input = [1, 8, 8, 32]
kernel = [1, 1]
filters = 64
groups = 2

[[layers]]
type = "separable"
name = "block1_sepconv1"
input = [1, 8, 8, 64]
kernel = [3, 3]
filters = 16

[[layers]]
type = "fc"
name = "predictions"
inputs = 64
outputs = 10
"#,
    );

    let run = RunConfig::from_file(&path).unwrap();
    let reports = run_workload(&Simulator::new(), &run).unwrap();

    let shapes: Vec<Vec<usize>> = reports.iter().map(|r| r.output_shape.clone()).collect();
    assert_eq!(
        shapes,
        vec![
            vec![1, 8, 8, 32],
            vec![1, 8, 8, 32],
            vec![1, 8, 8, 64],
            vec![1, 8, 8, 64],
            vec![1, 8, 8, 16],
            vec![1, 10],
        ]
    );
    assert_eq!(reports[1].invocation.groups, 32);
    assert_eq!(reports[2].invocation.groups, 2);
    assert_eq!(reports[3].name, "block1_sepconv1/depthwise");
    assert_eq!(reports[3].invocation.groups, 64);
    assert_eq!(reports[4].name, "block1_sepconv1/pointwise");
    assert_eq!(reports[4].invocation.gemm.k, 64);

    let log_path = log_file_path(&run.hardware);
    assert!(log_path.ends_with("mobilenet_32_16_W_1_ACT_1_ACC_4.csv"));
    let log = fs::read_to_string(log_path).unwrap();
    assert_eq!(log.lines().count(), 1 + reports.len());
}

#[test]
fn missing_workload_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RunConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, SimError::Io { .. }));
}

#[test]
fn unknown_layer_type_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_workload(
        dir.path(),
        r#"
[[layers]]
type = "pooling"
name = "pool1"
"#,
    );
    let err = RunConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, SimError::ConfigParse { .. }));
}
