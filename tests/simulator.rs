use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;

use mpusim::logger::{log_file_path, COLUMNS};
use mpusim::{
    simulate_op, ArrayConfig, Conv2dParams, DatatypeConfig, OpConfig, Padding, SimConfig,
    Simulator, Tensor, TilingStrategy,
};

fn config(dir: &Path, model: &str, array: ArrayConfig) -> SimConfig {
    SimConfig::new(array, DatatypeConfig::default())
        .with_log_dir(dir)
        .with_model_name(model)
}

/// Direct NHWC x HWIO convolution with TensorFlow style padding
fn reference_conv(
    input: &Tensor,
    weight: &Tensor,
    strides: (usize, usize),
    padding: Padding,
) -> Tensor {
    let (batch, h, w, c) = input.dims4().unwrap();
    let (kh, kw, _, out_c) = weight.dims4().unwrap();
    let (sh, sw) = strides;

    let (oh, ow, pad_top, pad_left) = match padding {
        Padding::Valid => ((h - kh) / sh + 1, (w - kw) / sw + 1, 0, 0),
        Padding::Same => {
            let oh = (h + sh - 1) / sh;
            let ow = (w + sw - 1) / sw;
            let pad_h = ((oh - 1) * sh + kh).saturating_sub(h);
            let pad_w = ((ow - 1) * sw + kw).saturating_sub(w);
            (oh, ow, pad_h / 2, pad_w / 2)
        }
    };

    let x = input.data();
    let k = weight.data();
    let mut out = vec![0.0f32; batch * oh * ow * out_c];
    for b in 0..batch {
        for oy in 0..oh {
            for ox in 0..ow {
                for o in 0..out_c {
                    let mut acc = 0.0f32;
                    for dy in 0..kh {
                        for dx in 0..kw {
                            let iy = (oy * sh + dy) as isize - pad_top as isize;
                            let ix = (ox * sw + dx) as isize - pad_left as isize;
                            if iy < 0 || ix < 0 || iy >= h as isize || ix >= w as isize {
                                continue;
                            }
                            let (iy, ix) = (iy as usize, ix as usize);
                            for ci in 0..c {
                                acc += x[((b * h + iy) * w + ix) * c + ci]
                                    * k[((dy * kw + dx) * c + ci) * out_c + o];
                            }
                        }
                    }
                    out[((b * oh + oy) * ow + ox) * out_c + o] = acc;
                }
            }
        }
    }
    Tensor::new(vec![batch, oh, ow, out_c], out).unwrap()
}

fn pattern(shape: Vec<usize>, period: usize) -> Tensor {
    Tensor::from_fn(shape, |i| (i % period) as f32 - (period / 2) as f32)
}

#[test]
fn conv_matches_reference() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), "reference", ArrayConfig::new(8, 4, 16, 2));
    let simulator = Simulator::new();

    let input = pattern(vec![2, 9, 7, 3], 5);
    let weight = pattern(vec![3, 3, 3, 6], 7);

    for padding in [Padding::Same, Padding::Valid] {
        for strides in [(1, 1), (2, 2), (2, 1)] {
            let params = Conv2dParams::new(strides, padding);
            let output = simulator.conv2d(&input, &weight, &params, &cfg).unwrap();
            let expected = reference_conv(&input, &weight, strides, padding);

            let diff = output.tensor.max_abs_diff(&expected);
            assert!(
                matches!(diff, Some(d) if d < 1e-3),
                "{:?} {:?}: diff {:?}",
                padding,
                strides,
                diff
            );
        }
    }
}

#[test]
fn matmul_matches_reference() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), "fc", ArrayConfig::new(4, 4, 8, 2));

    let input = pattern(vec![5, 11], 4);
    let weight = pattern(vec![11, 6], 3);
    let output = Simulator::new().matmul(&input, &weight, "fc", &cfg).unwrap();

    let mut expected = vec![0.0f32; 5 * 6];
    for i in 0..5 {
        for j in 0..6 {
            for k in 0..11 {
                expected[i * 6 + j] += input.data()[i * 11 + k] * weight.data()[k * 6 + j];
            }
        }
    }
    assert_eq!(output.tensor.shape(), &[5, 6]);
    assert_eq!(output.tensor.data(), expected.as_slice());
}

#[test]
fn single_tile_cycles_are_positions_plus_fill() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), "single_tile", ArrayConfig::new(16, 16, 4096, 8));
    let simulator = Simulator::new();

    for m in [1, 5, 300, 5000] {
        let input = Tensor::filled(vec![m, 16], 1.0);
        let weight = Tensor::filled(vec![16, 12], 1.0);
        let output = simulator.matmul(&input, &weight, "fc", &cfg).unwrap();

        assert_eq!(output.invocation.row_tiles, 1);
        assert_eq!(output.invocation.col_tiles, 1);
        assert_eq!(output.statistics.stalled_cycles, 0);
        assert_eq!(output.statistics.cycles, m as u64 + 16 - 1, "M = {}", m);
    }
}

#[test]
fn taller_array_never_needs_more_row_tiles() {
    let mut previous = usize::MAX;
    for height in 1..=300 {
        let tiles = TilingStrategy::new(ArrayConfig::new(height, 8, 64, 2)).row_tiles(1000);
        assert!(tiles <= previous, "height {}", height);
        previous = tiles;
    }
}

#[test]
fn resnet_first_layer_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SimConfig::default()
        .with_log_dir(dir.path())
        .with_model_name("resnet");

    let input = Tensor::filled(vec![1, 224, 224, 3], 1.0);
    let weight = Tensor::filled(vec![7, 7, 3, 64], 1.0);
    let params = Conv2dParams::new((2, 2), Padding::Same).with_name("conv1");
    let output = Simulator::new().conv2d(&input, &weight, &params, &cfg).unwrap();

    assert_eq!(output.tensor.shape(), &[1, 112, 112, 64]);
    assert_eq!(output.invocation.gemm.m, 12544);
    assert_eq!(output.invocation.gemm.k, 147);
    assert_eq!(output.invocation.gemm.n, 64);
    assert_eq!(output.invocation.row_tiles, 1);
    assert_eq!(output.invocation.col_tiles, 1);
    assert_eq!(output.statistics.cycles, 12799);
    assert_eq!(output.statistics.stalled_cycles, 0);

    let log = fs::read_to_string(log_file_path(&cfg)).unwrap();
    let row: Vec<&str> = log.lines().nth(1).unwrap().split('\t').collect();
    assert_eq!(row.len(), COLUMNS.len());
    assert_eq!(row[0], "\"conv1\"");
    assert_eq!(row[1], "12544");
    assert_eq!(row[2], "64");
    assert_eq!(row[3], "147");
    assert_eq!(row[27], "12799");
    assert_eq!(row[28], "0");
}

#[test]
fn zero_weights_counted_per_position() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SimConfig::default()
        .with_log_dir(dir.path())
        .with_model_name("zeros");

    let input = Tensor::filled(vec![1, 10, 10, 64], 1.0);
    let weight = Tensor::zeros(vec![1, 1, 64, 1]);
    let output = Simulator::new()
        .conv2d(&input, &weight, &Conv2dParams::default(), &cfg)
        .unwrap();

    assert_eq!(output.statistics.zero_weight_multiplications, 6400);
    assert!(output.tensor.data().iter().all(|&v| v == 0.0));
}

#[test]
fn grouped_conv_is_sum_of_halves() {
    let dir = tempfile::tempdir().unwrap();
    let array = ArrayConfig::new(8, 4, 16, 2);
    let grouped_cfg = config(dir.path(), "grouped", array);
    let halves_cfg = config(dir.path(), "halves", array);
    let simulator = Simulator::new();

    let input = pattern(vec![1, 6, 6, 4], 5);
    let weight = pattern(vec![3, 3, 2, 6], 4);
    let params = Conv2dParams::new((1, 1), Padding::Same);

    let grouped = simulator
        .conv2d(&input, &weight, &params.clone().with_groups(2), &grouped_cfg)
        .unwrap();

    let halves: Vec<_> = (0..2)
        .map(|g| {
            let x = input.slice_last_axis(g * 2, (g + 1) * 2).unwrap();
            let w = weight.slice_last_axis(g * 3, (g + 1) * 3).unwrap();
            simulator.conv2d(&x, &w, &params, &halves_cfg).unwrap()
        })
        .collect();

    assert_eq!(
        grouped.statistics,
        halves[0].statistics + halves[1].statistics
    );
    let concatenated =
        Tensor::concat_last_axis(&[halves[0].tensor.clone(), halves[1].tensor.clone()]).unwrap();
    assert_eq!(grouped.tensor, concatenated);

    // One row for the grouped call, logged with the full output channel count
    let log = fs::read_to_string(log_file_path(&grouped_cfg)).unwrap();
    let rows: Vec<&str> = log.lines().skip(1).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].split('\t').nth(2), Some("6"));
}

#[test]
fn replay_produces_identical_rows() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let input = pattern(vec![1, 12, 12, 8], 3);
    let weight = pattern(vec![3, 3, 8, 16], 5);
    let params = Conv2dParams::new((1, 1), Padding::Valid).with_name("replayed");
    let array = ArrayConfig::new(16, 8, 32, 3);

    let mut logs = Vec::new();
    for dir in [first.path(), second.path()] {
        let cfg = config(dir, "replay", array);
        Simulator::new()
            .conv2d(&input, &weight, &params, &cfg)
            .unwrap();
        logs.push(fs::read(log_file_path(&cfg)).unwrap());
    }

    assert_eq!(logs[0], logs[1]);
}

#[test]
fn rows_follow_call_order() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), "ordered", ArrayConfig::new(8, 8, 16, 2));
    let simulator = Simulator::new();

    let input = Tensor::filled(vec![2, 8], 1.0);
    let weight = Tensor::filled(vec![8, 8], 1.0);
    let names = ["first", "second", "third", "fourth"];
    for name in names {
        simulator.matmul(&input, &weight, name, &cfg).unwrap();
    }

    let log = fs::read_to_string(log_file_path(&cfg)).unwrap();
    let logged: Vec<String> = log
        .lines()
        .skip(1)
        .map(|line| line.split('\t').next().unwrap().trim_matches('"').to_string())
        .collect();
    assert_eq!(logged, names.iter().map(|s| s.to_string()).collect::<Vec<_>>());
}

#[test]
fn unwritable_log_dir_does_not_fail_the_operation() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("occupied");
    fs::write(&blocker, b"not a directory").unwrap();

    let op = OpConfig {
        systolic_array_height: 4,
        systolic_array_width: 4,
        log_file_output_dir: blocker.join("logs"),
        model_name: "unwritable".to_string(),
        ..OpConfig::default()
    };
    let input = Tensor::filled(vec![3, 4], 2.0);
    let weight = Tensor::filled(vec![4, 2], 0.5);

    let output = simulate_op(&input, &weight, &op).unwrap();
    assert_eq!(output.shape(), &[3, 2]);
    assert!(output.data().iter().all(|&v| v == 4.0));
}

#[test]
fn invalid_config_is_rejected_before_logging() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SimConfig::new(ArrayConfig::new(8, 8, 16, 2), DatatypeConfig::new(1, 1, 0))
        .with_log_dir(dir.path())
        .with_model_name("invalid");

    let input = Tensor::filled(vec![2, 8], 1.0);
    let weight = Tensor::filled(vec![8, 8], 1.0);
    assert!(Simulator::new().matmul(&input, &weight, "", &cfg).is_err());
    assert!(!log_file_path(&cfg).exists());
}
