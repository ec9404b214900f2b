//! Example: Grouped and depthwise convolutions
//!
//! A grouped convolution runs each channel group through the array on its
//! own; the statistics of the groups add up and a single row is logged.
//!
//! Run with: cargo run --example grouped_conv

use mpusim::{ArrayConfig, Conv2dParams, DatatypeConfig, Padding, SimConfig, Simulator, Tensor};

fn main() {
    println!("=== Grouped Convolution Example ===\n");

    let config = SimConfig::new(ArrayConfig::new(32, 32, 512, 4), DatatypeConfig::default())
        .with_log_dir("logs")
        .with_model_name("grouped_demo");
    let simulator = Simulator::new();

    let input = Tensor::from_fn(vec![1, 14, 14, 64], |i| (i % 7) as f32 - 3.0);
    let same = Conv2dParams::new((1, 1), Padding::Same);

    // Example 1: ordinary convolution
    let weight = Tensor::filled(vec![3, 3, 64, 64], 0.5);
    let dense = simulator
        .conv2d(&input, &weight, &same.clone().with_name("dense"), &config)
        .unwrap();
    println!("Dense 3x3x64x64:");
    println!("  tiles {} x {}", dense.invocation.row_tiles, dense.invocation.col_tiles);
    println!("  cycles {}\n", dense.statistics.cycles);

    // Example 2: the same layer split into two groups
    let weight = Tensor::filled(vec![3, 3, 32, 64], 0.5);
    let grouped = simulator
        .conv2d(
            &input,
            &weight,
            &same.clone().with_groups(2).with_name("grouped"),
            &config,
        )
        .unwrap();
    println!("Two groups of 3x3x32x32:");
    println!(
        "  per group tiles {} x {}",
        grouped.invocation.row_tiles, grouped.invocation.col_tiles
    );
    println!("  cycles {}\n", grouped.statistics.cycles);

    // Example 3: depthwise, one group per channel
    let weight = Tensor::filled(vec![3, 3, 64, 1], 1.0);
    let depthwise = simulator
        .depthwise_conv2d(&input, &weight, &same.with_name("depthwise"), &config)
        .unwrap();
    println!("Depthwise 3x3 over 64 channels:");
    println!("  groups {}", depthwise.invocation.groups);
    println!("  cycles {}", depthwise.statistics.cycles);
    println!(
        "  zero weight multiplications {}",
        depthwise.statistics.zero_weight_multiplications
    );
}
