//! Example: First layer of a ResNet
//!
//! Simulates a 7x7 stride 2 convolution over a 224x224 RGB image on the
//! default 256x256 array and prints the statistics that end up in the log.
//!
//! Run with: cargo run --example single_conv

use mpusim::{init_logger_info, Conv2dParams, Padding, SimConfig, Simulator, Tensor};

fn main() {
    init_logger_info();
    println!("=== Single Convolution Example ===\n");

    let config = SimConfig::default()
        .with_log_dir("logs")
        .with_model_name("resnet_demo");

    let input = Tensor::filled(vec![1, 224, 224, 3], 1.0);
    let weight = Tensor::filled(vec![7, 7, 3, 64], 1.0);
    let params = Conv2dParams::new((2, 2), Padding::Same).with_name("conv1");

    println!("Input:  {:?}", input.shape());
    println!("Kernel: {:?}, stride 2, SAME padding\n", weight.shape());

    let simulator = Simulator::new();
    let output = simulator.conv2d(&input, &weight, &params, &config).unwrap();

    let gemm = output.invocation.gemm;
    println!("Lowered GEMM: M={} K={} N={}", gemm.m, gemm.k, gemm.n);
    println!(
        "Tiles: {} x {}",
        output.invocation.row_tiles, output.invocation.col_tiles
    );
    println!("Output shape: {:?}\n", output.tensor.shape());

    // A single tile streams M positions through an array H rows deep
    println!("Cycles: {} (expected {})", output.statistics.cycles, gemm.m + 256 - 1);
    println!("\n{}", output.statistics);

    match output.log_file {
        Some(path) => println!("Row appended to {}", path.display()),
        None => println!("Statistics row was not written"),
    }
}
