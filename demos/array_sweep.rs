//! Example: Array size sweep
//!
//! Runs the same fully connected layer on square arrays of growing size and
//! prints how tiling and cycle counts respond. Each size logs to its own file.
//!
//! Run with: cargo run --example array_sweep

use mpusim::{ArrayConfig, DatatypeConfig, SimConfig, Simulator, Tensor};

fn main() {
    println!("=== Array Size Sweep ===\n");

    let simulator = Simulator::new();
    let input = Tensor::filled(vec![16, 1024], 1.0);
    let weight = Tensor::filled(vec![1024, 1000], 1.0);

    println!(
        "{:>6} {:>10} {:>10} {:>12} {:>10}",
        "size", "row tiles", "col tiles", "cycles", "stalled"
    );
    for size in [16, 32, 64, 128, 256, 512] {
        let config = SimConfig::new(ArrayConfig::square(size), DatatypeConfig::default())
            .with_log_dir("logs")
            .with_model_name("sweep");

        let output = simulator.matmul(&input, &weight, "fc", &config).unwrap();
        println!(
            "{:>6} {:>10} {:>10} {:>12} {:>10}",
            size,
            output.invocation.row_tiles,
            output.invocation.col_tiles,
            output.statistics.cycles,
            output.statistics.stalled_cycles
        );
    }

    println!("\nLogs written to logs/sweep_<size>_<size>_W_1_ACT_1_ACC_4.csv");
}
