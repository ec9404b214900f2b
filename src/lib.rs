//! Systolic array matrix processing unit simulator
//!
//! Convolutions and fully connected layers are lowered to a matrix multiply,
//! split into tiles that fit a weight-stationary systolic array and run
//! through a cycle-level cost model. The numeric result is computed alongside
//! and every operation appends one row of statistics to a per-model log file.
//!
//! # Example
//!
//! ```rust,no_run
//! use mpusim::{Conv2dParams, Padding, SimConfig, Simulator, Tensor};
//!
//! let simulator = Simulator::new();
//! let config = SimConfig::default().with_model_name("resnet").with_log_dir("logs");
//! let input = Tensor::filled(vec![1, 224, 224, 3], 1.0);
//! let weight = Tensor::filled(vec![7, 7, 3, 64], 1.0);
//! let params = Conv2dParams::new((2, 2), Padding::Same).with_name("conv1");
//!
//! let output = simulator.conv2d(&input, &weight, &params, &config).unwrap();
//! println!("{} cycles", output.statistics.cycles);
//! ```

use std::io;

use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

pub mod compute;
pub mod config;
pub mod error;
pub mod execution;
pub mod facade;
pub mod hardware;
pub mod logger;
pub mod statistics;
pub mod tensor;
pub mod tiling;
pub mod workload;

pub use config::{LayerSpec, RunConfig};
pub use error::{LogError, SimError, SimResult};
pub use execution::ExecutionModel;
pub use facade::{
    simulate_op, Conv2dParams, OpConfig, OperationKind, SeparableOutput, SimOutput, Simulator,
};
pub use hardware::{ArrayConfig, DatatypeConfig, NumericMode, SimConfig};
pub use logger::{LogRecord, StatisticsLogger};
pub use statistics::{FootprintStatistics, SimulationStatistics};
pub use tensor::{Padding, Tensor};
pub use tiling::{GemmShape, TileSchedule, TilingStrategy};
pub use workload::{run_workload, LayerReport};

/// Log at info level to stderr unless `RUST_LOG` says otherwise
pub fn init_logger_info() {
    init_logger_with_ansi(LevelFilter::INFO, io::stderr, true);
}

/// Install a global `tracing` subscriber; `RUST_LOG` overrides `filter`
pub fn init_logger_with_ansi(
    filter: LevelFilter,
    writer: impl for<'writer> MakeWriter<'writer> + 'static + Send + Sync,
    ansi: bool,
) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .with_writer(writer)
        .with_ansi(ansi)
        .try_init()
        .unwrap_or_else(|e| {
            eprintln!("failed to init logger: {}", e);
        });
}
