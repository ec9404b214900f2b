//! Matrix processing unit simulator CLI
//!
//! Usage:
//!   mpusim run workload.toml
//!   mpusim run workload.toml --height 128 --width 128 --log-dir logs
//!   mpusim tile --m 12544 --k 147 --n 64 --json

use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand};
use colored::Colorize;
use eyre::{Result, WrapErr};
use serde::Serialize;
use tracing::metadata::LevelFilter;

use mpusim::{
    init_logger_with_ansi, logger::log_file_path, run_workload, ExecutionModel,
    FootprintStatistics, GemmShape, LayerReport, NumericMode, RunConfig, SimConfig,
    SimulationStatistics, Simulator, TilingStrategy,
};

#[derive(ClapParser, Debug)]
#[command(name = "mpusim")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Simulates convolution and fully connected layers on a systolic array")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every layer of a TOML workload file
    Run {
        /// Workload file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        #[command(flatten)]
        hardware: HardwareArgs,

        /// Output per-layer reports as JSON
        #[arg(short = 'j', long = "json")]
        json_output: bool,
    },
    /// Print the tile schedule and statistics of one matrix multiply
    Tile {
        #[arg(long)]
        m: usize,
        #[arg(long)]
        k: usize,
        #[arg(long)]
        n: usize,

        #[command(flatten)]
        hardware: HardwareArgs,

        /// Output as JSON
        #[arg(short = 'j', long = "json")]
        json_output: bool,
    },
}

/// Hardware settings that override the workload file
#[derive(Args, Debug)]
struct HardwareArgs {
    /// Systolic array height (PE rows)
    #[arg(long = "height")]
    height: Option<usize>,

    /// Systolic array width (PE columns)
    #[arg(long = "width")]
    width: Option<usize>,

    /// Activation FIFO depth in blocks
    #[arg(long = "fifo-depth")]
    fifo_depth: Option<usize>,

    /// Accumulator array height
    #[arg(long = "acc-height")]
    acc_height: Option<usize>,

    /// Activation datatype size in bytes
    #[arg(long = "act-bytes")]
    act_bytes: Option<usize>,

    /// Weight datatype size in bytes
    #[arg(long = "weight-bytes")]
    weight_bytes: Option<usize>,

    /// Result datatype size in bytes
    #[arg(long = "result-bytes")]
    result_bytes: Option<usize>,

    /// Directory for statistics logs
    #[arg(short = 'o', long = "log-dir")]
    log_dir: Option<PathBuf>,

    /// Model name used in the log file name
    #[arg(long = "model-name")]
    model_name: Option<String>,

    /// Quantize operands to their datatype width
    #[arg(long = "fixed-point")]
    fixed_point: bool,
}

impl HardwareArgs {
    fn apply(&self, config: &mut SimConfig) {
        let array = &mut config.array;
        if let Some(v) = self.height {
            array.systolic_array_height = v;
        }
        if let Some(v) = self.width {
            array.systolic_array_width = v;
        }
        if let Some(v) = self.fifo_depth {
            array.activation_fifo_depth = v;
        }
        if let Some(v) = self.acc_height {
            array.accumulator_array_height = v;
        }

        let datatypes = &mut config.datatypes;
        if let Some(v) = self.act_bytes {
            datatypes.activations_datatype_size_byte = v;
        }
        if let Some(v) = self.weight_bytes {
            datatypes.weights_datatype_size_byte = v;
        }
        if let Some(v) = self.result_bytes {
            datatypes.results_datatype_size_byte = v;
        }

        if let Some(dir) = &self.log_dir {
            config.log_file_output_dir = dir.clone();
        }
        if let Some(name) = &self.model_name {
            config.model_name = name.clone();
        }
        if self.fixed_point {
            config.numeric = NumericMode::FixedPoint;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    init_logger_with_ansi(level, std::io::stderr, true);

    match cli.command {
        Command::Run {
            config,
            hardware,
            json_output,
        } => run(config, &hardware, json_output, cli.verbose),
        Command::Tile {
            m,
            k,
            n,
            hardware,
            json_output,
        } => tile(GemmShape::new(m, k, n), &hardware, json_output),
    }
}

fn run(path: PathBuf, hardware: &HardwareArgs, json_output: bool, verbose: bool) -> Result<()> {
    let mut run = RunConfig::from_file(&path)
        .wrap_err_with(|| format!("failed to load workload '{}'", path.display()))?;
    hardware.apply(&mut run.hardware);

    if verbose && !json_output {
        print_hardware(&run.hardware);
    }

    let simulator = Simulator::new();
    let reports = run_workload(&simulator, &run).wrap_err("workload failed")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports, verbose);
        println!(
            "{}: {}",
            "Statistics log".cyan(),
            log_file_path(&run.hardware).display()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct TileSummary {
    gemm: GemmShape,
    row_tiles: usize,
    col_tiles: usize,
    position_block_size: usize,
    position_blocks: usize,
    utilization: f64,
    statistics: SimulationStatistics,
    footprint: FootprintStatistics,
}

fn tile(gemm: GemmShape, hardware: &HardwareArgs, json_output: bool) -> Result<()> {
    let mut config = SimConfig::default();
    hardware.apply(&mut config);
    config.validate()?;

    let schedule = TilingStrategy::new(config.array).schedule(gemm)?;
    let weights = vec![1.0f32; gemm.k * gemm.n];
    let statistics = ExecutionModel::new(config.array).run(&schedule, &weights)?;

    let summary = TileSummary {
        gemm,
        row_tiles: schedule.row_tiles,
        col_tiles: schedule.col_tiles,
        position_block_size: schedule.position_block_size,
        position_blocks: schedule.position_blocks,
        utilization: schedule.utilization(&config.array),
        statistics,
        footprint: FootprintStatistics::from_schedule(&schedule, &config.array, &config.datatypes),
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_hardware(&config);
    println!("{}", "Tile Schedule".bold().green());
    println!("{}", "=".repeat(50));
    println!(
        "{}: M={} K={} N={}",
        "GEMM".cyan(),
        gemm.m,
        gemm.k,
        gemm.n
    );
    println!(
        "{}: {} x {} ({} tiles)",
        "Tiles".cyan(),
        summary.row_tiles,
        summary.col_tiles,
        schedule.tiles.len()
    );
    println!(
        "{}: {} of {} positions",
        "Position blocks".cyan(),
        summary.position_blocks,
        summary.position_block_size
    );
    println!(
        "{}: {:.1}%",
        "PE utilization".cyan(),
        summary.utilization * 100.0
    );
    println!();
    println!("{}", statistics);
    Ok(())
}

fn print_hardware(config: &SimConfig) {
    let array = &config.array;
    let datatypes = &config.datatypes;
    println!(
        "{}: {}x{} systolic array, FIFO depth {}, accumulator height {}",
        "Target".cyan(),
        array.systolic_array_height,
        array.systolic_array_width,
        array.activation_fifo_depth,
        array.accumulator_array_height
    );
    println!(
        "{}: {}-byte activations, {}-byte weights, {}-byte results",
        "Width".cyan(),
        datatypes.activations_datatype_size_byte,
        datatypes.weights_datatype_size_byte,
        datatypes.results_datatype_size_byte
    );
    println!();
}

fn print_reports(reports: &[LayerReport], verbose: bool) {
    println!("{}", "Simulation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();

    for report in reports {
        let stats = &report.statistics;
        let invocation = &report.invocation;
        println!("{} {}", "Layer".bold(), report.name.bold());
        println!(
            "  {}: M={} K={} N={} x{} groups",
            "GEMM".cyan(),
            invocation.gemm.m,
            invocation.gemm.k,
            invocation.gemm.n,
            invocation.groups
        );
        println!(
            "  {}: {} x {}",
            "Tiles".cyan(),
            invocation.row_tiles,
            invocation.col_tiles
        );
        println!("  {}: {:?}", "Output shape".cyan(), report.output_shape);
        println!(
            "  {}: {} ({} stalled)",
            "Cycles".cyan(),
            stats.cycles,
            stats.stalled_cycles
        );
        if verbose {
            println!(
                "  {}: {} intra, {} inter",
                "PE data movements".cyan(),
                stats.intra_pe_data_movements,
                stats.inter_pe_data_movements
            );
            println!(
                "  {}: {}",
                "Zero weight multiplications".cyan(),
                stats.zero_weight_multiplications
            );
        }
        if let Some(warning) = &report.log_warning {
            println!("  {}: {}", "Log warning".yellow(), warning);
        }
        println!();
    }

    let total: SimulationStatistics = reports.iter().map(|r| r.statistics).sum();
    println!(
        "{}: {} layers, {} cycles ({} stalled)",
        "Total".bold(),
        reports.len(),
        total.cycles,
        total.stalled_cycles
    );
}
