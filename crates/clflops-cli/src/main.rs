//! clflops command-line application
//!
//! Measures how fast each compute device applies an element-wise `sqrt` to a
//! large `f32` buffer, using a per-compute-unit range strategy and a
//! per-element strategy, and verifies a sample of every result on the host.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use clflops_cli::config::{load_layers, BackendKind, CliConfig, CliError, LogFormat};
use clflops_cli::exit::{EXIT_FAILURE, EXIT_SUCCESS};
use clflops_cli::logging::setup_logging;
use clflops_cli::output::{self, OutputFormat, TextProgress};
use clflops_core::{
    run_benchmark_observed, BenchRequest, ComputeBackend, HostBackend, RunObserver, RunOutput,
};
use console::style;
use tracing::{debug, info};

/// clflops - OpenCL device throughput benchmark
#[derive(Parser, Debug)]
#[command(name = "clflops")]
#[command(about = "Benchmark element throughput of OpenCL compute devices")]
#[command(long_about = r#"
Runs an in-place sqrt over a buffer of random floats on every compute device
(or one selected device) with two work partitioning strategies, and reports
elapsed time and elements per second for each. A 1% sample of every result is
verified against the host.

Examples:
  # List devices
  clflops -l

  # Benchmark every device with a 512 MB workload
  clflops

  # Benchmark device 1 with 2 GB
  clflops -s 2G 1

  # Host reference backend, JSON report
  clflops --backend host -s 64M --format json
"#)]
#[command(version)]
struct Cli {
    /// List available devices and exit
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Workload size in bytes; optional M (10^6) or G (10^9) suffix [default: 512M]
    #[arg(short = 's', long, value_name = "SIZE")]
    size: Option<String>,

    /// Benchmark only the device with this index (see --list)
    #[arg(value_name = "DEVICE_INDEX")]
    device_index: Option<usize>,

    /// Kernel source file defining `range_op` and `element_op`
    #[arg(short = 'k', long, value_name = "PATH")]
    kernel: Option<PathBuf>,

    /// Compute backend (opencl, host)
    #[arg(long, value_name = "BACKEND")]
    backend: Option<BackendKind>,

    /// Seed of the input generator
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Floating-point operations per element, for FLOPS reporting
    #[arg(long, value_name = "N")]
    ops_per_element: Option<u32>,

    /// Report format (text, json)
    #[arg(long, value_name = "FORMAT")]
    format: Option<OutputFormat>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Configuration file path [default: ./clflops.toml if present]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are reported through the same path.
            let code = if e.use_stderr() { EXIT_FAILURE } else { EXIT_SUCCESS };
            let _ = e.print();
            process::exit(code);
        }
    };

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {cause}");
            }
            EXIT_FAILURE
        }
    };
    process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_configuration(&cli)?;
    setup_logging(&config.log_level, config.log_format)?;
    debug!("Resolved configuration: {:?}", config);

    let request = config.bench_request(cli.list, cli.device_index)?;
    let result = match config.format {
        OutputFormat::Text => {
            let mut progress = TextProgress::new(io::stdout(), io::stderr());
            let result = execute(config.backend, &request, &mut progress)?;
            progress.finish()?;
            result
        }
        OutputFormat::Json => execute(config.backend, &request, &mut ())?,
    };
    emit(result, config.format)
}

/// Defaults, file, environment, then flags.
fn load_configuration(cli: &Cli) -> Result<CliConfig> {
    let config = load_layers(cli.config.as_deref())?
        .size(cli.size.clone())
        .seed(cli.seed)
        .backend(cli.backend)
        .kernel(cli.kernel.clone())
        .ops_per_element(cli.ops_per_element)
        .format(cli.format)
        .log_level(cli.log_level.clone())
        .log_format(cli.log_format)
        .build()?;
    Ok(config)
}

fn execute(
    kind: BackendKind,
    request: &BenchRequest,
    observer: &mut impl RunObserver,
) -> Result<RunOutput, CliError> {
    match kind {
        BackendKind::Host => bench(&HostBackend::from_env()?, request, observer),
        BackendKind::OpenCl => execute_opencl(request, observer),
    }
}

fn bench<B: ComputeBackend>(
    backend: &B,
    request: &BenchRequest,
    observer: &mut impl RunObserver,
) -> Result<RunOutput, CliError> {
    info!("Using {} backend", backend.name());
    Ok(run_benchmark_observed(backend, request, observer)?)
}

#[cfg(feature = "opencl")]
fn execute_opencl(
    request: &BenchRequest,
    observer: &mut impl RunObserver,
) -> Result<RunOutput, CliError> {
    bench(&clflops_core::OpenClBackend::new(), request, observer)
}

#[cfg(not(feature = "opencl"))]
fn execute_opencl(
    _request: &BenchRequest,
    _observer: &mut impl RunObserver,
) -> Result<RunOutput, CliError> {
    Err(CliError::Config("backend 'opencl' is not compiled in; rebuild with --features opencl".into()))
}

/// Print the result and decide the exit code.
fn emit(result: RunOutput, format: OutputFormat) -> Result<i32> {
    let mut out = io::stdout().lock();
    let code = match result {
        RunOutput::Listing(devices) => {
            output::write_listing(&devices, format, &mut out)?;
            EXIT_SUCCESS
        }
        RunOutput::Summary(summary) => {
            // Text reports were already streamed per device.
            if format == OutputFormat::Json {
                output::write_summary(&summary, format, &mut out, &mut io::stderr().lock())?;
            }
            if summary.exit_ok() {
                EXIT_SUCCESS
            } else {
                info!("At least one device failed to build or run");
                EXIT_FAILURE
            }
        }
    };
    out.flush()?;
    Ok(code)
}
