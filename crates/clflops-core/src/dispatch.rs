//! Dispatch strategies, work partitioning and host-side timing.
//!
//! Two strategies run over the same program and a freshly uploaded copy of
//! the same workload:
//!
//! - [`Strategy::Range`]: one work item per compute unit, each processing a
//!   contiguous slice computed by [`chunk_bounds`].
//! - [`Strategy::Element`]: one work item per element.
//!
//! Elapsed time is host wall-clock around submit and the blocking wait, so it
//! includes scheduling overhead but not the transfers or argument binding.

use std::fmt;
use std::ops::Range;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{ComputeBackend, PendingDispatch};
use crate::device::Device;
use crate::error::{BenchError, Result};
use crate::staging::{self, Workload};
use crate::verify::{self, Verifier};

/// Floor applied to measured time so throughput stays finite.
const MIN_ELAPSED_SECONDS: f64 = 1e-9;

/// Work-partitioning strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Contiguous chunk per compute unit.
    Range,
    /// One work item per element.
    Element,
}

impl Strategy {
    /// Both strategies in run order.
    pub const ALL: [Strategy; 2] = [Strategy::Range, Strategy::Element];

    /// Kernel entry point implementing the strategy.
    pub fn kernel_name(self) -> &'static str {
        match self {
            Self::Range => "range_op",
            Self::Element => "element_op",
        }
    }

    /// Label used in the text report.
    pub fn label(self) -> &'static str {
        match self {
            Self::Range => "Range Based",
            Self::Element => "Element Based",
        }
    }

    /// Launch shape for `total_elements` on `device`.
    ///
    /// # Errors
    ///
    /// [`BenchError::InvalidArgument`] for an empty workload, or for a range
    /// launch whose size does not fit the kernel's 32-bit size argument.
    pub fn launch(self, device: &Device, total_elements: usize) -> Result<Launch> {
        if total_elements == 0 {
            return Err(BenchError::InvalidArgument("workload has no elements".into()));
        }
        let global_size = match self {
            Self::Range => {
                if u32::try_from(total_elements).is_err() {
                    return Err(BenchError::InvalidArgument(format!(
                        "range_op size argument is 32-bit, got {total_elements} elements"
                    )));
                }
                range_units(device)
            }
            Self::Element => total_elements,
        };
        Ok(Launch { strategy: self, global_size, local_size: 1, total_elements })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range => write!(f, "range"),
            Self::Element => write!(f, "element"),
        }
    }
}

/// A single kernel launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    /// Strategy, which also names the entry point.
    pub strategy: Strategy,
    /// Global work size (number of work items).
    pub global_size: usize,
    /// Work-group size.
    pub local_size: usize,
    /// Elements in the buffer; the range kernel's `size` argument.
    pub total_elements: usize,
}

/// Number of range work items for `device`: one per compute unit.
pub fn range_units(device: &Device) -> usize {
    device.max_compute_units.max(1) as usize
}

/// Slice `[start, end)` processed by range work item `unit` of `units`.
///
/// `chunk = total / units`; the last unit's end is pinned to `total` so a
/// remainder is absorbed instead of overrunning.
///
/// # Panics
///
/// Panics if `units == 0` or `unit >= units`.
pub fn chunk_bounds(unit: usize, units: usize, total: usize) -> Range<usize> {
    assert!(units > 0, "range launch needs at least one unit");
    assert!(unit < units, "unit {unit} out of {units}");
    let chunk = total / units;
    let start = chunk * unit;
    let end = if unit == units - 1 { total } else { start + chunk };
    start..end
}

/// Every work item's slice, in unit order.
pub fn partition(units: usize, total: usize) -> impl Iterator<Item = Range<usize>> {
    (0..units).map(move |unit| chunk_bounds(unit, units, total))
}

/// Measured throughput of one strategy on one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResult {
    pub strategy: Strategy,
    pub elements: usize,
    pub elapsed_seconds: f64,
    pub elements_per_second: f64,
}

impl BenchmarkResult {
    /// Build a result from a measured duration.
    pub fn new(strategy: Strategy, elements: usize, elapsed: Duration) -> Self {
        let elapsed_seconds = elapsed.as_secs_f64().max(MIN_ELAPSED_SECONDS);
        Self {
            strategy,
            elements,
            elapsed_seconds,
            elements_per_second: elements as f64 / elapsed_seconds,
        }
    }

    /// Throughput in millions of elements per second.
    pub fn mega_elements_per_second(&self) -> f64 {
        self.elements_per_second / 1.0e6
    }

    /// Floating-point operations per second for `ops_per_element`.
    pub fn flops(&self, ops_per_element: u32) -> f64 {
        self.elements_per_second * f64::from(ops_per_element)
    }
}

/// What one strategy run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StrategyOutcome {
    /// Output verified; throughput is reportable.
    Measured(BenchmarkResult),
    /// Sampled output did not match the host reference.
    InvalidComputation { strategy: Strategy },
}

impl StrategyOutcome {
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Measured(result) => result.strategy,
            Self::InvalidComputation { strategy } => *strategy,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Measured(_))
    }
}

/// Bind `launch`, then submit it and block until it completes, timing only
/// the submit and the wait.
pub fn timed_dispatch<B: ComputeBackend>(
    backend: &B,
    program: &B::Program,
    buffer: &mut B::Buffer,
    launch: &Launch,
) -> Result<Duration> {
    backend.bind(program, buffer, launch)?;
    let start = Instant::now();
    let pending = backend.submit(program, buffer, launch)?;
    pending.wait()?;
    Ok(start.elapsed())
}

/// Runs strategies for one device and one compiled program.
pub struct DispatchEngine<'a, B: ComputeBackend> {
    backend: &'a B,
    program: &'a B::Program,
    device: &'a Device,
    verifier: Verifier,
}

impl<'a, B: ComputeBackend> DispatchEngine<'a, B> {
    pub fn new(
        backend: &'a B,
        program: &'a B::Program,
        device: &'a Device,
        verifier: Verifier,
    ) -> Self {
        Self { backend, program, device, verifier }
    }

    /// Upload the workload, time one dispatch, and verify a sample.
    ///
    /// The device buffer lives only for this call, so every strategy starts
    /// from the original input.
    pub fn run(&self, strategy: Strategy, workload: &Workload) -> Result<StrategyOutcome> {
        let launch = strategy.launch(self.device, workload.len())?;
        debug!(
            "{} on '{}': global={} local={} elements={}",
            strategy.kernel_name(),
            self.device.name,
            launch.global_size,
            launch.local_size,
            launch.total_elements
        );

        let mut buffer = staging::upload(self.backend, self.program, workload)?;
        let elapsed = timed_dispatch(self.backend, self.program, &mut buffer, &launch)?;

        let sample = verify::sample_size(workload.len());
        let output = staging::download_sample(self.backend, self.program, &buffer, sample)?;
        drop(buffer);

        if !self.verifier.verify(&output, workload.origin()) {
            warn!("Invalid computation from device '{}' ({strategy})", self.device.name);
            return Ok(StrategyOutcome::InvalidComputation { strategy });
        }

        let result = BenchmarkResult::new(strategy, workload.len(), elapsed);
        info!(
            "{} on '{}': {:.6} s, {:.3}M elements/s",
            strategy,
            self.device.name,
            result.elapsed_seconds,
            result.mega_elements_per_second()
        );
        Ok(StrategyOutcome::Measured(result))
    }
}
