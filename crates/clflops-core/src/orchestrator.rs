//! Run sequencing: enumerate, select, stage once, benchmark each device.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::ComputeBackend;
use crate::device::{self, Device};
use crate::dispatch::{DispatchEngine, Strategy, StrategyOutcome};
use crate::error::{BenchError, Result};
use crate::kernels::{VECTOROPS_OPS_PER_ELEMENT, VECTOROPS_SRC};
use crate::program;
use crate::staging::{Stager, Workload, DEFAULT_SEED};
use crate::verify::Verifier;

/// Default workload size: 512 MB.
pub const DEFAULT_WORKLOAD_BYTES: u64 = 512_000_000;

/// Fully resolved run request.
#[derive(Debug, Clone)]
pub struct BenchRequest {
    /// Print the listing and stop.
    pub list_devices: bool,
    /// Benchmark only this device.
    pub device_index: Option<usize>,
    /// Workload size in bytes.
    pub workload_bytes: u64,
    /// Input stream seed.
    pub seed: u64,
    /// Program with `range_op` and `element_op`.
    pub kernel_source: String,
    /// FLOPs per element for FLOPS reporting.
    pub ops_per_element: u32,
}

impl Default for BenchRequest {
    fn default() -> Self {
        Self {
            list_devices: false,
            device_index: None,
            workload_bytes: DEFAULT_WORKLOAD_BYTES,
            seed: DEFAULT_SEED,
            kernel_source: VECTOROPS_SRC.to_owned(),
            ops_per_element: VECTOROPS_OPS_PER_ELEMENT,
        }
    }
}

/// Per-device result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceOutcome {
    /// Both strategies ran (each measured or invalid).
    Completed { strategies: Vec<StrategyOutcome> },
    /// The program did not compile for this device.
    BuildFailed { log: String },
    /// A compute API call failed mid-run.
    Failed { reason: String, strategies: Vec<StrategyOutcome> },
}

/// One device and what happened on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReport {
    pub device: Device,
    pub outcome: DeviceOutcome,
}

impl DeviceReport {
    /// Strategy outcomes recorded before the run ended.
    pub fn strategies(&self) -> &[StrategyOutcome] {
        match &self.outcome {
            DeviceOutcome::Completed { strategies } | DeviceOutcome::Failed { strategies, .. } => {
                strategies
            }
            DeviceOutcome::BuildFailed { .. } => &[],
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self.outcome, DeviceOutcome::Completed { .. })
    }
}

/// Reports of every benchmarked device, in enumeration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub backend: String,
    pub workload_elements: usize,
    pub ops_per_element: u32,
    pub reports: Vec<DeviceReport>,
}

impl RunSummary {
    /// False when any device failed to build or failed at runtime.
    ///
    /// Invalid computations are soft failures and do not count.
    pub fn exit_ok(&self) -> bool {
        !self.reports.iter().any(DeviceReport::is_failure)
    }
}

/// What a run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutput {
    /// `list_devices` was set; every enumerated device.
    Listing(Vec<Device>),
    /// Benchmark reports.
    Summary(RunSummary),
}

/// Receives progress while the orchestrator works through its targets.
///
/// Every hook defaults to doing nothing; `()` observes nothing.
pub trait RunObserver {
    /// Before the program is built for `device`.
    fn device_started(&mut self, _device: &Device) {}

    /// As soon as one strategy finished on `device`.
    fn strategy_finished(&mut self, _device: &Device, _outcome: &StrategyOutcome) {}

    /// After `report.device` was fully handled, before the next device starts.
    fn device_finished(&mut self, _report: &DeviceReport) {}
}

impl RunObserver for () {}

/// Sequences program build and both strategies per device.
pub struct Orchestrator<'a, B: ComputeBackend> {
    backend: &'a B,
    kernel_source: &'a str,
    ops_per_element: u32,
    verifier: Verifier,
}

impl<'a, B: ComputeBackend> Orchestrator<'a, B> {
    pub fn new(backend: &'a B, kernel_source: &'a str) -> Self {
        Self {
            backend,
            kernel_source,
            ops_per_element: VECTOROPS_OPS_PER_ELEMENT,
            verifier: Verifier::default(),
        }
    }

    pub fn with_ops_per_element(mut self, ops_per_element: u32) -> Self {
        self.ops_per_element = ops_per_element;
        self
    }

    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Benchmark every device in `targets` in order; a failing device does
    /// not stop the loop.
    pub fn run(&self, targets: &[&Device], workload: &Workload) -> RunSummary {
        self.run_observed(targets, workload, &mut ())
    }

    /// [`run`](Self::run), reporting each device to `observer` as it goes.
    pub fn run_observed(
        &self,
        targets: &[&Device],
        workload: &Workload,
        observer: &mut impl RunObserver,
    ) -> RunSummary {
        let reports = targets
            .iter()
            .map(|device| {
                let report = self.run_device_observed(device, workload, observer);
                observer.device_finished(&report);
                report
            })
            .collect();
        RunSummary {
            backend: self.backend.name().to_owned(),
            workload_elements: workload.len(),
            ops_per_element: self.ops_per_element,
            reports,
        }
    }

    /// Build the program and run both strategies on one device.
    pub fn run_device(&self, device: &Device, workload: &Workload) -> DeviceReport {
        self.run_device_observed(device, workload, &mut ())
    }

    fn run_device_observed(
        &self,
        device: &Device,
        workload: &Workload,
        observer: &mut impl RunObserver,
    ) -> DeviceReport {
        info!("Benchmarking [{}] {}", device.index, device.name);
        observer.device_started(device);

        let program = match program::build(self.backend, device, self.kernel_source) {
            Ok(program) => program,
            Err(BenchError::Build { log, .. }) => {
                return DeviceReport {
                    device: device.clone(),
                    outcome: DeviceOutcome::BuildFailed { log },
                };
            }
            Err(e) => {
                error!("Device '{}' failed before dispatch: {}", device.name, e);
                return DeviceReport {
                    device: device.clone(),
                    outcome: DeviceOutcome::Failed { reason: e.to_string(), strategies: Vec::new() },
                };
            }
        };

        let engine = DispatchEngine::new(self.backend, &program, device, self.verifier);
        let mut strategies = Vec::with_capacity(Strategy::ALL.len());
        for strategy in Strategy::ALL {
            match engine.run(strategy, workload) {
                Ok(outcome) => {
                    observer.strategy_finished(device, &outcome);
                    strategies.push(outcome);
                }
                Err(e) => {
                    warn!("{} strategy failed on '{}': {}", strategy, device.name, e);
                    return DeviceReport {
                        device: device.clone(),
                        outcome: DeviceOutcome::Failed { reason: e.to_string(), strategies },
                    };
                }
            }
        }

        DeviceReport { device: device.clone(), outcome: DeviceOutcome::Completed { strategies } }
    }
}

/// Run a whole benchmark request against `backend`.
///
/// Enumerates devices, then either returns the listing or resolves the
/// targets, generates the workload once and benchmarks every target.
///
/// # Errors
///
/// [`BenchError::NoPlatform`] and [`BenchError::NoSuchDevice`] abort before
/// any device work; [`BenchError::InvalidArgument`] when the workload size
/// cannot be staged. Per-device failures are reported in the summary.
pub fn run_benchmark<B: ComputeBackend>(backend: &B, request: &BenchRequest) -> Result<RunOutput> {
    run_benchmark_observed(backend, request, &mut ())
}

/// [`run_benchmark`], reporting each device to `observer` as soon as it is
/// done.
///
/// # Errors
///
/// As [`run_benchmark`]; fatal errors occur before `observer` sees anything.
pub fn run_benchmark_observed<B: ComputeBackend>(
    backend: &B,
    request: &BenchRequest,
    observer: &mut impl RunObserver,
) -> Result<RunOutput> {
    let devices = device::enumerate(backend)?;
    if request.list_devices {
        return Ok(RunOutput::Listing(devices));
    }

    let targets = device::resolve_targets(&devices, request.device_index)?;
    let workload = Stager::new(request.seed).generate(request.workload_bytes)?;
    if workload.is_empty() {
        return Err(BenchError::InvalidArgument(format!(
            "workload of {} bytes holds no f32 element",
            request.workload_bytes
        )));
    }
    info!(
        "Staged {} elements ({} bytes) for {} device(s)",
        workload.len(),
        workload.byte_len(),
        targets.len()
    );

    let summary = Orchestrator::new(backend, &request.kernel_source)
        .with_ops_per_element(request.ops_per_element)
        .run_observed(&targets, &workload, observer);
    Ok(RunOutput::Summary(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    fn request(bytes: u64) -> BenchRequest {
        BenchRequest { workload_bytes: bytes, ..BenchRequest::default() }
    }

    fn summary(output: RunOutput) -> RunSummary {
        match output {
            RunOutput::Summary(s) => s,
            RunOutput::Listing(l) => panic!("expected summary, got listing: {l:?}"),
        }
    }

    #[test]
    fn listing_stops_before_benchmarking() {
        let backend = HostBackend::new(2, 4);
        let req = BenchRequest { list_devices: true, ..request(400) };
        match run_benchmark(&backend, &req).unwrap() {
            RunOutput::Listing(devices) => {
                let text = device::describe(&devices);
                assert!(text.starts_with("clflops Host Reference:\n"));
                assert!(text.contains("[1] Host Reference Device 1"));
            }
            RunOutput::Summary(_) => panic!("expected listing"),
        }
    }

    #[test]
    fn no_platform_is_fatal() {
        let err = run_benchmark(&HostBackend::new(0, 4), &request(400)).unwrap_err();
        assert!(matches!(err, BenchError::NoPlatform));
    }

    #[test]
    fn bad_index_is_fatal() {
        let req = BenchRequest { device_index: Some(99), ..request(400) };
        let err = run_benchmark(&HostBackend::new(2, 4), &req).unwrap_err();
        assert!(matches!(err, BenchError::NoSuchDevice { index: 99, available: 2 }));
    }

    #[test]
    fn sub_element_workload_is_rejected() {
        let err = run_benchmark(&HostBackend::new(1, 4), &request(3)).unwrap_err();
        assert!(matches!(err, BenchError::InvalidArgument(_)));
    }

    #[test]
    fn every_device_runs_both_strategies() {
        let s = summary(run_benchmark(&HostBackend::new(3, 5), &request(4000)).unwrap());
        assert_eq!(s.reports.len(), 3);
        assert!(s.exit_ok());
        for report in &s.reports {
            let order: Vec<_> = report.strategies().iter().map(StrategyOutcome::strategy).collect();
            assert_eq!(order, Strategy::ALL);
            assert!(report.strategies().iter().all(StrategyOutcome::is_valid));
        }
    }

    #[test]
    fn build_failure_does_not_stop_the_loop() {
        let backend = HostBackend::new(2, 2);
        let req = BenchRequest {
            kernel_source: "__kernel void range_op(__global float* b, const uint n) {}".into(),
            ..request(400)
        };
        let s = summary(run_benchmark(&backend, &req).unwrap());
        assert_eq!(s.reports.len(), 2);
        for report in &s.reports {
            match &report.outcome {
                DeviceOutcome::BuildFailed { log } => assert!(log.contains("element_op")),
                other => panic!("expected build failure, got {other:?}"),
            }
        }
        assert!(!s.exit_ok());
    }

    /// Records every hook call in order.
    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl RunObserver for Recorder {
        fn device_started(&mut self, device: &Device) {
            self.0.push(format!("start {}", device.index));
        }

        fn strategy_finished(&mut self, device: &Device, outcome: &StrategyOutcome) {
            self.0.push(format!("{} {}", outcome.strategy(), device.index));
        }

        fn device_finished(&mut self, report: &DeviceReport) {
            self.0.push(format!("done {}", report.device.index));
        }
    }

    #[test]
    fn observer_sees_each_device_before_the_next_starts() {
        let mut recorder = Recorder::default();
        let s = summary(
            run_benchmark_observed(&HostBackend::new(2, 3), &request(400), &mut recorder).unwrap(),
        );
        assert_eq!(s.reports.len(), 2);
        assert_eq!(
            recorder.0,
            [
                "start 0", "range 0", "element 0", "done 0", "start 1", "range 1", "element 1",
                "done 1",
            ]
        );
    }

    #[test]
    fn observer_sees_build_failures() {
        let mut recorder = Recorder::default();
        let req = BenchRequest { kernel_source: String::new(), ..request(400) };
        run_benchmark_observed(&HostBackend::new(1, 2), &req, &mut recorder).unwrap();
        assert_eq!(recorder.0, ["start 0", "done 0"]);
    }

    #[test]
    fn observer_sees_nothing_on_fatal_errors() {
        let mut recorder = Recorder::default();
        let req = BenchRequest { device_index: Some(4), ..request(400) };
        assert!(run_benchmark_observed(&HostBackend::new(1, 2), &req, &mut recorder).is_err());
        assert!(recorder.0.is_empty());
    }
}
