//! Throughput benchmark core for OpenCL compute devices.
//!
//! This crate provides:
//! - [`device`]: platform/device enumeration as plain records
//! - [`backend`]: the compute API seam, with an OpenCL implementation
//!   (feature `opencl`) and a host reference implementation
//! - [`program`]: kernel program build with diagnostics
//! - [`staging`]: deterministic input generation and blocking transfers
//! - [`dispatch`]: range and element strategies, host-side timing
//! - [`verify`]: sampled verification against the host reference
//! - [`orchestrator`]: per-device sequencing and run summary

pub mod backend;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod kernels;
pub mod orchestrator;
pub mod program;
pub mod staging;
pub mod verify;

// Re-export primary public types.
pub use backend::{ComputeBackend, HostBackend, PendingDispatch};
#[cfg(feature = "opencl")]
pub use backend::OpenClBackend;
pub use device::{describe, enumerate, resolve_targets, Device, DeviceRecord, PlatformRecord};
pub use dispatch::{BenchmarkResult, DispatchEngine, Launch, Strategy, StrategyOutcome};
pub use error::{BenchError, Result};
pub use orchestrator::{
    run_benchmark, run_benchmark_observed, BenchRequest, DeviceOutcome, DeviceReport, Orchestrator,
    RunObserver, RunOutput, RunSummary, DEFAULT_WORKLOAD_BYTES,
};
pub use staging::{SampleStream, Stager, StreamCheckpoint, Workload, DEFAULT_SEED};
pub use verify::{verify, Verifier, VERIFY_TOLERANCE};
