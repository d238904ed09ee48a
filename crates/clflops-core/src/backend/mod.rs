//! Compute backend seam.
//!
//! A [`ComputeBackend`] exposes exactly what the harness needs from a
//! heterogeneous-compute API: platform discovery, program build, blocking
//! transfers, argument binding, and an asynchronous submit whose completion
//! is awaited with a blocking [`PendingDispatch::wait`].
//!
//! Only [`ComputeBackend::submit`] and the wait fall inside the timed window;
//! kernel objects are created by `build` and arguments are set by `bind`.

pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use host::{HostBackend, HostBuffer, HostPending, HostProgram};
#[cfg(feature = "opencl")]
pub use opencl::{OpenClBackend, OpenClBuffer, OpenClPending, OpenClProgram};

use crate::device::{Device, PlatformRecord};
use crate::dispatch::Launch;
use crate::error::Result;

/// A submitted dispatch that has not been awaited yet.
pub trait PendingDispatch {
    /// Block until the device signals completion.
    fn wait(self) -> Result<()>;
}

/// Trait implemented by each compute backend (OpenCL, host reference).
pub trait ComputeBackend {
    /// Kernel program compiled for one device.
    type Program;
    /// Device-resident `f32` buffer.
    type Buffer;
    /// Completion handle returned by [`submit`](Self::submit).
    type Pending: PendingDispatch;

    /// Short backend name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Every platform with its devices, in API order.
    fn platforms(&self) -> Result<Vec<PlatformRecord>>;

    /// Compile `source` for exactly one device.
    ///
    /// A compiler failure is [`BenchError::Build`](crate::BenchError::Build)
    /// carrying the compiler log.
    fn build(&self, device: &Device, source: &str) -> Result<Self::Program>;

    /// Allocate a device buffer and copy `data` into it; returns after the
    /// transfer completed.
    fn upload(&self, program: &Self::Program, data: &[f32]) -> Result<Self::Buffer>;

    /// Copy the first `count` elements of `buffer` back to the host; returns
    /// after the transfer completed.
    fn download(
        &self,
        program: &Self::Program,
        buffer: &Self::Buffer,
        count: usize,
    ) -> Result<Vec<f32>>;

    /// Set the entry point's arguments for `launch` over `buffer`.
    ///
    /// Called before the timer starts.
    fn bind(&self, program: &Self::Program, buffer: &Self::Buffer, launch: &Launch) -> Result<()>;

    /// Enqueue one kernel launch over `buffer` without waiting for it.
    ///
    /// Expects a prior [`bind`](Self::bind) with the same buffer and launch.
    fn submit(
        &self,
        program: &Self::Program,
        buffer: &mut Self::Buffer,
        launch: &Launch,
    ) -> Result<Self::Pending>;
}
