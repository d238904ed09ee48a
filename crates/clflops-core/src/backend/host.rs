//! Host reference backend.
//!
//! Emulates one platform of compute devices on the host so the harness runs
//! without an OpenCL runtime. The two benchmark entry points execute as Rust
//! code following the same partitioning as the OpenCL C kernels; a dispatch
//! runs on its own thread (work items fan out over rayon) and `wait` joins
//! it.
//!
//! `CLFLOPS_HOST_DEVICES` sets the device count (0 reports no platform) and
//! `CLFLOPS_HOST_COMPUTE_UNITS` the per-device compute unit count.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use rayon::prelude::*;
use tracing::debug;

use super::{ComputeBackend, PendingDispatch};
use crate::device::{Device, DeviceRecord, PlatformRecord};
use crate::dispatch::{partition, Launch, Strategy};
use crate::error::{BenchError, Result};
use crate::kernels::reference_transform;

/// Environment variable holding the number of emulated devices.
pub const HOST_DEVICES_ENV: &str = "CLFLOPS_HOST_DEVICES";
/// Environment variable overriding each device's compute unit count.
pub const HOST_COMPUTE_UNITS_ENV: &str = "CLFLOPS_HOST_COMPUTE_UNITS";

const HOST_VENDOR: &str = "clflops";
const HOST_PLATFORM: &str = "Host Reference";

/// Host-emulated compute platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBackend {
    platforms: Vec<PlatformRecord>,
}

impl HostBackend {
    /// `device_count` devices on one platform; zero devices means no platform.
    pub fn new(device_count: usize, compute_units: u32) -> Self {
        if device_count == 0 {
            return Self { platforms: Vec::new() };
        }
        let devices = (0..device_count)
            .map(|i| DeviceRecord {
                name: format!("Host Reference Device {i}"),
                max_compute_units: compute_units,
            })
            .collect();
        Self::with_platforms(vec![PlatformRecord {
            vendor: HOST_VENDOR.to_owned(),
            name: HOST_PLATFORM.to_owned(),
            devices,
        }])
    }

    /// Emulate an arbitrary platform layout.
    pub fn with_platforms(platforms: Vec<PlatformRecord>) -> Self {
        Self { platforms }
    }

    /// Read the layout from `CLFLOPS_HOST_DEVICES` / `CLFLOPS_HOST_COMPUTE_UNITS`.
    ///
    /// # Errors
    ///
    /// [`BenchError::InvalidArgument`] when a variable is set but not a
    /// non-negative integer.
    pub fn from_env() -> Result<Self> {
        let devices = env_usize(HOST_DEVICES_ENV)?.unwrap_or(1);
        let units = match env_usize(HOST_COMPUTE_UNITS_ENV)? {
            Some(units) => u32::try_from(units).map_err(|_| {
                BenchError::InvalidArgument(format!("{HOST_COMPUTE_UNITS_ENV}={units} is too large"))
            })?,
            None => host_parallelism(),
        };
        Ok(Self::new(devices, units))
    }

    fn owns(&self, device: &Device) -> bool {
        self.platforms
            .get(device.platform_index)
            .and_then(|p| p.devices.get(device.ordinal))
            .is_some_and(|d| d.name == device.name)
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new(1, host_parallelism())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().map(Some).map_err(|e| {
            BenchError::InvalidArgument(format!("invalid environment override {key}={val}: {e}"))
        }),
        Err(_) => Ok(None),
    }
}

fn host_parallelism() -> u32 {
    std::thread::available_parallelism().map_or(1, |n| u32::try_from(n.get()).unwrap_or(u32::MAX))
}

/// Program "compiled" for one host device.
#[derive(Debug, Clone)]
pub struct HostProgram {
    device: Device,
}

impl HostProgram {
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Device memory of a host device.
#[derive(Debug, Clone)]
pub struct HostBuffer {
    data: Arc<Mutex<Vec<f32>>>,
}

impl HostBuffer {
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-flight host dispatch.
#[derive(Debug)]
pub struct HostPending {
    handle: JoinHandle<()>,
}

impl PendingDispatch for HostPending {
    fn wait(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| BenchError::runtime("host dispatch", "work item panicked"))
    }
}

impl ComputeBackend for HostBackend {
    type Program = HostProgram;
    type Buffer = HostBuffer;
    type Pending = HostPending;

    fn name(&self) -> &'static str {
        "host"
    }

    fn platforms(&self) -> Result<Vec<PlatformRecord>> {
        Ok(self.platforms.clone())
    }

    fn build(&self, device: &Device, _source: &str) -> Result<HostProgram> {
        if !self.owns(device) {
            return Err(BenchError::InvalidArgument(format!(
                "device '{}' is not part of the host platform",
                device.name
            )));
        }
        Ok(HostProgram { device: device.clone() })
    }

    fn upload(&self, _program: &HostProgram, data: &[f32]) -> Result<HostBuffer> {
        Ok(HostBuffer { data: Arc::new(Mutex::new(data.to_vec())) })
    }

    fn download(&self, _program: &HostProgram, buffer: &HostBuffer, count: usize) -> Result<Vec<f32>> {
        let data = buffer.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.get(..count).map(<[f32]>::to_vec).ok_or_else(|| {
            BenchError::InvalidArgument(format!(
                "read of {count} elements from a {}-element buffer",
                data.len()
            ))
        })
    }

    fn bind(&self, _program: &HostProgram, buffer: &HostBuffer, launch: &Launch) -> Result<()> {
        check_launch(buffer.len(), launch)
    }

    fn submit(
        &self,
        program: &HostProgram,
        buffer: &mut HostBuffer,
        launch: &Launch,
    ) -> Result<HostPending> {
        check_launch(buffer.len(), launch)?;

        debug!(
            "Host dispatch {} on '{}' ({} items)",
            launch.strategy.kernel_name(),
            program.device.name,
            launch.global_size
        );
        let data = Arc::clone(&buffer.data);
        let launch = launch.clone();
        let handle = thread::Builder::new()
            .name("clflops-host-dispatch".into())
            .spawn(move || {
                let mut data = data.lock().unwrap_or_else(PoisonError::into_inner);
                execute(&mut data, &launch);
            })
            .map_err(|e| BenchError::runtime("host dispatch spawn", e))?;
        Ok(HostPending { handle })
    }
}

fn check_launch(len: usize, launch: &Launch) -> Result<()> {
    let touched = match launch.strategy {
        Strategy::Range => launch.total_elements,
        Strategy::Element => launch.global_size,
    };
    if touched > len || launch.global_size == 0 {
        return Err(BenchError::InvalidArgument(format!(
            "{} launch of {} items over {} elements exceeds a {len}-element buffer",
            launch.strategy.kernel_name(),
            launch.global_size,
            launch.total_elements
        )));
    }
    Ok(())
}

fn execute(data: &mut [f32], launch: &Launch) {
    match launch.strategy {
        Strategy::Range => range_op(&mut data[..launch.total_elements], launch.global_size),
        Strategy::Element => element_op(&mut data[..launch.global_size]),
    }
}

/// Host `range_op`: each unit transforms its contiguous chunk.
///
/// Units past the element count would own only empty slices, so at most
/// `total` units are emulated; every element still gets transformed once.
fn range_op(data: &mut [f32], units: usize) {
    let total = data.len();
    let units = units.clamp(1, total.max(1));
    let mut rest = data;
    let mut chunks = Vec::with_capacity(units);
    for bounds in partition(units, total) {
        let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(bounds.len());
        chunks.push(chunk);
        rest = tail;
    }
    chunks.into_par_iter().for_each(|chunk| {
        for x in chunk.iter_mut() {
            *x = reference_transform(*x);
        }
    });
}

/// Host `element_op`: one work item per element.
fn element_op(data: &mut [f32]) {
    data.par_iter_mut().for_each(|x| *x = reference_transform(*x));
}
