//! OpenCL backend via the `opencl3` crate.
//!
//! Devices of every type (`CL_DEVICE_TYPE_ALL`) are reported. A program owns
//! its own context, in-order command queue and both entry-point kernels;
//! transfers are blocking and the kernel launch returns the event the host
//! waits on.

use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{Device as ClDevice, CL_DEVICE_TYPE_ALL};
use opencl3::event::Event;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, ClMem, CL_MEM_READ_WRITE};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_float, cl_uint, CL_BLOCKING};
use tracing::debug;

use super::{ComputeBackend, PendingDispatch};
use crate::device::{Device, DeviceRecord, PlatformRecord};
use crate::dispatch::{Launch, Strategy};
use crate::error::{BenchError, Result};

/// Backend over the system's OpenCL ICD loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClBackend;

impl OpenClBackend {
    pub fn new() -> Self {
        Self
    }

    fn native_platforms() -> Result<Vec<Platform>> {
        // The ICD loader reports CL_PLATFORM_NOT_FOUND_KHR when nothing is installed.
        get_platforms().map_err(|e| {
            debug!("clGetPlatformIDs failed: {}", e);
            BenchError::NoPlatform
        })
    }

    fn resolve(device: &Device) -> Result<ClDevice> {
        let platforms = Self::native_platforms()?;
        let platform = platforms.get(device.platform_index).ok_or_else(|| {
            BenchError::InvalidArgument(format!("platform {} vanished", device.platform_index))
        })?;
        let ids = platform
            .get_devices(CL_DEVICE_TYPE_ALL)
            .map_err(|e| BenchError::runtime("clGetDeviceIDs", e))?;
        ids.get(device.ordinal).map(|&id| ClDevice::new(id)).ok_or_else(|| {
            BenchError::InvalidArgument(format!(
                "device {} of platform {} vanished",
                device.ordinal, device.platform_index
            ))
        })
    }
}

/// Program, context, queue and kernels bound to one OpenCL device.
pub struct OpenClProgram {
    device_name: String,
    context: Context,
    queue: CommandQueue,
    range_kernel: Kernel,
    element_kernel: Kernel,
    // Released after the kernels.
    _program: Program,
}

impl OpenClProgram {
    fn kernel(&self, strategy: Strategy) -> &Kernel {
        match strategy {
            Strategy::Range => &self.range_kernel,
            Strategy::Element => &self.element_kernel,
        }
    }
}

impl std::fmt::Debug for OpenClProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClProgram").field("device", &self.device_name).finish()
    }
}

/// `cl_mem` of `f32` elements.
pub struct OpenClBuffer {
    buffer: Buffer<cl_float>,
    len: usize,
}

impl OpenClBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Launch event.
pub struct OpenClPending {
    event: Event,
}

impl PendingDispatch for OpenClPending {
    fn wait(self) -> Result<()> {
        self.event.wait().map_err(|e| BenchError::runtime("clWaitForEvents", e))
    }
}

impl ComputeBackend for OpenClBackend {
    type Program = OpenClProgram;
    type Buffer = OpenClBuffer;
    type Pending = OpenClPending;

    fn name(&self) -> &'static str {
        "opencl"
    }

    fn platforms(&self) -> Result<Vec<PlatformRecord>> {
        let platforms = Self::native_platforms()?;
        let mut records = Vec::with_capacity(platforms.len());
        for platform in platforms {
            let vendor = platform.vendor().unwrap_or_default();
            let name = platform.name().unwrap_or_default();
            debug!("Scanning OpenCL platform: {} {}", vendor, name);

            let devices = platform
                .get_devices(CL_DEVICE_TYPE_ALL)
                .unwrap_or_default()
                .into_iter()
                .map(|id| {
                    let device = ClDevice::new(id);
                    let record = DeviceRecord {
                        name: device.name().unwrap_or_default(),
                        max_compute_units: device.max_compute_units().unwrap_or(1),
                    };
                    debug!("Found device: {} ({} CUs)", record.name, record.max_compute_units);
                    record
                })
                .collect();
            records.push(PlatformRecord { vendor, name, devices });
        }
        Ok(records)
    }

    fn build(&self, device: &Device, source: &str) -> Result<OpenClProgram> {
        let cl_device = Self::resolve(device)?;
        let context = Context::from_device(&cl_device)
            .map_err(|e| BenchError::runtime("clCreateContext", e))?;
        let queue = CommandQueue::create_default_with_properties(&context, 0, 0)
            .map_err(|e| BenchError::runtime("clCreateCommandQueue", e))?;
        // On failure opencl3 returns the build log as the error string.
        let program = Program::create_and_build_from_source(&context, source, "")
            .map_err(|log| BenchError::Build { device: device.name.clone(), log })?;
        let create = |name: &str| {
            Kernel::create(&program, name).map_err(|e| BenchError::Build {
                device: device.name.clone(),
                log: format!("error: clCreateKernel({name}) failed: {e}"),
            })
        };
        let range_kernel = create(Strategy::Range.kernel_name())?;
        let element_kernel = create(Strategy::Element.kernel_name())?;
        Ok(OpenClProgram {
            device_name: device.name.clone(),
            context,
            queue,
            range_kernel,
            element_kernel,
            _program: program,
        })
    }

    fn upload(&self, program: &OpenClProgram, data: &[f32]) -> Result<OpenClBuffer> {
        let mut buffer = unsafe {
            Buffer::<cl_float>::create(&program.context, CL_MEM_READ_WRITE, data.len(), ptr::null_mut())
                .map_err(|e| BenchError::runtime("clCreateBuffer", e))?
        };
        unsafe {
            program
                .queue
                .enqueue_write_buffer(&mut buffer, CL_BLOCKING, 0, data, &[])
                .map_err(|e| BenchError::runtime("clEnqueueWriteBuffer", e))?;
        }
        Ok(OpenClBuffer { buffer, len: data.len() })
    }

    fn download(&self, program: &OpenClProgram, buffer: &OpenClBuffer, count: usize) -> Result<Vec<f32>> {
        if count > buffer.len {
            return Err(BenchError::InvalidArgument(format!(
                "read of {count} elements from a {}-element buffer",
                buffer.len
            )));
        }
        let mut out = vec![0.0_f32; count];
        if count == 0 {
            return Ok(out);
        }
        unsafe {
            program
                .queue
                .enqueue_read_buffer(&buffer.buffer, CL_BLOCKING, 0, &mut out, &[])
                .map_err(|e| BenchError::runtime("clEnqueueReadBuffer", e))?;
        }
        Ok(out)
    }

    fn bind(&self, program: &OpenClProgram, buffer: &OpenClBuffer, launch: &Launch) -> Result<()> {
        let touched = match launch.strategy {
            Strategy::Range => launch.total_elements,
            Strategy::Element => launch.global_size,
        };
        if touched > buffer.len {
            return Err(BenchError::InvalidArgument(format!(
                "{} launch over {touched} elements exceeds a {}-element buffer",
                launch.strategy.kernel_name(),
                buffer.len
            )));
        }

        let kernel = program.kernel(launch.strategy);
        unsafe {
            kernel
                .set_arg(0, &buffer.buffer.get())
                .map_err(|e| BenchError::runtime("clSetKernelArg", e))?;
            if launch.strategy == Strategy::Range {
                let size = cl_uint::try_from(launch.total_elements).map_err(|_| {
                    BenchError::InvalidArgument(format!(
                        "{} elements do not fit range_op's size argument",
                        launch.total_elements
                    ))
                })?;
                kernel.set_arg(1, &size).map_err(|e| BenchError::runtime("clSetKernelArg", e))?;
            }
        }
        Ok(())
    }

    fn submit(
        &self,
        program: &OpenClProgram,
        _buffer: &mut OpenClBuffer,
        launch: &Launch,
    ) -> Result<OpenClPending> {
        let global = [launch.global_size];
        let local = [launch.local_size];
        let event = unsafe {
            program
                .queue
                .enqueue_nd_range_kernel(
                    program.kernel(launch.strategy).get(),
                    1,
                    ptr::null(),
                    global.as_ptr(),
                    local.as_ptr(),
                    &[],
                )
                .map_err(|e| BenchError::runtime("clEnqueueNDRangeKernel", e))?
        };
        Ok(OpenClPending { event })
    }
}
