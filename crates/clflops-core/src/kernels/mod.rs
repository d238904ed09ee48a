//! Embedded kernel sources and their host reference.
//!
//! The OpenCL C source is compiled at runtime by the driver. The host
//! reference backend and the verifier share [`reference_transform`] so all
//! three agree on the element-wise operation.

/// `vectorops.cl`: `range_op(buffer, size)` and `element_op(buffer)`.
pub const VECTOROPS_SRC: &str = include_str!("vectorops.cl");

/// Floating-point operations per element performed by both entry points.
pub const VECTOROPS_OPS_PER_ELEMENT: u32 = 1;

/// The element-wise transform both entry points apply.
#[inline]
pub fn reference_transform(x: f32) -> f32 {
    x.sqrt()
}
