//! Device enumeration and selection.
//!
//! Platforms and devices are plain records. A backend reports one
//! [`PlatformRecord`] per platform; [`enumerate`] flattens them into a single
//! zero-indexed sequence, platform-major and device-minor.

use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::backend::ComputeBackend;
use crate::error::{BenchError, Result};

/// One device as reported under its platform, before flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Device name (e.g. "gfx1030", "Intel(R) Arc(TM) A770 Graphics").
    pub name: String,
    /// Maximum parallel compute units.
    pub max_compute_units: u32,
}

/// One platform and the devices it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRecord {
    /// Platform vendor string.
    pub vendor: String,
    /// Platform name string.
    pub name: String,
    /// Devices in the order the platform reports them.
    pub devices: Vec<DeviceRecord>,
}

/// An addressable compute device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Position in the flattened enumeration.
    pub index: usize,
    /// Position of the owning platform.
    pub platform_index: usize,
    /// Position of the device within its platform.
    pub ordinal: usize,
    /// Vendor of the owning platform.
    pub platform_vendor: String,
    /// Name of the owning platform.
    pub platform_name: String,
    /// Device name.
    pub name: String,
    /// Maximum parallel compute units.
    pub max_compute_units: u32,
}

/// Query every platform and flatten their devices into one sequence.
///
/// # Errors
///
/// [`BenchError::NoPlatform`] when the backend reports no platform at all.
pub fn enumerate<B: ComputeBackend>(backend: &B) -> Result<Vec<Device>> {
    let platforms = backend.platforms()?;
    if platforms.is_empty() {
        return Err(BenchError::NoPlatform);
    }
    Ok(flatten(platforms))
}

/// Flatten platform records into indexed devices.
pub fn flatten(platforms: Vec<PlatformRecord>) -> Vec<Device> {
    let mut devices = Vec::new();
    for (platform_index, platform) in platforms.into_iter().enumerate() {
        debug!(
            "Scanning platform {}: {} {} ({} devices)",
            platform_index,
            platform.vendor,
            platform.name,
            platform.devices.len()
        );
        for (ordinal, record) in platform.devices.into_iter().enumerate() {
            devices.push(Device {
                index: devices.len(),
                platform_index,
                ordinal,
                platform_vendor: platform.vendor.clone(),
                platform_name: platform.name.clone(),
                name: record.name,
                max_compute_units: record.max_compute_units,
            });
        }
    }
    devices
}

/// Render the grouped device listing.
///
/// One `"<vendor> <platform>:"` header per platform, then `"[i] <device>"`.
pub fn describe(devices: &[Device]) -> String {
    let mut out = String::new();
    let mut current = None;
    for device in devices {
        if current != Some(device.platform_index) {
            current = Some(device.platform_index);
            let _ = writeln!(out, "{} {}:", device.platform_vendor, device.platform_name);
        }
        let _ = writeln!(out, "[{}] {}", device.index, device.name);
    }
    out
}

/// Resolve the devices to benchmark.
///
/// # Errors
///
/// [`BenchError::NoSuchDevice`] when `selected` is out of range.
pub fn resolve_targets(devices: &[Device], selected: Option<usize>) -> Result<Vec<&Device>> {
    match selected {
        Some(index) => devices
            .get(index)
            .map(|d| vec![d])
            .ok_or(BenchError::NoSuchDevice { index, available: devices.len() }),
        None => Ok(devices.iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_platforms() -> Vec<PlatformRecord> {
        vec![
            PlatformRecord {
                vendor: "Advanced Micro Devices, Inc.".into(),
                name: "AMD Accelerated Parallel Processing".into(),
                devices: vec![
                    DeviceRecord { name: "gfx1030".into(), max_compute_units: 40 },
                    DeviceRecord { name: "Ryzen 9 5900X".into(), max_compute_units: 24 },
                ],
            },
            PlatformRecord {
                vendor: "Intel(R) Corporation".into(),
                name: "Intel(R) OpenCL Graphics".into(),
                devices: vec![DeviceRecord { name: "Arc A770".into(), max_compute_units: 32 }],
            },
        ]
    }

    #[test]
    fn flatten_is_platform_major() {
        let devices = flatten(two_platforms());
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["gfx1030", "Ryzen 9 5900X", "Arc A770"]);
        assert_eq!(devices[2].index, 2);
        assert_eq!(devices[2].platform_index, 1);
        assert_eq!(devices[2].ordinal, 0);
    }

    #[test]
    fn flatten_empty_platform_contributes_nothing() {
        let mut platforms = two_platforms();
        platforms.insert(
            0,
            PlatformRecord { vendor: "Mesa".into(), name: "Clover".into(), devices: vec![] },
        );
        let devices = flatten(platforms);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].platform_index, 1);
    }

    #[test]
    fn describe_groups_by_platform() {
        let listing = describe(&flatten(two_platforms()));
        let expected = "Advanced Micro Devices, Inc. AMD Accelerated Parallel Processing:\n\
                        [0] gfx1030\n\
                        [1] Ryzen 9 5900X\n\
                        Intel(R) Corporation Intel(R) OpenCL Graphics:\n\
                        [2] Arc A770\n";
        assert_eq!(listing, expected);
    }

    #[test]
    fn resolve_all_when_unselected() {
        let devices = flatten(two_platforms());
        assert_eq!(resolve_targets(&devices, None).unwrap().len(), 3);
    }

    #[test]
    fn resolve_single_index() {
        let devices = flatten(two_platforms());
        let targets = resolve_targets(&devices, Some(1)).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "Ryzen 9 5900X");
    }

    #[test]
    fn resolve_out_of_range() {
        let devices = flatten(two_platforms());
        let err = resolve_targets(&devices, Some(3)).unwrap_err();
        assert!(matches!(err, BenchError::NoSuchDevice { index: 3, available: 3 }));
    }
}
