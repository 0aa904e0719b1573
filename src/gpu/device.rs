// gpu/device.rs — Vulkan device, queue and the workgroup size of the kernels.
//
// ADAPTER CHOICE
// ──────────────
// On WSL2 the software rasteriser (llvmpipe) shows up as an ordinary Vulkan
// adapter and `request_adapter` happily returns it. Adapters are therefore
// enumerated by hand: the first one that is not `DeviceType::Cpu` wins, and a
// CPU adapter is used only when nothing else exists.
//
// LIMITS THAT MATTER HERE
// ───────────────────────
//   max_compute_workgroups_per_dimension   every dispatch is 1D with one
//                                          workgroup per tile, so a launch
//                                          may hold at most this many tiles
//   max_compute_invocations_per_workgroup  upper bound for `--workgroup`
//
// The device is requested with `wgpu::Limits::default()`, and the same value
// is kept on `GpuDevice` so both checks run without touching the driver.
//
// NEW RUST CONCEPTS
// - `pollster::block_on` — drives wgpu's async adapter/device requests to
//   completion on the calling thread.
// - `#[from]` (thiserror) — `?` on a `RequestDeviceError` lifts it into
//   `GpuError::DeviceRequest` with no explicit `map_err`.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

/// Default threads per workgroup: one AMD wavefront, two NVIDIA warps. A
/// 16×16 tile is exactly 64 packed words, one per thread.
pub const DEFAULT_WORKGROUP: u32 = 64;

/// Threads per workgroup in both wavefront entry points. Substituted into
/// the shader as `{{WG}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub threads: u32,
}

impl Default for WorkgroupSize {
    fn default() -> Self {
        WorkgroupSize { threads: DEFAULT_WORKGROUP }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} threads", self.threads)
    }
}

/// What the chosen adapter reported about itself.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// One Vulkan device and its queue, shared by every GPU pass of a run.
///
/// Fields drop top to bottom. `_instance` comes last: dzn (WSL2's
/// D3D12-on-Vulkan layer) crashes when the instance dies before the device.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    limits: wgpu::Limits,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Open the best Vulkan adapter with the default workgroup size.
    ///
    /// # Errors
    /// `NoSuitableAdapter` if Vulkan lists nothing, `DeviceRequest` if the
    /// driver refuses the device.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::open())
    }

    async fn open() -> Result<Self, GpuError> {
        // Debug builds run wgpu's validation layer. dzn reports itself as
        // non-conformant, so it is only listed with the NONCOMPLIANT flag.
        let mut flags = wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER;
        if cfg!(debug_assertions) {
            flags |= wgpu::InstanceFlags::VALIDATION;
        }
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let mut adapters = instance.enumerate_adapters(wgpu::Backends::VULKAN);
        for a in &adapters {
            let info = a.get_info();
            debug!(name = %info.name, device_type = ?info.device_type, "vulkan adapter");
        }
        let pick = adapters
            .iter()
            .position(|a| a.get_info().device_type != wgpu::DeviceType::Cpu)
            .unwrap_or(0);
        if pick >= adapters.len() {
            return Err(GpuError::NoSuitableAdapter);
        }
        let adapter = adapters.swap_remove(pick);

        let raw = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw.name,
            device_type: raw.device_type,
            backend: raw.backend,
        };

        let limits = wgpu::Limits::default();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("wavepred"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        let gpu = GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: WorkgroupSize::default(),
            limits,
            _instance: instance,
        };
        info!(%gpu, "gpu device ready");
        Ok(gpu)
    }

    /// Use `threads` per workgroup in kernels built after this call.
    ///
    /// # Errors
    /// `WorkgroupNotPowerOfTwo` or `WorkgroupTooLarge`.
    pub fn set_workgroup_size(&mut self, threads: u32) -> Result<(), GpuError> {
        self.workgroup_size = validate_workgroup_size(&self.limits, threads)?;
        debug!(workgroup = %self.workgroup_size, "workgroup size set");
        Ok(())
    }

    /// Workgroup count for a 1D dispatch covering `tiles` tiles.
    ///
    /// # Errors
    /// `DispatchTooLarge` past the per-dimension limit.
    pub fn dispatch_size(&self, tiles: usize) -> Result<u32, GpuError> {
        dispatch_size_for(&self.limits, tiles)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, workgroup: {} }}",
            self.adapter_info, self.workgroup_size
        )
    }
}

// ============================================================
// Limit checks
// ============================================================

fn validate_workgroup_size(
    limits: &wgpu::Limits,
    threads: u32,
) -> Result<WorkgroupSize, GpuError> {
    if !threads.is_power_of_two() {
        return Err(GpuError::WorkgroupNotPowerOfTwo(threads));
    }
    let max = limits
        .max_compute_invocations_per_workgroup
        .min(limits.max_compute_workgroup_size_x);
    if threads > max {
        return Err(GpuError::WorkgroupTooLarge { total: threads, max });
    }
    Ok(WorkgroupSize { threads })
}

fn dispatch_size_for(limits: &wgpu::Limits, tiles: usize) -> Result<u32, GpuError> {
    let max = limits.max_compute_workgroups_per_dimension;
    match u32::try_from(tiles) {
        Ok(groups) if groups <= max => Ok(groups),
        _ => Err(GpuError::DispatchTooLarge { groups: tiles, max }),
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from opening the device or sizing work for it.
#[derive(Debug, Error)]
pub enum GpuError {
    /// Vulkan lists no adapter at all.
    #[error(
        "no suitable Vulkan adapter found. \
         On WSL2: ensure Vulkan is installed and `vulkaninfo` lists a real GPU."
    )]
    NoSuitableAdapter,

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("workgroup size {total} exceeds the device limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },

    #[error("workgroup size {0} is not a power of two")]
    WorkgroupNotPowerOfTwo(u32),

    /// A launch needs more workgroups than one dispatch dimension allows.
    #[error("{groups} workgroups exceed the per-dimension dispatch limit of {max}")]
    DispatchTooLarge { groups: usize, max: u32 },
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    // GPU-backed tests are `#[ignore]`d; run them with
    //   cargo test -- --include-ignored

    #[test]
    fn test_default_workgroup_covers_a_16x16_tile() {
        let ws = WorkgroupSize::default();
        assert_eq!(ws.threads, 16 * 16 / 4);
        assert!(ws.threads.is_power_of_two());
    }

    #[test]
    fn test_validate_workgroup_size() {
        let limits = wgpu::Limits::default();
        assert_eq!(
            validate_workgroup_size(&limits, 16).unwrap(),
            WorkgroupSize { threads: 16 }
        );
        assert_eq!(validate_workgroup_size(&limits, 256).unwrap().threads, 256);
        assert!(matches!(
            validate_workgroup_size(&limits, 512),
            Err(GpuError::WorkgroupTooLarge { total: 512, max: 256 })
        ));
        assert!(matches!(
            validate_workgroup_size(&limits, 48),
            Err(GpuError::WorkgroupNotPowerOfTwo(48))
        ));
        assert!(matches!(
            validate_workgroup_size(&limits, 0),
            Err(GpuError::WorkgroupNotPowerOfTwo(0))
        ));
    }

    #[test]
    fn test_dispatch_size_limit() {
        let limits = wgpu::Limits::default();
        // Default 1024×2048 plane in 16×16 tiles.
        assert_eq!(dispatch_size_for(&limits, 64 * 128).unwrap(), 8192);
        assert_eq!(dispatch_size_for(&limits, 65_535).unwrap(), 65_535);
        assert!(matches!(
            dispatch_size_for(&limits, 65_536),
            Err(GpuError::DispatchTooLarge { groups: 65_536, max: 65_535 })
        ));
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_device_workgroup_override() {
        let mut gpu = GpuDevice::new().expect("need Vulkan GPU");
        assert_eq!(gpu.workgroup_size, WorkgroupSize::default());
        gpu.set_workgroup_size(16).unwrap();
        assert_eq!(gpu.workgroup_size.threads, 16);
        assert!(gpu.set_workgroup_size(24).is_err());
        assert_eq!(gpu.workgroup_size.threads, 16);
    }
}
