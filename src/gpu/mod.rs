// gpu/mod.rs — wgpu compute backend.
//
// Mirrors the CPU schedulers in `crate::schedule` with one workgroup per tile
// instead of one thread per tile. The CPU side stays authoritative: every GPU
// pass is validated against `predict::predict_sequential` byte for byte.
//
//   device.rs     adapter selection, dispatch limits, workgroup size
//   plane.rs      the plane as a packed storage buffer; upload / readback
//   wavefront.rs  host-barrier and device-resident passes

pub mod device;
pub mod plane;
pub mod wavefront;

pub use device::{GpuDevice, GpuError, WorkgroupSize};
pub use plane::GpuPlane;
pub use wavefront::GpuWavefront;
