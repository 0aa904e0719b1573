// gpu/wavefront.rs — Both scheduling strategies as wgpu compute passes.
//
// HOST BARRIER
// ────────────
//   for each non-empty wave w:
//       write params (wave, offset_y, count)      ← the kernel arguments
//       submit one dispatch of `count` workgroups
//       device.poll(Wait)                         ← the barrier
//
// `wave_count` submits per pass. Waiting for the queue to drain is the only
// cross-workgroup synchronisation; within a wave the tiles are independent.
//
// DEVICE RESIDENT
// ───────────────
//   clear_buffer(flags), clear_buffer(status)     ← reset, ordered before
//   one dispatch of `tiles` workgroups               the dispatch
//   poll(Wait), read back status
//
// Workgroup i takes tile order[i] and spins on its neighbours' flags. WGSL
// guarantees nothing about which workgroups are resident at the same time,
// so a spin can starve. Every spin is capped at `spin_limit` iterations; a
// workgroup that runs out records itself in the status buffer and skips its
// tile, and the host turns that into `PredError::LivenessTimeout`.
//
// WGSL has no device-scope release/acquire. Pixel words and flags are both
// atomics and the producer runs `storageBarrier()` between its last pixel
// store and its flag store; that is the strongest ordering the language
// offers, and the GPU equivalence tests check the result against the CPU
// reference.

use std::sync::Arc;

use tracing::{debug, trace, warn};
use wgpu::util::DeviceExt;

use crate::completion::WaitLimit;
use crate::error::PredError;
use crate::gpu::device::GpuDevice;
use crate::gpu::plane::{read_buffer, GpuPlane};
use crate::grid::TileGrid;
use crate::schedule::device_resident::validate_permutation;
use crate::schedule::{DispatchHint, Strategy};
use crate::wave::WaveOrder;

/// Rough spin iterations per millisecond of `WaitLimit::Timeout`. Shaders
/// have no clock, so the timeout is converted into an iteration budget.
const SPINS_PER_MS: u64 = 4_000;

/// Bytes of the status buffer: [gave_up, 1 + tile].
const STATUS_BYTES: u64 = 8;

// ---------------------------------------------------------------------------
// Uniform params (must match WGSL struct Params exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    tile_w:     u32,
    tile_h:     u32,
    block:      u32,
    row_words:  u32,
    wave:       u32,
    offset_y:   u32,
    count:      u32,
    spin_limit: u32,
}

// ---------------------------------------------------------------------------
// GpuWavefront
// ---------------------------------------------------------------------------

/// Wavefront prediction pipelines bound to one grid.
///
/// Create once; call [`run_pass`](Self::run_pass) per pass. The flags,
/// dispatch table and status buffers are reused across passes.
pub struct GpuWavefront {
    grid: TileGrid,
    order: Arc<WaveOrder>,
    limit: WaitLimit,
    hint: DispatchHint,

    wave_pipeline:     wgpu::ComputePipeline,
    resident_pipeline: wgpu::ComputePipeline,
    bgl:               wgpu::BindGroupLayout,

    wave_params:     wgpu::Buffer,
    resident_params: wgpu::Buffer,
    flags:           wgpu::Buffer,
    slots:           wgpu::Buffer,
    status:          wgpu::Buffer,
}

impl GpuWavefront {
    /// Compile the kernel and allocate per-grid buffers. Defaults: wave-order
    /// dispatch table, unbounded waits.
    ///
    /// # Errors
    /// `Configuration` for a mismatched order or a block size that is not a
    /// multiple of 4, `Device` if the grid needs more workgroups than one
    /// dispatch allows, `Build` if the shader fails validation.
    pub fn new(gpu: &GpuDevice, grid: TileGrid, order: Arc<WaveOrder>) -> Result<Self, PredError> {
        if order.tile_w() != grid.tile_w() || order.tile_h() != grid.tile_h() {
            return Err(PredError::config(format!(
                "wave order for {}×{} tiles does not match grid {grid}",
                order.tile_w(),
                order.tile_h()
            )));
        }
        if grid.block() % 4 != 0 {
            return Err(PredError::config(format!(
                "block size {} must be a multiple of 4 on the gpu backend",
                grid.block()
            )));
        }
        let tiles = gpu.dispatch_size(grid.len())?;

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label:  Some("wavefront.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_source(gpu.workgroup_size.threads).into()),
        });

        // Bind group layout mirrors @group(0) in wavefront.wgsl.
        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuWavefront BGL"),
            entries: &[
                // 0 — plane (storage read_write, atomic words)
                storage_entry(0, false),
                // 1 — params (uniform)
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // 2 — completion flags
                storage_entry(2, false),
                // 3 — dispatch table (slot → tile)
                storage_entry(3, true),
                // 4 — status
                storage_entry(4, false),
            ],
        });

        let pipeline_layout =
            gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("GpuWavefront pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let make_pipeline = |entry_point: &str| {
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label:               Some(entry_point),
                layout:              Some(&pipeline_layout),
                module:              &shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache:               None,
            })
        };
        let wave_pipeline = make_pipeline("predict_wave");
        let resident_pipeline = make_pipeline("predict_resident");

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(PredError::Build(err.to_string()));
        }

        let params_buffer = |label| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: std::mem::size_of::<Params>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let wave_params = params_buffer("GpuWavefront wave params");
        let resident_params = params_buffer("GpuWavefront resident params");

        let flags = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuWavefront flags"),
            size: tiles as u64 * 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let hint = DispatchHint::Waves;
        let slots = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuWavefront dispatch table"),
            contents: bytemuck::cast_slice(&hint.table(&order)),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });
        let status = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuWavefront status"),
            size: STATUS_BYTES,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        debug!(%grid, workgroup = %gpu.workgroup_size, "wavefront pipelines built");

        Ok(GpuWavefront {
            grid,
            order,
            limit: WaitLimit::Unbounded,
            hint,
            wave_pipeline,
            resident_pipeline,
            bgl,
            wave_params,
            resident_params,
            flags,
            slots,
            status,
        })
    }

    /// Bound every neighbour spin of the device-resident pass.
    pub fn with_wait_limit(mut self, limit: WaitLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Replace the dispatch table.
    ///
    /// # Errors
    /// `Configuration` if a custom order is not a permutation of the tiles.
    pub fn with_hint(mut self, gpu: &GpuDevice, hint: DispatchHint) -> Result<Self, PredError> {
        let table = hint.table(&self.order);
        validate_permutation(&table, self.grid.len())?;
        gpu.queue.write_buffer(&self.slots, 0, bytemuck::cast_slice(&table));
        self.hint = hint;
        Ok(self)
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Predict every tile of `plane` in place with `strategy`.
    ///
    /// # Errors
    /// `Dispatch` on a wgpu validation error or failed readback,
    /// `LivenessTimeout` if a device-resident workgroup ran out of spins.
    pub fn run_pass(
        &self,
        gpu: &GpuDevice,
        strategy: Strategy,
        plane: &GpuPlane,
    ) -> Result<(), PredError> {
        self.check_plane(plane)?;
        match strategy {
            Strategy::HostBarrier => self.run_host_barrier(gpu, plane),
            Strategy::DeviceResident => self.run_device_resident(gpu, plane),
        }
    }

    fn run_host_barrier(&self, gpu: &GpuDevice, plane: &GpuPlane) -> Result<(), PredError> {
        let bind_group = self.bind_group(gpu, plane, &self.wave_params);
        let base = self.base_params(plane);

        let mut launches = 0usize;
        for &span in self.order.spans() {
            if span.is_empty() {
                continue;
            }
            let params = Params {
                wave: span.wave as u32,
                offset_y: span.offset_y as u32,
                count: span.len as u32,
                ..base
            };
            trace!(wave = span.wave, offset_y = span.offset_y, len = span.len, "launch wave");

            gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
            gpu.queue.write_buffer(&self.wave_params, 0, bytemuck::bytes_of(&params));
            let mut encoder = gpu.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor { label: Some("predict_wave") },
            );
            {
                let mut pass = encoder.begin_compute_pass(
                    &wgpu::ComputePassDescriptor { label: Some("predict_wave"), timestamp_writes: None },
                );
                pass.set_pipeline(&self.wave_pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(params.count, 1, 1);
            }
            gpu.queue.submit(std::iter::once(encoder.finish()));
            gpu.device.poll(wgpu::Maintain::Wait);
            check_scope(gpu, "predict_wave")?;
            launches += 1;
        }

        debug!(launches, tiles = self.grid.len(), "gpu host-barrier pass complete");
        Ok(())
    }

    fn run_device_resident(&self, gpu: &GpuDevice, plane: &GpuPlane) -> Result<(), PredError> {
        let params = Params {
            count: self.grid.len() as u32,
            spin_limit: spin_limit(self.limit),
            ..self.base_params(plane)
        };
        let bind_group = self.bind_group(gpu, plane, &self.resident_params);

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        gpu.queue.write_buffer(&self.resident_params, 0, bytemuck::bytes_of(&params));
        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("predict_resident") },
        );
        encoder.clear_buffer(&self.flags, 0, None);
        encoder.clear_buffer(&self.status, 0, None);
        {
            let mut pass = encoder.begin_compute_pass(
                &wgpu::ComputePassDescriptor { label: Some("predict_resident"), timestamp_writes: None },
            );
            pass.set_pipeline(&self.resident_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(params.count, 1, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.device.poll(wgpu::Maintain::Wait);
        check_scope(gpu, "predict_resident")?;

        let status = read_buffer(gpu, &self.status, STATUS_BYTES)?;
        let [gave_up, tile_plus_one]: [u32; 2] = bytemuck::try_pod_read_unaligned(&status)
            .map_err(|e| PredError::dispatch(format!("status readback: {e:?}")))?;
        if gave_up != 0 {
            let err = PredError::LivenessTimeout {
                tile: tile_plus_one.saturating_sub(1) as usize,
                limit: format!("{} spins", params.spin_limit),
            };
            warn!(%err, "gpu device-resident pass aborted");
            return Err(err);
        }

        debug!(
            tiles = params.count,
            spin_limit = params.spin_limit,
            hint = self.hint_kind(),
            "gpu device-resident pass complete"
        );
        Ok(())
    }

    fn check_plane(&self, plane: &GpuPlane) -> Result<(), PredError> {
        if (plane.width as usize, plane.height as usize) != (self.grid.width(), self.grid.height()) {
            return Err(PredError::config(format!(
                "plane is {}×{} but the grid covers {}×{}",
                plane.width,
                plane.height,
                self.grid.width(),
                self.grid.height()
            )));
        }
        Ok(())
    }

    fn base_params(&self, plane: &GpuPlane) -> Params {
        Params {
            tile_w: self.grid.tile_w() as u32,
            tile_h: self.grid.tile_h() as u32,
            block: self.grid.block() as u32,
            row_words: plane.row_words(),
            wave: 0,
            offset_y: 0,
            count: 0,
            spin_limit: 0,
        }
    }

    fn bind_group(
        &self,
        gpu: &GpuDevice,
        plane: &GpuPlane,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label:  Some("GpuWavefront BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: plane.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: self.flags.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: self.slots.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: self.status.as_entire_binding() },
            ],
        })
    }

    fn hint_kind(&self) -> &'static str {
        match self.hint {
            DispatchHint::Waves => "waves",
            DispatchHint::Native => "native",
            DispatchHint::Custom(_) => "custom",
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn shader_source(threads: u32) -> String {
    include_str!("../shaders/wavefront.wgsl").replace("{{WG}}", &threads.to_string())
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Pop a validation scope pushed before a submit.
fn check_scope(gpu: &GpuDevice, what: &str) -> Result<(), PredError> {
    match pollster::block_on(gpu.device.pop_error_scope()) {
        Some(err) => Err(PredError::dispatch(format!("{what}: {err}"))),
        None => Ok(()),
    }
}

/// Iteration budget for one neighbour spin.
fn spin_limit(limit: WaitLimit) -> u32 {
    match limit {
        WaitLimit::Unbounded => u32::MAX,
        WaitLimit::Timeout(d) => {
            let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
            ms.saturating_mul(SPINS_PER_MS).clamp(1, u32::MAX as u64) as u32
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
