// gpu/plane.rs — The prediction plane resident on the GPU.
//
// LAYOUT
// ──────
// The plane lives in one STORAGE buffer declared in WGSL as
// `array<atomic<u32>>`: four pixels per word, little-endian, so pixel
// (x, y) is byte (x & 3) of word (y * W + x) / 4. WGSL has no 8-bit storage
// type, and atomics are what let one workgroup read a neighbour tile that
// another workgroup wrote during the same dispatch.
//
// Little-endian packing means the CPU byte buffer *is* the word buffer, so
// upload and readback are plain byte copies with no repacking. The only
// requirement is W % 4 == 0 (which B % 4 == 0 guarantees).
//
// Unlike a texture copy, buffer copies have no 256-byte row alignment rule;
// only the total size must be a multiple of `COPY_BUFFER_ALIGNMENT` (4).

use wgpu::util::DeviceExt;

use crate::error::PredError;
use crate::gpu::device::GpuDevice;
use crate::plane::Plane;

/// A W×H byte plane in a GPU storage buffer.
pub struct GpuPlane {
    pub buffer: wgpu::Buffer,
    pub width: u32,
    pub height: u32,
}

impl GpuPlane {
    /// Upload `src` into a new storage buffer.
    ///
    /// # Errors
    /// `Configuration` if the width is not a multiple of 4 or the plane is
    /// empty.
    pub fn upload(gpu: &GpuDevice, src: &Plane) -> Result<Self, PredError> {
        let (width, height) = check_packable(src.width(), src.height())?;
        let buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuPlane"),
            contents: src.as_slice(),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });
        Ok(GpuPlane { buffer, width, height })
    }

    /// Overwrite the plane with `src` (same dimensions). Queued: takes
    /// effect before the next submitted pass.
    ///
    /// # Errors
    /// `Configuration` on a dimension mismatch.
    pub fn restore(&self, gpu: &GpuDevice, src: &Plane) -> Result<(), PredError> {
        if (src.width(), src.height()) != (self.width as usize, self.height as usize) {
            return Err(PredError::config(format!(
                "cannot restore a {}×{} plane into a {}×{} buffer",
                src.width(),
                src.height(),
                self.width,
                self.height
            )));
        }
        gpu.queue.write_buffer(&self.buffer, 0, src.as_slice());
        Ok(())
    }

    pub fn size_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Number of packed `u32` words per image row.
    pub fn row_words(&self) -> u32 {
        self.width / 4
    }

    /// Copy the plane back to the CPU. Blocks until the GPU is idle.
    ///
    /// # Errors
    /// `Dispatch` if the buffer cannot be mapped.
    pub fn readback(&self, gpu: &GpuDevice) -> Result<Plane, PredError> {
        let bytes = read_buffer(gpu, &self.buffer, self.size_bytes())?;
        Ok(Plane::from_vec(self.width as usize, self.height as usize, bytes))
    }
}

fn check_packable(width: usize, height: usize) -> Result<(u32, u32), PredError> {
    if width == 0 || height == 0 {
        return Err(PredError::config("cannot upload an empty plane"));
    }
    if width % 4 != 0 {
        return Err(PredError::config(format!(
            "plane width {width} is not a multiple of 4 pixels per word"
        )));
    }
    let w = u32::try_from(width).map_err(|_| PredError::config("plane too wide"))?;
    let h = u32::try_from(height).map_err(|_| PredError::config("plane too tall"))?;
    Ok((w, h))
}

/// Copy the first `size` bytes of `src` into a MAP_READ staging buffer and
/// return them.
///
/// `src` must have COPY_SRC usage. This is a synchronous stall; it belongs at
/// pass boundaries, never inside a pass.
pub(crate) fn read_buffer(
    gpu: &GpuDevice,
    src: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, PredError> {
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    // Map asynchronously, then poll until the callback fires.
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        // The receiver outlives the poll below.
        let _ = tx.send(result);
    });
    gpu.device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|_| PredError::dispatch("readback map callback never fired"))?
        .map_err(|e| PredError::dispatch(format!("readback map failed: {e}")))?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing_is_little_endian_bytes() {
        // Pixel (x, y) must be byte (x & 3) of word (y * W + x) / 4; the
        // shader's extraction applied to the CPU byte order.
        let plane = Plane::residual_pattern(8, 2, 5);
        let words: Vec<u32> = plane
            .as_slice()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let row_words = 8 / 4;
        for y in 0..2 {
            for x in 0..8 {
                let word = words[y * row_words + x / 4];
                let px = (word >> ((x & 3) * 8)) & 0xff;
                assert_eq!(px as u8, plane.get(x, y), "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_rejects_unpackable_width() {
        assert!(check_packable(6, 4).is_err());
        assert!(check_packable(0, 4).is_err());
        assert_eq!(check_packable(8, 3).unwrap(), (8, 3));
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_upload_round_trip() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let src = Plane::residual_pattern(64, 48, 1);
        let plane = GpuPlane::upload(&gpu, &src).unwrap();
        assert_eq!(plane.row_words(), 16);
        assert_eq!(plane.readback(&gpu).unwrap(), src);

        let other = Plane::residual_pattern(64, 48, 2);
        plane.restore(&gpu, &other).unwrap();
        assert_eq!(plane.readback(&gpu).unwrap(), other);
    }
}
