// plane.rs — The 8-bit prediction plane, owned and shared forms.
//
// `Plane` is the plain owned buffer: W×H bytes, row-major, index row*W + col,
// no stride padding. It is what callers build, compare and keep.
//
// `SharedPlane` is the same bytes while a pass is running. Many execution
// units write into it at once, each into its own tile, and read neighbouring
// tiles that other units finished earlier. A `&mut [u8]` cannot be handed to
// several threads, so every byte is an `AtomicU8` accessed
// with `Relaxed` ordering. The ordering that makes a neighbour's pixels
// visible comes from elsewhere:
//
//   host-barrier    — the thread join at the end of each wave
//   device-resident — the release store / acquire load on the tile's
//                     completion flag (see completion.rs)
//
// Relaxed atomic byte loads/stores compile to ordinary moves on x86 and ARM,
// so this costs nothing over a raw pointer and needs no `unsafe`.
//
// NEW RUST CONCEPTS
// ─────────────────
// - `Box<[AtomicU8]>` — a fixed-size heap slice; unlike `Vec` it cannot grow,
//   which is exactly the contract of a plane for the duration of a pass.
// - `AtomicU8::into_inner` — consumes the atomic and yields the plain value;
//   used when the pass is over and the plane goes back to single ownership.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// An owned W×H byte plane.
#[derive(Clone, PartialEq, Eq)]
pub struct Plane {
    data: Vec<u8>,
    width: usize,
    height: usize,
}

impl Plane {
    /// Zero-filled plane.
    pub fn new(width: usize, height: usize) -> Self {
        Plane { data: vec![0u8; width * height], width, height }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Plane { data, width, height }
    }

    /// Deterministic residual content for tests and benchmarks: a mix of a
    /// diagonal ramp and a multiplicative hash so that neighbouring tiles
    /// never look alike.
    pub fn residual_pattern(width: usize, height: usize, seed: u32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let h = (x as u32)
                    .wrapping_mul(0x9E37_79B1)
                    .wrapping_add((y as u32).wrapping_mul(0x85EB_CA77))
                    .wrapping_add(seed.wrapping_mul(0xC2B2_AE3D));
                let ramp = (x + 3 * y) as u32;
                data.push(((h >> 24) ^ ramp) as u8);
            }
        }
        Plane { data, width, height }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel at column `x`, row `y`.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        assert!(x < self.width && y < self.height, "({x},{y}) out of bounds");
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        assert!(x < self.width && y < self.height, "({x},{y}) out of bounds");
        self.data[y * self.width + x] = value;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// First pixel where `self` and `other` differ, as (x, y, self, other).
    pub fn first_mismatch(&self, other: &Plane) -> Option<(usize, usize, u8, u8)> {
        assert_eq!(
            (self.width, self.height),
            (other.width, other.height),
            "plane dimensions differ"
        );
        self.data
            .iter()
            .zip(&other.data)
            .position(|(a, b)| a != b)
            .map(|i| (i % self.width, i / self.width, self.data[i], other.data[i]))
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Plane({}×{})", self.width, self.height)
    }
}

/// A plane shared by concurrently running execution units.
pub struct SharedPlane {
    data: Box<[AtomicU8]>,
    width: usize,
    height: usize,
}

impl SharedPlane {
    pub fn new(width: usize, height: usize) -> Self {
        let data = (0..width * height).map(|_| AtomicU8::new(0)).collect();
        SharedPlane { data, width, height }
    }

    pub fn from_plane(plane: Plane) -> Self {
        let Plane { data, width, height } = plane;
        let data = data.into_iter().map(AtomicU8::new).collect();
        SharedPlane { data, width, height }
    }

    /// Overwrite every pixel from `src`. Requires exclusive access, so no
    /// pass can be reading while the plane is restored.
    pub fn load_from(&mut self, src: &Plane) {
        assert_eq!((self.width, self.height), (src.width, src.height));
        for (dst, &v) in self.data.iter_mut().zip(&src.data) {
            *dst.get_mut() = v;
        }
    }

    /// Copy the current contents out. Exclusive access guarantees every
    /// writer has finished.
    pub fn snapshot(&mut self) -> Plane {
        let data = self.data.iter_mut().map(|v| *v.get_mut()).collect();
        Plane { data, width: self.width, height: self.height }
    }

    pub fn into_plane(self) -> Plane {
        let data = self.data.into_vec().into_iter().map(AtomicU8::into_inner).collect();
        Plane { data, width: self.width, height: self.height }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn load(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store(&self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x].store(value, Ordering::Relaxed);
    }
}

impl fmt::Debug for SharedPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedPlane({}×{})", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_layout() {
        let p = Plane::from_vec(3, 2, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(p.get(0, 0), 10);
        assert_eq!(p.get(2, 0), 30);
        assert_eq!(p.get(0, 1), 40);
        assert_eq!(p.get(2, 1), 60);
    }

    #[test]
    #[should_panic]
    fn test_from_vec_wrong_len() {
        let _ = Plane::from_vec(3, 2, vec![0; 5]);
    }

    #[test]
    fn test_shared_round_trip() {
        let src = Plane::residual_pattern(32, 16, 1);
        let mut shared = SharedPlane::from_plane(src.clone());
        assert_eq!(shared.load(5, 7), src.get(5, 7));

        shared.store(5, 7, src.get(5, 7).wrapping_add(1));
        let snap = shared.snapshot();
        assert_eq!(snap.first_mismatch(&src).map(|m| (m.0, m.1)), Some((5, 7)));

        shared.load_from(&src);
        assert_eq!(shared.into_plane(), src);
    }

    #[test]
    fn test_pattern_is_deterministic_and_seeded() {
        let a = Plane::residual_pattern(64, 64, 3);
        let b = Plane::residual_pattern(64, 64, 3);
        let c = Plane::residual_pattern(64, 64, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
