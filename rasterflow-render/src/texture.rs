//! Multidimensional typed texture store.
//!
//! A texture is a `width x height x depth` grid of one of 28 pixel formats:
//! the product of channel count {R, RG, RGB, RGBA} and element type
//! {u8, u16, u32, u64, f16, f32, f64}. Texels are tightly packed, row-major
//! then layer-major.
//!
//! Two access tiers:
//! - raw typed access (`texel`, `set_texel`, `row_ptr`) for hot paths that
//!   already know the format;
//! - format-dispatched normalized access (`read_vec4`, `write_vec4`,
//!   `sample_nearest`, `sample_bilinear`) keyed at runtime on
//!   `(channels, element)`, one dispatch instead of a per-format function
//!   grid.

use crate::buffer::RawBytes;
use crate::error::{RenderError, RenderResult};
use bytemuck::Pod;
use half::f16;
use rasterflow_core::Vec4;

/// Channel count of a pixel format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Channels {
    /// Single red channel.
    R = 1,
    /// Red, green.
    Rg = 2,
    /// Red, green, blue.
    Rgb = 3,
    /// Red, green, blue, alpha.
    Rgba = 4,
}

impl Channels {
    /// Number of channels.
    #[inline(always)]
    pub const fn count(self) -> usize {
        self as usize
    }
}

/// Element type of a pixel format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Elem {
    /// Unsigned 8-bit, normalized to `[0, 1]`.
    U8,
    /// Unsigned 16-bit, normalized to `[0, 1]`.
    U16,
    /// Unsigned 32-bit, normalized to `[0, 1]`.
    U32,
    /// Unsigned 64-bit, normalized to `[0, 1]`.
    U64,
    /// 16-bit float.
    F16,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl Elem {
    /// Size of one element in bytes.
    #[inline(always)]
    pub const fn size(self) -> usize {
        match self {
            Elem::U8 => 1,
            Elem::U16 => 2,
            Elem::U32 => 4,
            Elem::U64 => 8,
            Elem::F16 => 2,
            Elem::F32 => 4,
            Elem::F64 => 8,
        }
    }
}

/// A pixel format: channel count times element type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    /// Channel count.
    pub channels: Channels,
    /// Element type.
    pub elem: Elem,
}

impl PixelFormat {
    /// Single-channel f16, the compact depth format.
    pub const R_F16: Self = Self::new(Channels::R, Elem::F16);
    /// Single-channel f32, the common depth format.
    pub const R_F32: Self = Self::new(Channels::R, Elem::F32);
    /// Single-channel f64, the high-precision depth format.
    pub const R_F64: Self = Self::new(Channels::R, Elem::F64);
    /// 8-bit RGB.
    pub const RGB_U8: Self = Self::new(Channels::Rgb, Elem::U8);
    /// 8-bit RGBA, the window-buffer format.
    pub const RGBA_U8: Self = Self::new(Channels::Rgba, Elem::U8);
    /// Full-float RGBA.
    pub const RGBA_F32: Self = Self::new(Channels::Rgba, Elem::F32);

    /// Builds a format from its two axes.
    #[inline(always)]
    pub const fn new(channels: Channels, elem: Elem) -> Self {
        Self { channels, elem }
    }

    /// Size of one texel in bytes.
    #[inline(always)]
    pub const fn bytes_per_texel(self) -> usize {
        self.channels.count() * self.elem.size()
    }

    /// True for the single-channel float formats usable as depth.
    #[inline(always)]
    pub const fn is_depth(self) -> bool {
        matches!(
            (self.channels, self.elem),
            (Channels::R, Elem::F16) | (Channels::R, Elem::F32) | (Channels::R, Elem::F64)
        )
    }
}

/// Reads one normalized channel from raw texel memory.
#[inline(always)]
pub(crate) unsafe fn read_channel(ptr: *const u8, elem: Elem) -> f32 {
    // SAFETY: caller guarantees `ptr` points at a live element of `elem`'s
    // size. Reads are unaligned-safe via read_unaligned.
    unsafe {
        match elem {
            Elem::U8 => *ptr as f32 / u8::MAX as f32,
            Elem::U16 => (ptr as *const u16).read_unaligned() as f32 / u16::MAX as f32,
            Elem::U32 => {
                ((ptr as *const u32).read_unaligned() as f64 / u32::MAX as f64) as f32
            }
            Elem::U64 => {
                ((ptr as *const u64).read_unaligned() as f64 / u64::MAX as f64) as f32
            }
            Elem::F16 => f16::from_bits((ptr as *const u16).read_unaligned()).to_f32(),
            Elem::F32 => (ptr as *const f32).read_unaligned(),
            Elem::F64 => (ptr as *const f64).read_unaligned() as f32,
        }
    }
}

/// Writes one channel to raw texel memory, normalizing and saturating for
/// integer elements.
#[inline(always)]
pub(crate) unsafe fn write_channel(ptr: *mut u8, elem: Elem, v: f32) {
    // SAFETY: caller guarantees `ptr` points at a live element of `elem`'s
    // size. Writes are unaligned-safe via write_unaligned.
    unsafe {
        match elem {
            Elem::U8 => *ptr = (v.clamp(0.0, 1.0) * u8::MAX as f32 + 0.5) as u8,
            Elem::U16 => (ptr as *mut u16)
                .write_unaligned((v.clamp(0.0, 1.0) * u16::MAX as f32 + 0.5) as u16),
            Elem::U32 => (ptr as *mut u32)
                .write_unaligned((v.clamp(0.0, 1.0) as f64 * u32::MAX as f64 + 0.5) as u32),
            Elem::U64 => (ptr as *mut u64)
                .write_unaligned((v.clamp(0.0, 1.0) as f64 * u64::MAX as f64 + 0.5) as u64),
            Elem::F16 => (ptr as *mut u16).write_unaligned(f16::from_f32(v).to_bits()),
            Elem::F32 => (ptr as *mut f32).write_unaligned(v),
            Elem::F64 => (ptr as *mut f64).write_unaligned(v as f64),
        }
    }
}

/// Reads a texel as a normalized RGBA vector from raw texture memory.
/// Missing channels read as `(r, 0, 0, 1)`-style defaults.
///
/// # Safety
/// `ptr` must point at the start of a `width`-texel-wide row grid containing
/// `(x, y)` in `format`.
#[inline(always)]
pub(crate) unsafe fn read_texel_vec4(
    ptr: *const u8,
    format: PixelFormat,
    width: usize,
    x: usize,
    y: usize,
) -> Vec4 {
    let bpt = format.bytes_per_texel();
    let es = format.elem.size();
    // SAFETY: offset stays inside the grid per the caller contract.
    let texel = unsafe { ptr.add((y * width + x) * bpt) };
    let mut out = Vec4::new(0.0, 0.0, 0.0, 1.0);
    for c in 0..format.channels.count() {
        // SAFETY: channel `c` lies within the texel.
        out[c] = unsafe { read_channel(texel.add(c * es), format.elem) };
    }
    out
}

/// Writes a normalized RGBA vector to raw texture memory; extra channels in
/// `v` beyond the format's count are dropped.
///
/// # Safety
/// Same contract as [`read_texel_vec4`], with write access.
#[inline(always)]
pub(crate) unsafe fn write_texel_vec4(
    ptr: *mut u8,
    format: PixelFormat,
    width: usize,
    x: usize,
    y: usize,
    v: Vec4,
) {
    let bpt = format.bytes_per_texel();
    let es = format.elem.size();
    // SAFETY: offset stays inside the grid per the caller contract.
    let texel = unsafe { ptr.add((y * width + x) * bpt) };
    for c in 0..format.channels.count() {
        // SAFETY: channel `c` lies within the texel.
        unsafe { write_channel(texel.add(c * es), format.elem, v[c]) };
    }
}

/// A width x height x depth grid of typed texels.
pub struct Texture {
    data: RawBytes,
    width: u16,
    height: u16,
    depth: u16,
    format: PixelFormat,
}

impl Texture {
    /// Allocates a zeroed texture.
    pub fn new(format: PixelFormat, width: u16, height: u16, depth: u16) -> RenderResult<Self> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(RenderError::BadArg);
        }
        let texels = width as usize * height as usize * depth as usize;
        let num_bytes = texels
            .checked_mul(format.bytes_per_texel())
            .ok_or(RenderError::AllocFail)?;
        Ok(Self {
            data: RawBytes::zeroed(num_bytes)?,
            width,
            height,
            depth,
            format,
        })
    }

    /// Width in texels.
    #[inline(always)]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Height in texels.
    #[inline(always)]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Depth in layers.
    #[inline(always)]
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// The pixel format.
    #[inline(always)]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Byte offset of texel `(x, y, z)`.
    #[inline(always)]
    fn texel_offset(&self, x: u16, y: u16, z: u16) -> usize {
        let w = self.width as usize;
        let h = self.height as usize;
        ((z as usize * h + y as usize) * w + x as usize) * self.format.bytes_per_texel()
    }

    /// Raw bytes of the whole grid.
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Mutable raw bytes of the whole grid.
    #[inline(always)]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut_slice()
    }

    /// Base pointer, for views shared with worker threads.
    #[inline(always)]
    pub(crate) fn data_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    /// Reads texel `(x, y)` of layer 0 as `T`.
    ///
    /// `T` must match the texture's texel size; checked in debug builds.
    #[inline(always)]
    pub fn texel<T: Pod>(&self, x: u16, y: u16) -> T {
        self.texel_3d(x, y, 0)
    }

    /// Reads texel `(x, y, z)` as `T`.
    #[inline(always)]
    pub fn texel_3d<T: Pod>(&self, x: u16, y: u16, z: u16) -> T {
        debug_assert!(x < self.width && y < self.height && z < self.depth);
        debug_assert_eq!(core::mem::size_of::<T>(), self.format.bytes_per_texel());
        let off = self.texel_offset(x, y, z);
        bytemuck::pod_read_unaligned(&self.data.as_slice()[off..off + core::mem::size_of::<T>()])
    }

    /// Writes texel `(x, y)` of layer 0 as `T`.
    #[inline(always)]
    pub fn set_texel<T: Pod>(&mut self, x: u16, y: u16, v: T) {
        debug_assert!(x < self.width && y < self.height);
        debug_assert_eq!(core::mem::size_of::<T>(), self.format.bytes_per_texel());
        let off = self.texel_offset(x, y, 0);
        self.data.as_mut_slice()[off..off + core::mem::size_of::<T>()]
            .copy_from_slice(bytemuck::bytes_of(&v));
    }

    /// Pointer to the first texel of row `y` (layer 0), typed.
    #[inline(always)]
    pub(crate) fn row_ptr<T>(&self, y: u16) -> *const T {
        debug_assert!(y < self.height);
        debug_assert_eq!(core::mem::size_of::<T>(), self.format.bytes_per_texel());
        // SAFETY: the offset is within the allocation for y < height.
        unsafe { self.data.as_ptr().add(self.texel_offset(0, y, 0)) as *const T }
    }

    /// Reads texel `(x, y)` of layer 0 as a normalized RGBA vector.
    #[inline(always)]
    pub fn read_vec4(&self, x: u16, y: u16) -> Vec4 {
        self.read_vec4_layer(x, y, 0)
    }

    /// Reads texel `(x, y, z)` as a normalized RGBA vector.
    #[inline(always)]
    pub fn read_vec4_layer(&self, x: u16, y: u16, z: u16) -> Vec4 {
        debug_assert!(x < self.width && y < self.height && z < self.depth);
        let layer_rows = z as usize * self.height as usize + y as usize;
        // SAFETY: coordinates are in range, so the computed texel is live.
        unsafe {
            read_texel_vec4(
                self.data.as_ptr(),
                self.format,
                self.width as usize,
                x as usize,
                layer_rows,
            )
        }
    }

    /// Writes texel `(x, y)` of layer 0 from a normalized RGBA vector.
    #[inline(always)]
    pub fn write_vec4(&mut self, x: u16, y: u16, v: Vec4) {
        debug_assert!(x < self.width && y < self.height);
        let (w, format) = (self.width as usize, self.format);
        // SAFETY: coordinates are in range, so the computed texel is live.
        unsafe {
            write_texel_vec4(
                self.data.as_mut_ptr(),
                format,
                w,
                x as usize,
                y as usize,
                v,
            )
        }
    }

    /// Nearest-neighbor sample at normalized coordinates. Coordinates are
    /// clamped to the edge.
    pub fn sample_nearest(&self, u: f32, v: f32) -> Vec4 {
        let x = (u * self.width as f32) as i32;
        let y = (v * self.height as f32) as i32;
        let x = x.clamp(0, self.width as i32 - 1) as u16;
        let y = y.clamp(0, self.height as i32 - 1) as u16;
        self.read_vec4(x, y)
    }

    /// Bilinear sample at normalized coordinates. Coordinates are clamped to
    /// the edge.
    pub fn sample_bilinear(&self, u: f32, v: f32) -> Vec4 {
        let fx = (u * self.width as f32 - 0.5).max(0.0);
        let fy = (v * self.height as f32 - 0.5).max(0.0);
        let x0 = fx as u16;
        let y0 = fy as u16;
        let x0 = x0.min(self.width - 1);
        let y0 = y0.min(self.height - 1);
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let top = self.read_vec4(x0, y0).mix(self.read_vec4(x1, y0), tx);
        let bottom = self.read_vec4(x0, y1).mix(self.read_vec4(x1, y1), tx);
        top.mix(bottom, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_rejected() {
        assert_eq!(
            Texture::new(PixelFormat::RGBA_U8, 0, 4, 1).err(),
            Some(RenderError::BadArg)
        );
    }

    #[test]
    fn rgba8_roundtrip_is_exact() {
        let mut tex = Texture::new(PixelFormat::RGBA_U8, 4, 4, 1).unwrap();
        tex.write_vec4(1, 2, Vec4::new(1.0, 0.0, 0.5, 1.0));
        let texel: [u8; 4] = tex.texel(1, 2);
        assert_eq!(texel, [255, 0, 128, 255]);
        let back = tex.read_vec4(1, 2);
        // Writing the read-back value must reproduce identical bytes.
        tex.write_vec4(1, 2, back);
        assert_eq!(tex.texel::<[u8; 4]>(1, 2), [255, 0, 128, 255]);
    }

    #[test]
    fn f16_roundtrip() {
        let mut tex = Texture::new(PixelFormat::R_F16, 2, 2, 1).unwrap();
        tex.write_vec4(0, 0, Vec4::splat(0.25));
        assert_eq!(tex.read_vec4(0, 0).x, 0.25);
    }

    #[test]
    fn missing_channels_default() {
        let mut tex = Texture::new(PixelFormat::new(Channels::Rg, Elem::F32), 1, 1, 1).unwrap();
        tex.write_vec4(0, 0, Vec4::new(0.25, 0.75, 0.9, 0.9));
        let v = tex.read_vec4(0, 0);
        assert_eq!(v, Vec4::new(0.25, 0.75, 0.0, 1.0));
    }

    #[test]
    fn layers_are_independent() {
        let mut tex = Texture::new(PixelFormat::new(Channels::R, Elem::U8), 2, 2, 2).unwrap();
        // Write layer 1 through the raw byte path.
        let off = (1 * 2 * 2 + 1 * 2 + 0) as usize; // z=1, y=1, x=0
        tex.as_bytes_mut()[off] = 255;
        assert_eq!(tex.read_vec4_layer(0, 1, 1).x, 1.0);
        assert_eq!(tex.read_vec4_layer(0, 1, 0).x, 0.0);
    }

    #[test]
    fn bilinear_midpoint() {
        let mut tex = Texture::new(PixelFormat::R_F32, 2, 1, 1).unwrap();
        tex.write_vec4(0, 0, Vec4::splat(0.0));
        tex.write_vec4(1, 0, Vec4::splat(1.0));
        let mid = tex.sample_bilinear(0.5, 0.5);
        assert!((mid.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn all_formats_allocate() {
        for ch in [Channels::R, Channels::Rg, Channels::Rgb, Channels::Rgba] {
            for elem in [
                Elem::U8,
                Elem::U16,
                Elem::U32,
                Elem::U64,
                Elem::F16,
                Elem::F32,
                Elem::F64,
            ] {
                let tex = Texture::new(PixelFormat::new(ch, elem), 3, 3, 1).unwrap();
                assert_eq!(
                    tex.as_bytes().len(),
                    9 * ch.count() * elem.size(),
                    "{ch:?} {elem:?}"
                );
            }
        }
    }
}
