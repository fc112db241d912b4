//! Vertex, index, and uniform buffers.
//!
//! All three are opaque byte stores; meaning is imposed from outside: by a
//! [`crate::vertex_array::VertexArray`] for vertex data, by the index width
//! for index data, and by a user-defined `Pod` layout for uniform blocks.
//! Storage is 16-byte aligned so `Pod` views up to `Vec4` alignment are
//! zero-copy.

use crate::error::{RenderError, RenderResult};
use bytemuck::Pod;

/// 16-byte-aligned opaque byte storage shared by buffers and textures.
pub(crate) struct RawBytes {
    words: Box<[u128]>,
    len: usize,
}

impl RawBytes {
    /// Allocates `len` zeroed bytes. Zero length is rejected by the callers,
    /// not here, so textures and buffers can report their own error kinds.
    pub(crate) fn zeroed(len: usize) -> RenderResult<Self> {
        let word_count = len.div_ceil(16);
        // A reservation failure aborts in stable Rust; treat absurd sizes as
        // allocation failure before touching the allocator.
        if word_count > isize::MAX as usize / 16 {
            return Err(RenderError::AllocFail);
        }
        Ok(Self {
            words: vec![0u128; word_count].into_boxed_slice(),
            len,
        })
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub(crate) fn as_slice(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    #[inline(always)]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }

    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    #[inline(always)]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr() as *mut u8
    }
}

/// An opaque vertex data store.
pub struct VertexBuffer {
    bytes: RawBytes,
}

impl VertexBuffer {
    /// Allocates `num_bytes` of zeroed vertex storage.
    pub fn new(num_bytes: usize) -> RenderResult<Self> {
        if num_bytes == 0 {
            return Err(RenderError::BadArg);
        }
        Ok(Self {
            bytes: RawBytes::zeroed(num_bytes)?,
        })
    }

    /// Total size in bytes.
    #[inline(always)]
    pub fn num_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Copies `data` into the buffer at `offset`.
    pub fn assign(&mut self, data: &[u8], offset: usize) -> RenderResult<()> {
        let end = offset.checked_add(data.len()).ok_or(RenderError::BadArg)?;
        if end > self.bytes.len() {
            return Err(RenderError::BadArg);
        }
        self.bytes.as_mut_slice()[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Reads one element of type `T` at a byte offset.
    ///
    /// The offset usually comes from
    /// [`crate::vertex_array::VertexArray::offset`]. Reads by value so
    /// arbitrary offsets need no alignment. Out-of-range offsets are a caller
    /// bug; the bound is checked by the slice index.
    #[inline(always)]
    pub fn element<T: Pod>(&self, offset: usize) -> T {
        bytemuck::pod_read_unaligned(&self.as_bytes()[offset..offset + core::mem::size_of::<T>()])
    }

    /// The raw bytes.
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }
}

/// Width of the elements in an index buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexType {
    /// 8-bit indices.
    U8,
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    U32,
}

impl IndexType {
    /// Size of one index in bytes.
    #[inline(always)]
    pub const fn size(self) -> usize {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// An ordered sequence of vertex indices.
pub struct IndexBuffer {
    bytes: RawBytes,
    index_type: IndexType,
    count: u32,
}

impl IndexBuffer {
    /// Allocates storage for `count` indices, optionally copying `data`.
    pub fn new(count: u32, index_type: IndexType, data: Option<&[u8]>) -> RenderResult<Self> {
        if count == 0 {
            return Err(RenderError::BadArg);
        }
        let num_bytes = count as usize * index_type.size();
        if let Some(d) = data {
            if d.len() != num_bytes {
                return Err(RenderError::BadArg);
            }
        }
        let mut bytes = RawBytes::zeroed(num_bytes)?;
        if let Some(d) = data {
            bytes.as_mut_slice().copy_from_slice(d);
        }
        Ok(Self {
            bytes,
            index_type,
            count,
        })
    }

    /// Number of indices.
    #[inline(always)]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Element width.
    #[inline(always)]
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Reads index `i`, widened to 32 bits.
    #[inline(always)]
    pub fn index(&self, i: u32) -> u32 {
        debug_assert!(i < self.count);
        let bytes = self.bytes.as_slice();
        match self.index_type {
            IndexType::U8 => bytes[i as usize] as u32,
            IndexType::U16 => {
                let off = i as usize * 2;
                u16::from_le_bytes([bytes[off], bytes[off + 1]]) as u32
            }
            IndexType::U32 => {
                let off = i as usize * 4;
                u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
            }
        }
    }

    /// Reads three consecutive indices starting at `i`.
    #[inline(always)]
    pub fn index3(&self, i: u32) -> [u32; 3] {
        [self.index(i), self.index(i + 1), self.index(i + 2)]
    }

    /// Largest index in `[begin, end)`, for draw-time range validation.
    pub fn max_index(&self, begin: u32, end: u32) -> u32 {
        debug_assert!(begin <= end && end <= self.count);
        let mut max = 0;
        for i in begin..end {
            max = max.max(self.index(i));
        }
        max
    }

    /// Overwrites the indices starting at element `offset`.
    pub fn assign(&mut self, data: &[u8], offset: u32) -> RenderResult<()> {
        let byte_off = offset as usize * self.index_type.size();
        let end = byte_off.checked_add(data.len()).ok_or(RenderError::BadArg)?;
        if end > self.bytes.len() || data.len() % self.index_type.size() != 0 {
            return Err(RenderError::BadArg);
        }
        self.bytes.as_mut_slice()[byte_off..end].copy_from_slice(data);
        Ok(())
    }
}

/// A fixed-capacity opaque uniform block owned by a shader.
///
/// The shader reinterprets the block through its own `Pod` layout:
///
/// ```
/// use rasterflow_render::buffer::UniformBuffer;
///
/// #[repr(C)]
/// #[derive(Copy, Clone)]
/// struct Uniforms { scale: f32, bias: f32 }
/// unsafe impl bytemuck::Zeroable for Uniforms {}
/// unsafe impl bytemuck::Pod for Uniforms {}
///
/// let mut ubo = UniformBuffer::new(core::mem::size_of::<Uniforms>()).unwrap();
/// *ubo.as_block_mut::<Uniforms>() = Uniforms { scale: 2.0, bias: 0.5 };
/// assert_eq!(ubo.as_block::<Uniforms>().scale, 2.0);
/// ```
pub struct UniformBuffer {
    bytes: RawBytes,
}

impl UniformBuffer {
    /// Allocates a zeroed block of `capacity` bytes.
    pub fn new(capacity: usize) -> RenderResult<Self> {
        if capacity == 0 {
            return Err(RenderError::BadArg);
        }
        Ok(Self {
            bytes: RawBytes::zeroed(capacity)?,
        })
    }

    /// An empty placeholder block for shaders without uniforms.
    pub(crate) fn empty() -> Self {
        Self {
            bytes: RawBytes::zeroed(16).expect("16-byte allocation"),
        }
    }

    /// Capacity in bytes.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Views the block as `T`. `T` must fit the capacity and have alignment
    /// of at most 16.
    #[inline(always)]
    pub fn as_block<T: Pod>(&self) -> &T {
        bytemuck::from_bytes(&self.bytes.as_slice()[..core::mem::size_of::<T>()])
    }

    /// Mutable view of the block as `T`.
    #[inline(always)]
    pub fn as_block_mut<T: Pod>(&mut self) -> &mut T {
        bytemuck::from_bytes_mut(&mut self.bytes.as_mut_slice()[..core::mem::size_of::<T>()])
    }

    /// Copies raw bytes into the block at `offset`.
    pub fn write(&mut self, data: &[u8], offset: usize) -> RenderResult<()> {
        let end = offset.checked_add(data.len()).ok_or(RenderError::BadArg)?;
        if end > self.bytes.len() {
            return Err(RenderError::BadArg);
        }
        self.bytes.as_mut_slice()[offset..end].copy_from_slice(data);
        Ok(())
    }
}
