//! The parallel rasterization pipeline.
//!
//! A draw fans out to N workers. Each worker runs a vertex stage over its
//! slice of the primitive stream ([`vertex`]), clipping partially visible
//! triangles ([`clip`]) and queueing assembled primitives into its own bin
//! array ([`bins`]). Bin flushes are collective: every worker rasterizes every
//! published bin, restricted to the scan-lines it owns ([`raster`]).

pub(crate) mod bins;
pub(crate) mod clip;
pub(crate) mod raster;
pub(crate) mod vertex;

use crate::buffer::{IndexBuffer, UniformBuffer, VertexBuffer};
use crate::context::{DepthOrder, VaoId};
use crate::framebuffer::FboView;
use crate::shader::{Shader, MAX_VARYINGS};
use crate::vertex_array::VertexArray;
use bitflags::bitflags;
use rasterflow_core::Vec4;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64};

/// Capacity of one worker's bin array.
pub(crate) const MAX_BINNED_PRIMS: usize = 1024;

/// Capacity of the per-worker fragment queue.
pub(crate) const MAX_QUEUED_FRAGS: usize = 256;

/// Entries in the direct-mapped post-transform-vertex cache.
pub(crate) const PTV_CACHE_SIZE: usize = 32;

/// Sentinel for an unpublished `bins_ready` slot.
pub(crate) const READY_SENTINEL: u32 = u32::MAX;

bitflags! {
    /// Primitive topology and stream interpretation of a draw.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct RenderMode: u16 {
        /// One vertex per primitive.
        const POINTS = 1 << 0;
        /// Two vertices per primitive, independent segments.
        const LINES = 1 << 1;
        /// Three vertices per primitive.
        const TRIANGLES = 1 << 2;
        /// With `TRIANGLES`: rasterize span edges only.
        const WIREFRAME = 1 << 3;
        /// Fetch vertices through the index buffer.
        const INDEXED = 1 << 4;

        /// Indexed point list.
        const INDEXED_POINTS = Self::POINTS.bits() | Self::INDEXED.bits();
        /// Indexed line list.
        const INDEXED_LINES = Self::LINES.bits() | Self::INDEXED.bits();
        /// Indexed triangle list.
        const INDEXED_TRIANGLES = Self::TRIANGLES.bits() | Self::INDEXED.bits();
        /// Indexed wireframe triangle list.
        const INDEXED_TRI_WIRE =
            Self::TRIANGLES.bits() | Self::WIREFRAME.bits() | Self::INDEXED.bits();
        /// Wireframe triangle list.
        const TRI_WIRE = Self::TRIANGLES.bits() | Self::WIREFRAME.bits();
    }
}

impl RenderMode {
    /// Vertices per primitive: 1, 2, or 3.
    #[inline(always)]
    pub fn arity(self) -> u32 {
        if self.contains(RenderMode::TRIANGLES) {
            3
        } else if self.contains(RenderMode::LINES) {
            2
        } else {
            1
        }
    }
}

/// A primitive stream: a vertex array plus an element range and topology.
#[derive(Copy, Clone, Debug)]
pub struct Mesh {
    /// The vertex array describing the stream.
    pub vao: VaoId,
    /// First element (index-buffer element when indexed, vertex id otherwise).
    pub element_begin: u32,
    /// One past the last element.
    pub element_end: u32,
    /// Topology and stream flags.
    pub mode: RenderMode,
}

/// A fully assembled primitive queued for rasterization.
///
/// Immutable once published. `screen[i]` carries `(x px, y px, z depth,
/// 1/clip_w)`. `bary` holds the three coefficient rows evaluating affine
/// barycentrics as `bc = bary[0]*x + bary[1]*y + bary[2]`.
#[derive(Copy, Clone)]
pub(crate) struct FragmentBin {
    pub screen: [Vec4; 3],
    pub bary: [Vec4; 3],
    pub varyings: [[Vec4; MAX_VARYINGS]; 3],
    /// Minimum per-vertex depth, the back-to-front sort key.
    pub min_z: f32,
}

impl Default for FragmentBin {
    fn default() -> Self {
        Self {
            screen: [Vec4::ZERO; 3],
            bary: [Vec4::ZERO; 3],
            varyings: [[Vec4::ZERO; MAX_VARYINGS]; 3],
            min_z: 0.0,
        }
    }
}

/// One worker's bin storage.
///
/// Written only by the owning worker between flush barriers; read by every
/// worker during a flush, after publication through the flush counter.
pub(crate) struct BinSet {
    bins: UnsafeCell<Box<[FragmentBin]>>,
}

// SAFETY: access is serialized by the two-phase flush protocol; see module
// docs in `bins`.
unsafe impl Sync for BinSet {}

impl BinSet {
    pub(crate) fn new() -> Self {
        Self {
            bins: UnsafeCell::new(vec![FragmentBin::default(); MAX_BINNED_PRIMS].into_boxed_slice()),
        }
    }

    /// Writes a bin slot. Producer-only, before publication.
    ///
    /// # Safety
    /// Only the owning worker may call this, and only for a slot counted by
    /// its own unpublished `bins_used`.
    #[inline(always)]
    pub(crate) unsafe fn write(&self, idx: usize, bin: FragmentBin) {
        // SAFETY: exclusive slot access per the call contract.
        unsafe { (*self.bins.get())[idx] = bin };
    }

    /// Reads a published bin.
    ///
    /// # Safety
    /// Callers may only read slots published by a flush announcement.
    #[inline(always)]
    pub(crate) unsafe fn read(&self, idx: usize) -> &FragmentBin {
        // SAFETY: published slots are immutable until the epoch reset.
        unsafe { &(*self.bins.get())[idx] }
    }
}

/// Cache-line-padded atomic, keeping per-worker counters off shared lines.
#[repr(align(64))]
pub(crate) struct PaddedAtomicU32(pub AtomicU32);

/// Shared synchronization state for one draw.
pub(crate) struct DrawSync {
    /// Vertex processors still producing.
    pub busy: AtomicU32,
    /// Two-phase flush counter: 0..N announcing, N..2N rasterizing.
    pub flush: AtomicU64,
    /// Per-producer bin counts.
    pub bins_used: Vec<PaddedAtomicU32>,
    /// Announce-ordered publication slots; value = producer worker id.
    pub bins_ready: Vec<PaddedAtomicU32>,
}

impl DrawSync {
    pub(crate) fn new(num_workers: usize) -> Self {
        Self {
            busy: AtomicU32::new(num_workers as u32),
            flush: AtomicU64::new(0),
            bins_used: (0..num_workers)
                .map(|_| PaddedAtomicU32(AtomicU32::new(0)))
                .collect(),
            bins_ready: (0..num_workers)
                .map(|_| PaddedAtomicU32(AtomicU32::new(READY_SENTINEL)))
                .collect(),
        }
    }
}

/// Everything a worker needs for one draw. Lives on the dispatching thread's
/// stack; workers receive it by reference through the pool.
pub(crate) struct DrawTask<'a> {
    pub shader: &'a Shader,
    pub uniforms: &'a UniformBuffer,
    pub vao: &'a VertexArray,
    pub vbo: &'a VertexBuffer,
    pub ibo: Option<&'a IndexBuffer>,
    pub fbo: FboView,
    pub mesh: Mesh,
    pub num_workers: usize,
    pub depth_order: DepthOrder,
    pub sync: &'a DrawSync,
    pub bin_sets: &'a [BinSet],
}
