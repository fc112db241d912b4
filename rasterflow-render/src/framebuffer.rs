//! Framebuffers: ordered color attachments plus one depth attachment.
//!
//! A framebuffer holds texture *references*; texel storage lives in the
//! context's texture table. Validation and all pixel traffic therefore happen
//! on resolved views (see [`FboView`]) built by the context at dispatch time.

use crate::context::TextureId;
use crate::error::{RenderError, RenderResult};
use crate::shader::BlendMode;
use crate::texture::{read_texel_vec4, write_texel_vec4, PixelFormat};
use rasterflow_core::Vec4;

/// Maximum number of color attachments.
pub const MAX_COLOR_ATTACHMENTS: usize = 4;

/// An ordered set of color attachments plus a depth attachment.
#[derive(Default)]
pub struct Framebuffer {
    colors: Vec<Option<TextureId>>,
    depth: Option<TextureId>,
}

impl Framebuffer {
    /// Creates a framebuffer with no attachment slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `n` color attachment slots, dropping any existing ones.
    pub fn reserve_color_buffers(&mut self, n: usize) -> RenderResult<()> {
        if n > MAX_COLOR_ATTACHMENTS {
            return Err(RenderError::BadArg);
        }
        self.colors.clear();
        self.colors.resize(n, None);
        Ok(())
    }

    /// Attaches a color texture at `slot`.
    pub fn attach_color(&mut self, slot: usize, tex: TextureId) -> RenderResult<()> {
        *self.colors.get_mut(slot).ok_or(RenderError::BadArg)? = Some(tex);
        Ok(())
    }

    /// Attaches the depth texture.
    pub fn attach_depth(&mut self, tex: TextureId) {
        self.depth = Some(tex);
    }

    /// Number of reserved color slots.
    #[inline(always)]
    pub fn num_color_buffers(&self) -> usize {
        self.colors.len()
    }

    /// The color attachment at `slot`, if attached.
    #[inline(always)]
    pub fn color_attachment(&self, slot: usize) -> Option<TextureId> {
        self.colors.get(slot).copied().flatten()
    }

    /// The depth attachment, if attached.
    #[inline(always)]
    pub fn depth_attachment(&self) -> Option<TextureId> {
        self.depth
    }
}

/// Applies a blend equation in normalized RGBA space.
///
/// `src` is the fragment shader output, `dst` the existing framebuffer value.
#[inline(always)]
pub fn blend(mode: BlendMode, src: Vec4, dst: Vec4) -> Vec4 {
    match mode {
        BlendMode::Off => src,
        BlendMode::Alpha => dst * (1.0 - src.w) + src * src.w,
        BlendMode::PremulAlpha => dst * (1.0 - src.w) + src,
        BlendMode::Additive => dst + src,
        BlendMode::Screen => {
            Vec4::splat(1.0) - (Vec4::splat(1.0) - dst) * (Vec4::splat(1.0) - src)
        }
    }
}

/// A resolved attachment: raw texel storage plus format and extent.
///
/// Built by the context from validated attachments before dispatch; worker
/// threads write through it without holding texture borrows.
#[derive(Copy, Clone)]
pub(crate) struct AttachmentView {
    pub data: *mut u8,
    pub format: PixelFormat,
}

/// A resolved framebuffer shared with worker threads.
#[derive(Copy, Clone)]
pub(crate) struct FboView {
    pub colors: [AttachmentView; MAX_COLOR_ATTACHMENTS],
    pub num_colors: usize,
    pub depth: AttachmentView,
    pub width: u16,
    pub height: u16,
}

// SAFETY: the draw protocol partitions pixel rows across workers (scan-line
// `y % N` ownership), so no texel is written by two threads, and the context
// keeps the backing textures alive and unborrowed for the whole dispatch.
unsafe impl Send for FboView {}
unsafe impl Sync for FboView {}

impl FboView {
    /// Reads a color texel as normalized RGBA.
    #[inline(always)]
    pub fn read_color(&self, attachment: usize, x: u16, y: u16) -> Vec4 {
        debug_assert!(attachment < self.num_colors);
        debug_assert!(x < self.width && y < self.height);
        let att = &self.colors[attachment];
        // SAFETY: coordinates checked above; the view owns rows `y % N`.
        unsafe {
            read_texel_vec4(
                att.data,
                att.format,
                self.width as usize,
                x as usize,
                y as usize,
            )
        }
    }

    /// Writes a color texel from normalized RGBA.
    #[inline(always)]
    pub fn put_pixel(&self, attachment: usize, x: u16, y: u16, v: Vec4) {
        debug_assert!(attachment < self.num_colors);
        debug_assert!(x < self.width && y < self.height);
        let att = &self.colors[attachment];
        // SAFETY: coordinates checked above; the view owns rows `y % N`.
        unsafe {
            write_texel_vec4(
                att.data,
                att.format,
                self.width as usize,
                x as usize,
                y as usize,
                v,
            )
        }
    }

    /// Reads, blends, and writes back a color texel.
    #[inline(always)]
    pub fn put_blended_pixel(&self, attachment: usize, x: u16, y: u16, v: Vec4, mode: BlendMode) {
        let dst = self.read_color(attachment, x, y);
        self.put_pixel(attachment, x, y, blend(mode, v, dst));
    }

    /// Pointer to the first depth texel of row `y`, typed.
    #[inline(always)]
    pub fn depth_row_ptr<T>(&self, y: u16) -> *mut T {
        debug_assert!(y < self.height);
        debug_assert_eq!(
            core::mem::size_of::<T>(),
            self.depth.format.bytes_per_texel()
        );
        // SAFETY: row `y` is inside the depth grid.
        unsafe {
            self.depth
                .data
                .add(y as usize * self.width as usize * self.depth.format.bytes_per_texel())
                as *mut T
        }
    }
}
