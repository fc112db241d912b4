//! The rendering context: resource ownership and draw dispatch.
//!
//! The context exclusively owns every buffer, texture, vertex array,
//! framebuffer, and shader, handing out stable opaque ids. Draw calls
//! validate against the id tables, resolve raw framebuffer views, and fan the
//! primitive stream out across the worker pool; the calling thread is
//! worker 0. Draws borrow the context mutably, so draws against the same
//! context (and hence the same framebuffer) are serialized by construction.

use crate::blit::blit_to_window;
use crate::buffer::{IndexBuffer, IndexType, UniformBuffer, VertexBuffer};
use crate::error::{RenderError, RenderResult};
use crate::framebuffer::{AttachmentView, FboView, Framebuffer, MAX_COLOR_ATTACHMENTS};
use crate::pipeline::vertex::VertexWorker;
use crate::pipeline::{BinSet, DrawSync, DrawTask, Mesh, RenderMode};
use crate::pool::{SendPtr, WorkerPool};
use crate::shader::{FragmentShader, Shader, VertexShader, MAX_FRAG_OUTPUTS, MAX_VARYINGS};
use crate::texture::{PixelFormat, Texture};
use crate::vertex_array::VertexArray;
use crate::window::WindowBuffer;
use log::{debug, info};
use rasterflow_core::Vec4;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) u32);
    };
}

define_id!(
    /// Handle to a vertex buffer.
    VboId
);
define_id!(
    /// Handle to an index buffer.
    IboId
);
define_id!(
    /// Handle to a uniform buffer.
    UboId
);
define_id!(
    /// Handle to a texture.
    TextureId
);
define_id!(
    /// Handle to a vertex array.
    VaoId
);
define_id!(
    /// Handle to a framebuffer.
    FboId
);
define_id!(
    /// Handle to a shader program.
    ShaderId
);

/// Slot table with id reuse through a free list.
struct SlotTable<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> SlotTable<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, value: T) -> u32 {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(value);
            id
        } else {
            self.slots.push(Some(value));
            (self.slots.len() - 1) as u32
        }
    }

    fn get(&self, id: u32) -> RenderResult<&T> {
        self.slots
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or(RenderError::BadId)
    }

    fn get_mut(&mut self, id: u32) -> RenderResult<&mut T> {
        self.slots
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(RenderError::BadId)
    }

    fn remove(&mut self, id: u32) -> RenderResult<T> {
        let slot = self
            .slots
            .get_mut(id as usize)
            .ok_or(RenderError::BadId)?;
        let value = slot.take().ok_or(RenderError::BadId)?;
        self.free.push(id);
        Ok(value)
    }
}

/// Depth comparison convention, fixed for the context lifetime.
///
/// The comparator and the clear value must agree: clear to 1.0 under
/// `Normal`, to 0.0 under `Reversed`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DepthOrder {
    /// Near is smaller: a fragment passes on `z < depth`.
    #[default]
    Normal,
    /// Near is larger: a fragment passes on `z > depth`.
    Reversed,
}

/// Context construction parameters. No global state exists; everything the
/// renderer needs arrives here.
#[derive(Copy, Clone, Debug)]
pub struct ContextConfig {
    /// Depth comparison convention.
    pub depth_order: DepthOrder,
    /// Initial worker count, clamped like [`Context::num_threads`].
    pub num_threads: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            depth_order: DepthOrder::Normal,
            num_threads: 1,
        }
    }
}

/// Data extracted from a validated framebuffer.
struct ResolvedFbo {
    width: u16,
    height: u16,
    color_ids: Vec<TextureId>,
    depth_id: TextureId,
}

/// Owns all rendering resources and the worker pool.
pub struct Context {
    vbos: SlotTable<VertexBuffer>,
    ibos: SlotTable<IndexBuffer>,
    ubos: SlotTable<UniformBuffer>,
    textures: SlotTable<Texture>,
    vaos: SlotTable<VertexArray>,
    fbos: SlotTable<Framebuffer>,
    shaders: SlotTable<Shader>,
    pool: WorkerPool,
    bin_sets: Vec<BinSet>,
    depth_order: DepthOrder,
    empty_ubo: UniformBuffer,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl Context {
    /// Creates a context.
    pub fn new(config: ContextConfig) -> Self {
        let workers = clamp_workers(config.num_threads);
        info!(
            "context created: {} workers, {:?} depth",
            workers, config.depth_order
        );
        Self {
            vbos: SlotTable::new(),
            ibos: SlotTable::new(),
            ubos: SlotTable::new(),
            textures: SlotTable::new(),
            vaos: SlotTable::new(),
            fbos: SlotTable::new(),
            shaders: SlotTable::new(),
            pool: WorkerPool::new(workers),
            bin_sets: Vec::new(),
            depth_order: config.depth_order,
            empty_ubo: UniformBuffer::empty(),
        }
    }

    /// The context's depth comparison convention.
    pub fn depth_order(&self) -> DepthOrder {
        self.depth_order
    }

    /// Grows or shrinks the worker pool; returns the resulting worker count.
    /// Clamped to `[1, hardware threads]`, idempotent.
    pub fn num_threads(&mut self, n: usize) -> usize {
        self.pool.resize(clamp_workers(n));
        self.pool.num_workers()
    }

    // ------------------------------------------------------------------
    // Resource creation / access / release
    // ------------------------------------------------------------------

    /// Creates a vertex buffer of `num_bytes`.
    pub fn create_vbo(&mut self, num_bytes: usize) -> RenderResult<VboId> {
        Ok(VboId(self.vbos.insert(VertexBuffer::new(num_bytes)?)))
    }

    /// Shared access to a vertex buffer.
    pub fn vbo(&self, id: VboId) -> RenderResult<&VertexBuffer> {
        self.vbos.get(id.0)
    }

    /// Mutable access to a vertex buffer.
    pub fn vbo_mut(&mut self, id: VboId) -> RenderResult<&mut VertexBuffer> {
        self.vbos.get_mut(id.0)
    }

    /// Releases a vertex buffer.
    pub fn release_vbo(&mut self, id: VboId) -> RenderResult<()> {
        self.vbos.remove(id.0).map(drop)
    }

    /// Creates an index buffer.
    pub fn create_ibo(
        &mut self,
        count: u32,
        index_type: IndexType,
        data: Option<&[u8]>,
    ) -> RenderResult<IboId> {
        Ok(IboId(
            self.ibos.insert(IndexBuffer::new(count, index_type, data)?),
        ))
    }

    /// Shared access to an index buffer.
    pub fn ibo(&self, id: IboId) -> RenderResult<&IndexBuffer> {
        self.ibos.get(id.0)
    }

    /// Mutable access to an index buffer.
    pub fn ibo_mut(&mut self, id: IboId) -> RenderResult<&mut IndexBuffer> {
        self.ibos.get_mut(id.0)
    }

    /// Releases an index buffer.
    pub fn release_ibo(&mut self, id: IboId) -> RenderResult<()> {
        self.ibos.remove(id.0).map(drop)
    }

    /// Creates a uniform buffer of `capacity` bytes.
    pub fn create_ubo(&mut self, capacity: usize) -> RenderResult<UboId> {
        Ok(UboId(self.ubos.insert(UniformBuffer::new(capacity)?)))
    }

    /// Shared access to a uniform buffer.
    pub fn ubo(&self, id: UboId) -> RenderResult<&UniformBuffer> {
        self.ubos.get(id.0)
    }

    /// Mutable access to a uniform buffer.
    pub fn ubo_mut(&mut self, id: UboId) -> RenderResult<&mut UniformBuffer> {
        self.ubos.get_mut(id.0)
    }

    /// Releases a uniform buffer.
    pub fn release_ubo(&mut self, id: UboId) -> RenderResult<()> {
        self.ubos.remove(id.0).map(drop)
    }

    /// Creates a texture.
    pub fn create_texture(
        &mut self,
        format: PixelFormat,
        width: u16,
        height: u16,
        depth: u16,
    ) -> RenderResult<TextureId> {
        Ok(TextureId(
            self.textures
                .insert(Texture::new(format, width, height, depth)?),
        ))
    }

    /// Shared access to a texture.
    pub fn texture(&self, id: TextureId) -> RenderResult<&Texture> {
        self.textures.get(id.0)
    }

    /// Mutable access to a texture.
    pub fn texture_mut(&mut self, id: TextureId) -> RenderResult<&mut Texture> {
        self.textures.get_mut(id.0)
    }

    /// Releases a texture.
    pub fn release_texture(&mut self, id: TextureId) -> RenderResult<()> {
        self.textures.remove(id.0).map(drop)
    }

    /// Creates an empty vertex array.
    pub fn create_vao(&mut self) -> VaoId {
        VaoId(self.vaos.insert(VertexArray::new()))
    }

    /// Shared access to a vertex array.
    pub fn vao(&self, id: VaoId) -> RenderResult<&VertexArray> {
        self.vaos.get(id.0)
    }

    /// Mutable access to a vertex array.
    pub fn vao_mut(&mut self, id: VaoId) -> RenderResult<&mut VertexArray> {
        self.vaos.get_mut(id.0)
    }

    /// Releases a vertex array.
    pub fn release_vao(&mut self, id: VaoId) -> RenderResult<()> {
        self.vaos.remove(id.0).map(drop)
    }

    /// Creates an empty framebuffer.
    pub fn create_framebuffer(&mut self) -> FboId {
        FboId(self.fbos.insert(Framebuffer::new()))
    }

    /// Shared access to a framebuffer.
    pub fn framebuffer(&self, id: FboId) -> RenderResult<&Framebuffer> {
        self.fbos.get(id.0)
    }

    /// Mutable access to a framebuffer.
    pub fn framebuffer_mut(&mut self, id: FboId) -> RenderResult<&mut Framebuffer> {
        self.fbos.get_mut(id.0)
    }

    /// Releases a framebuffer. The attached textures stay alive.
    pub fn release_framebuffer(&mut self, id: FboId) -> RenderResult<()> {
        self.fbos.remove(id.0).map(drop)
    }

    /// Registers a shader program. `ubo` is the uniform block visible to both
    /// stages, if the program uses one.
    pub fn create_shader(
        &mut self,
        vert: VertexShader,
        frag: FragmentShader,
        ubo: Option<UboId>,
    ) -> RenderResult<ShaderId> {
        if vert.num_varyings as usize > MAX_VARYINGS
            || frag.num_varyings > vert.num_varyings
            || frag.num_outputs as usize > MAX_FRAG_OUTPUTS
        {
            return Err(RenderError::BadArg);
        }
        if let Some(id) = ubo {
            self.ubos.get(id.0)?;
        }
        Ok(ShaderId(self.shaders.insert(Shader { vert, frag, ubo })))
    }

    /// Shared access to a shader.
    pub fn shader(&self, id: ShaderId) -> RenderResult<&Shader> {
        self.shaders.get(id.0)
    }

    /// Releases a shader.
    pub fn release_shader(&mut self, id: ShaderId) -> RenderResult<()> {
        self.shaders.remove(id.0).map(drop)
    }

    // ------------------------------------------------------------------
    // Framebuffer operations
    // ------------------------------------------------------------------

    /// Validates a framebuffer: depth attached and depth-capable, every
    /// reserved color slot attached, all extents equal, no texture attached
    /// twice.
    fn resolve_fbo(&self, id: FboId) -> RenderResult<ResolvedFbo> {
        let fbo = self.fbos.get(id.0)?;
        let depth_id = fbo.depth_attachment().ok_or(RenderError::FboIncomplete)?;
        let depth = self.textures.get(depth_id.0)?;
        if !depth.format().is_depth() {
            return Err(RenderError::Unsupported);
        }
        let (width, height) = (depth.width(), depth.height());

        let mut color_ids = Vec::with_capacity(fbo.num_color_buffers());
        for slot in 0..fbo.num_color_buffers() {
            let tex_id = fbo
                .color_attachment(slot)
                .ok_or(RenderError::FboIncomplete)?;
            let tex = self.textures.get(tex_id.0)?;
            if tex.width() != width || tex.height() != height {
                return Err(RenderError::FboIncomplete);
            }
            if tex_id == depth_id || color_ids.contains(&tex_id) {
                return Err(RenderError::FboIncomplete);
            }
            color_ids.push(tex_id);
        }
        Ok(ResolvedFbo {
            width,
            height,
            color_ids,
            depth_id,
        })
    }

    /// Builds the raw attachment views workers write through.
    fn build_fbo_view(&mut self, resolved: &ResolvedFbo) -> FboView {
        let mut colors = [AttachmentView {
            data: core::ptr::null_mut(),
            format: PixelFormat::RGBA_U8,
        }; MAX_COLOR_ATTACHMENTS];
        for (i, tex_id) in resolved.color_ids.iter().enumerate() {
            let tex = self.textures.get_mut(tex_id.0).expect("validated id");
            colors[i] = AttachmentView {
                data: tex.data_ptr(),
                format: tex.format(),
            };
        }
        let depth_tex = self.textures.get_mut(resolved.depth_id.0).expect("validated id");
        let depth = AttachmentView {
            data: depth_tex.data_ptr(),
            format: depth_tex.format(),
        };
        FboView {
            colors,
            num_colors: resolved.color_ids.len(),
            depth,
            width: resolved.width,
            height: resolved.height,
        }
    }

    /// Clears the listed color attachments (one color per listed index) and
    /// the depth attachment, fanned out across the pool. Attachments not
    /// listed keep their contents.
    pub fn clear_framebuffer(
        &mut self,
        fbo: FboId,
        attachments: &[usize],
        colors: &[Vec4],
        depth: f32,
    ) -> RenderResult<()> {
        if attachments.len() != colors.len() {
            return Err(RenderError::BadArg);
        }
        let resolved = self.resolve_fbo(fbo)?;
        for (i, &slot) in attachments.iter().enumerate() {
            // A slot listed twice would hand the same texture to two workers.
            if slot >= resolved.color_ids.len() || attachments[..i].contains(&slot) {
                return Err(RenderError::BadArg);
            }
        }

        struct ClearJob {
            ptr: SendPtr<u8>,
            format: PixelFormat,
            texels: usize,
            value: Vec4,
        }

        let mut jobs = Vec::with_capacity(attachments.len() + 1);
        for (&slot, &color) in attachments.iter().zip(colors) {
            let tex = self
                .textures
                .get_mut(resolved.color_ids[slot].0)
                .expect("validated id");
            jobs.push(ClearJob {
                ptr: SendPtr(tex.data_ptr()),
                format: tex.format(),
                texels: tex.width() as usize * tex.height() as usize * tex.depth() as usize,
                value: color,
            });
        }
        {
            let tex = self
                .textures
                .get_mut(resolved.depth_id.0)
                .expect("validated id");
            jobs.push(ClearJob {
                ptr: SendPtr(tex.data_ptr()),
                format: tex.format(),
                texels: tex.width() as usize * tex.height() as usize * tex.depth() as usize,
                value: Vec4::splat(depth),
            });
        }

        let n = self.pool.num_workers();
        self.pool.run(&|worker_id| {
            for (k, job) in jobs.iter().enumerate() {
                if k % n != worker_id {
                    continue;
                }
                // Convert once, then stamp the byte pattern over the grid.
                let bpt = job.format.bytes_per_texel();
                let mut pattern = [0u8; 32];
                // SAFETY: pattern holds any texel (max 32 bytes).
                unsafe {
                    crate::texture::write_texel_vec4(
                        pattern.as_mut_ptr(),
                        job.format,
                        1,
                        0,
                        0,
                        job.value,
                    );
                }
                for i in 0..job.texels {
                    // SAFETY: the job owns its whole texture during the
                    // dispatch; i stays below the texel count.
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            pattern.as_ptr(),
                            job.ptr.0.add(i * bpt),
                            bpt,
                        );
                    }
                }
            }
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Draw and blit
    // ------------------------------------------------------------------

    /// Executes one draw. Synchronous: the calling thread participates as
    /// worker 0 and the call returns when the framebuffer is fully written.
    pub fn draw(&mut self, mesh: &Mesh, shader: ShaderId, fbo: FboId) -> RenderResult<()> {
        // Validation phase: establish every hot-path invariant up front.
        let resolved = self.resolve_fbo(fbo)?;
        let (vbo_id, ibo_id, count) = {
            self.shaders.get(shader.0)?;
            let vao = self.vaos.get(mesh.vao.0)?;
            let vbo_id = vao.vertex_buffer().ok_or(RenderError::BadArg)?;

            if mesh.element_begin > mesh.element_end {
                return Err(RenderError::BadArg);
            }
            let count = mesh.element_end - mesh.element_begin;
            if count % mesh.mode.arity() != 0 {
                return Err(RenderError::BadArg);
            }

            let (ibo_id, max_vert) = if mesh.mode.contains(RenderMode::INDEXED) {
                let ibo_id = vao.index_buffer().ok_or(RenderError::BadArg)?;
                let ibo = self.ibos.get(ibo_id.0)?;
                if mesh.element_end > ibo.count() {
                    return Err(RenderError::BadArg);
                }
                let max_vert = if count == 0 {
                    0
                } else {
                    ibo.max_index(mesh.element_begin, mesh.element_end)
                };
                (Some(ibo_id), max_vert)
            } else {
                (None, mesh.element_end.saturating_sub(1))
            };

            let vbo = self.vbos.get(vbo_id.0)?;
            if count > 0 {
                vao.validate_extent(vbo.num_bytes(), max_vert)?;
            }
            (vbo_id, ibo_id, count)
        };

        if count == 0 {
            return Ok(());
        }

        let n = self.pool.num_workers();
        while self.bin_sets.len() < n {
            self.bin_sets.push(BinSet::new());
        }

        // Raw views first (mutable borrows), shared borrows after.
        let fbo_view = self.build_fbo_view(&resolved);

        let shader_ref = self.shaders.get(shader.0).expect("validated id");
        let uniforms = match shader_ref.ubo {
            Some(id) => self.ubos.get(id.0)?,
            None => &self.empty_ubo,
        };
        let vao = self.vaos.get(mesh.vao.0).expect("validated id");
        let vbo = self.vbos.get(vbo_id.0).expect("validated id");
        let ibo = match ibo_id {
            Some(id) => Some(self.ibos.get(id.0).expect("validated id")),
            None => None,
        };

        debug!(
            "draw: {} elements ({:?}) across {} workers into {}x{}",
            count, mesh.mode, n, resolved.width, resolved.height
        );

        let sync = DrawSync::new(n);
        let task = DrawTask {
            shader: shader_ref,
            uniforms,
            vao,
            vbo,
            ibo,
            fbo: fbo_view,
            mesh: *mesh,
            num_workers: n,
            depth_order: self.depth_order,
            sync: &sync,
            bin_sets: &self.bin_sets[..n],
        };

        self.pool.run(&|worker_id| {
            VertexWorker::new(&task, worker_id).run();
        });
        Ok(())
    }

    /// Copies (and rescales) a texture into the window backbuffer.
    pub fn blit(&mut self, window: &mut WindowBuffer, tex: TextureId) -> RenderResult<()> {
        let texture = self.textures.get(tex.0)?;
        blit_to_window(window, texture, &self.pool);
        Ok(())
    }
}

fn clamp_workers(n: usize) -> usize {
    let hw = std::thread::available_parallelism()
        .map(|v| v.get())
        .unwrap_or(1);
    n.clamp(1, hw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_survive_release_of_neighbors() {
        let mut ctx = Context::default();
        let a = ctx.create_vbo(16).unwrap();
        let b = ctx.create_vbo(16).unwrap();
        ctx.release_vbo(a).unwrap();
        assert!(ctx.vbo(b).is_ok());
        assert_eq!(ctx.vbo(a).err(), Some(RenderError::BadId));

        // The freed slot is reused with the same id value.
        let c = ctx.create_vbo(32).unwrap();
        assert_eq!(a, c);
        assert_eq!(ctx.vbo(c).unwrap().num_bytes(), 32);
    }

    #[test]
    fn shader_validation() {
        let mut ctx = Context::default();
        fn vs(_: &mut crate::shader::VertexParam) -> Vec4 {
            Vec4::ZERO
        }
        fn fs(_: &mut crate::shader::FragmentParam) -> bool {
            true
        }
        let vert = VertexShader {
            num_varyings: 1,
            cull_mode: crate::shader::CullMode::Off,
            shader: vs,
        };
        let frag = FragmentShader {
            num_varyings: 2, // more than the vertex stage provides
            num_outputs: 1,
            blend: crate::shader::BlendMode::Off,
            depth_test: false,
            depth_mask: false,
            shader: fs,
        };
        assert_eq!(
            ctx.create_shader(vert, frag, None).err(),
            Some(RenderError::BadArg)
        );
    }

    #[test]
    fn num_threads_clamps_to_at_least_one() {
        let mut ctx = Context::default();
        assert_eq!(ctx.num_threads(0), 1);
    }
}
