//! # Rasterflow Render
//!
//! A CPU-only, programmable rasterization pipeline. Vertex and fragment
//! shaders are native function pointers; geometry flows through a parallel
//! two-stage pipeline (vertex processing, clipping, and binning feeding a
//! scan-line fragment rasterizer) coordinated with nothing but atomic
//! counters. Scan-lines are interleaved across workers (`y % N`), so no pixel
//! is ever written by two threads and the hot path is lock-free.
//!
//! ## Pipeline shape
//!
//! ```text
//! draw(mesh, shader, fbo)
//!   └─ N workers, each:
//!        vertex shader -> cull -> clip -> divide -> screen map -> bins
//!        ...collective flush barrier (atomic two-phase counter)...
//!        scan-line rasterize (scalar or 4-wide) -> depth test
//!          -> fragment shader -> blend -> framebuffer
//! ```
//!
//! ## Example
//!
//! ```
//! use rasterflow_core::Vec4;
//! use rasterflow_render::prelude::*;
//!
//! fn vs(p: &mut VertexParam) -> Vec4 {
//!     let pos: [f32; 4] = p.vbo.element(p.vao.offset(0, p.vert_id));
//!     Vec4::new(pos[0], pos[1], pos[2], pos[3])
//! }
//!
//! fn fs(p: &mut FragmentParam) -> bool {
//!     p.outputs[0] = Vec4::new(1.0, 0.0, 0.0, 1.0);
//!     true
//! }
//!
//! let mut ctx = Context::default();
//! let color = ctx.create_texture(PixelFormat::RGBA_U8, 64, 64, 1).unwrap();
//! let depth = ctx.create_texture(PixelFormat::R_F32, 64, 64, 1).unwrap();
//! let fbo = ctx.create_framebuffer();
//! {
//!     let f = ctx.framebuffer_mut(fbo).unwrap();
//!     f.reserve_color_buffers(1).unwrap();
//!     f.attach_color(0, color).unwrap();
//!     f.attach_depth(depth);
//! }
//!
//! let verts: [[f32; 4]; 3] = [
//!     [-0.5, -0.5, 0.0, 1.0],
//!     [0.5, -0.5, 0.0, 1.0],
//!     [0.0, 0.5, 0.0, 1.0],
//! ];
//! let vbo = ctx.create_vbo(core::mem::size_of_val(&verts)).unwrap();
//! ctx.vbo_mut(vbo)
//!     .unwrap()
//!     .assign(bytemuck::cast_slice(&verts), 0)
//!     .unwrap();
//!
//! let vao = ctx.create_vao();
//! {
//!     let v = ctx.vao_mut(vao).unwrap();
//!     v.set_vertex_buffer(vbo);
//!     v.set_num_bindings(1);
//!     v.set_binding(0, 0, 16, Dimension::Four, DataType::F32).unwrap();
//! }
//!
//! let shader = ctx
//!     .create_shader(
//!         VertexShader { num_varyings: 0, cull_mode: CullMode::Off, shader: vs },
//!         FragmentShader {
//!             num_varyings: 0,
//!             num_outputs: 1,
//!             blend: BlendMode::Off,
//!             depth_test: true,
//!             depth_mask: true,
//!             shader: fs,
//!         },
//!         None,
//!     )
//!     .unwrap();
//!
//! ctx.clear_framebuffer(fbo, &[0], &[Vec4::new(0.0, 0.0, 0.0, 1.0)], 1.0)
//!     .unwrap();
//! let mesh = Mesh { vao, element_begin: 0, element_end: 3, mode: RenderMode::TRIANGLES };
//! ctx.draw(&mesh, shader, fbo).unwrap();
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod buffer;
pub mod context;
pub mod error;
pub mod framebuffer;
pub mod shader;
pub mod texture;
pub mod vertex_array;
pub mod window;

mod blit;
mod pipeline;
mod pool;

pub use buffer::{IndexBuffer, IndexType, UniformBuffer, VertexBuffer};
pub use context::{
    Context, ContextConfig, DepthOrder, FboId, IboId, ShaderId, TextureId, UboId, VaoId, VboId,
};
pub use error::{RenderError, RenderResult};
pub use framebuffer::{blend, Framebuffer, MAX_COLOR_ATTACHMENTS};
pub use pipeline::{Mesh, RenderMode};
pub use shader::{
    BlendMode, CullMode, FragCoord, FragmentParam, FragmentShader, FragmentShaderFn, Shader,
    VertexParam, VertexShader, VertexShaderFn, MAX_FRAG_OUTPUTS, MAX_VARYINGS,
};
pub use texture::{Channels, Elem, PixelFormat, Texture};
pub use vertex_array::{Binding, DataType, Dimension, VertexArray};
pub use window::WindowBuffer;

/// Convenience re-exports for application code.
pub mod prelude {
    pub use crate::buffer::{IndexType, UniformBuffer, VertexBuffer};
    pub use crate::context::{
        Context, ContextConfig, DepthOrder, FboId, IboId, ShaderId, TextureId, UboId, VaoId, VboId,
    };
    pub use crate::error::{RenderError, RenderResult};
    pub use crate::framebuffer::Framebuffer;
    pub use crate::pipeline::{Mesh, RenderMode};
    pub use crate::shader::{
        BlendMode, CullMode, FragCoord, FragmentParam, FragmentShader, VertexParam, VertexShader,
    };
    pub use crate::texture::{Channels, Elem, PixelFormat, Texture};
    pub use crate::vertex_array::{DataType, Dimension, VertexArray};
    pub use crate::window::WindowBuffer;
}
