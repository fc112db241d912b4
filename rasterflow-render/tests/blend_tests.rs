//! Blending modes and back-to-front ordering of translucent geometry.

use rasterflow_core::Vec4;
use rasterflow_render::prelude::*;

const STRIDE: usize = 32;

fn make_float_target(ctx: &mut Context, w: u16, h: u16) -> (TextureId, FboId) {
    let color = ctx.create_texture(PixelFormat::RGBA_F32, w, h, 1).unwrap();
    let depth = ctx.create_texture(PixelFormat::R_F32, w, h, 1).unwrap();
    let fbo = ctx.create_framebuffer();
    let f = ctx.framebuffer_mut(fbo).unwrap();
    f.reserve_color_buffers(1).unwrap();
    f.attach_color(0, color).unwrap();
    f.attach_depth(depth);
    (color, fbo)
}

fn make_mesh(ctx: &mut Context, verts: &[([f32; 4], [f32; 4])]) -> VaoId {
    let mut bytes = Vec::with_capacity(verts.len() * STRIDE);
    for (pos, col) in verts {
        bytes.extend_from_slice(bytemuck::cast_slice(pos));
        bytes.extend_from_slice(bytemuck::cast_slice(col));
    }
    let vbo = ctx.create_vbo(bytes.len()).unwrap();
    ctx.vbo_mut(vbo).unwrap().assign(&bytes, 0).unwrap();
    let vao = ctx.create_vao();
    let v = ctx.vao_mut(vao).unwrap();
    v.set_vertex_buffer(vbo);
    v.set_num_bindings(2);
    v.set_binding(0, 0, STRIDE, Dimension::Four, DataType::F32)
        .unwrap();
    v.set_binding(1, 16, STRIDE, Dimension::Four, DataType::F32)
        .unwrap();
    vao
}

fn vs(p: &mut VertexParam) -> Vec4 {
    let pos: [f32; 4] = p.vbo.element(p.vao.offset(0, p.vert_id));
    let col: [f32; 4] = p.vbo.element(p.vao.offset(1, p.vert_id));
    p.varyings[0] = Vec4::new(col[0], col[1], col[2], col[3]);
    Vec4::new(pos[0], pos[1], pos[2], pos[3])
}

fn fs(p: &mut FragmentParam) -> bool {
    p.outputs[0] = p.varyings[0];
    true
}

fn blend_shader(ctx: &mut Context, blend: BlendMode) -> ShaderId {
    ctx.create_shader(
        VertexShader {
            num_varyings: 1,
            cull_mode: CullMode::Off,
            shader: vs,
        },
        FragmentShader {
            num_varyings: 1,
            num_outputs: 1,
            blend,
            depth_test: true,
            depth_mask: false,
            shader: fs,
        },
        None,
    )
    .unwrap()
}

/// Lower-left half-screen triangle at depth `z`.
fn tri(z: f32, color: [f32; 4]) -> [([f32; 4], [f32; 4]); 3] {
    [
        ([-1.0, -1.0, z, 1.0], color),
        ([1.0, -1.0, z, 1.0], color),
        ([-1.0, 1.0, z, 1.0], color),
    ]
}

#[test]
fn alpha_blending_is_back_to_front() {
    let mut ctx = Context::default();
    let (color, fbo) = make_float_target(&mut ctx, 4, 4);
    let shader = blend_shader(&mut ctx, BlendMode::Alpha);
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::new(0.0, 0.0, 0.0, 1.0)], 1.0)
        .unwrap();

    // Red is nearer (0.2) but appears first in the stream; the binning layer
    // must still composite blue (0.5) first.
    let mut verts = Vec::new();
    verts.extend(tri(0.2, [1.0, 0.0, 0.0, 0.5]));
    verts.extend(tri(0.5, [0.0, 0.0, 1.0, 0.5]));
    let vao = make_mesh(&mut ctx, &verts);

    let mesh = Mesh {
        vao,
        element_begin: 0,
        element_end: 6,
        mode: RenderMode::TRIANGLES,
    };
    ctx.draw(&mesh, shader, fbo).unwrap();

    // blue over black: (0, 0, 0.5); red over that: (0.5, 0, 0.25).
    let got = ctx.texture(color).unwrap().read_vec4(1, 1);
    assert_eq!(got.x, 0.5);
    assert_eq!(got.y, 0.0);
    assert_eq!(got.z, 0.25);
}

#[test]
fn additive_blending_accumulates() {
    let mut ctx = Context::default();
    let (color, fbo) = make_float_target(&mut ctx, 4, 4);
    let shader = blend_shader(&mut ctx, BlendMode::Additive);
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::ZERO], 1.0).unwrap();

    let mut verts = Vec::new();
    verts.extend(tri(0.2, [0.25, 0.0, 0.125, 1.0]));
    verts.extend(tri(0.5, [0.25, 0.5, 0.125, 1.0]));
    let vao = make_mesh(&mut ctx, &verts);

    let mesh = Mesh {
        vao,
        element_begin: 0,
        element_end: 6,
        mode: RenderMode::TRIANGLES,
    };
    ctx.draw(&mesh, shader, fbo).unwrap();

    let got = ctx.texture(color).unwrap().read_vec4(0, 0);
    assert_eq!(got.x, 0.5);
    assert_eq!(got.y, 0.5);
    assert_eq!(got.z, 0.25);
}

#[test]
fn screen_blending_matches_formula() {
    let mut ctx = Context::default();
    let (color, fbo) = make_float_target(&mut ctx, 4, 4);
    let shader = blend_shader(&mut ctx, BlendMode::Screen);
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::new(0.5, 0.0, 0.25, 1.0)], 1.0)
        .unwrap();

    let verts = tri(0.2, [0.5, 1.0, 0.0, 1.0]);
    let vao = make_mesh(&mut ctx, &verts);
    let mesh = Mesh {
        vao,
        element_begin: 0,
        element_end: 3,
        mode: RenderMode::TRIANGLES,
    };
    ctx.draw(&mesh, shader, fbo).unwrap();

    // 1 - (1 - dst)(1 - src)
    let got = ctx.texture(color).unwrap().read_vec4(0, 0);
    assert_eq!(got.x, 0.75);
    assert_eq!(got.y, 1.0);
    assert_eq!(got.z, 0.25);
}

#[test]
fn discarded_fragments_leave_no_trace() {
    fn fs_discard(p: &mut FragmentParam) -> bool {
        p.outputs[0] = Vec4::splat(1.0);
        false
    }

    let mut ctx = Context::default();
    let (color, fbo) = make_float_target(&mut ctx, 4, 4);
    let shader = ctx
        .create_shader(
            VertexShader {
                num_varyings: 0,
                cull_mode: CullMode::Off,
                shader: vs,
            },
            FragmentShader {
                num_varyings: 0,
                num_outputs: 1,
                blend: BlendMode::Off,
                depth_test: true,
                depth_mask: true,
                shader: fs_discard,
            },
            None,
        )
        .unwrap();
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::ZERO], 1.0).unwrap();

    let verts = tri(0.2, [1.0; 4]);
    let vao = make_mesh(&mut ctx, &verts);
    let mesh = Mesh {
        vao,
        element_begin: 0,
        element_end: 3,
        mode: RenderMode::TRIANGLES,
    };
    ctx.draw(&mesh, shader, fbo).unwrap();

    let tex = ctx.texture(color).unwrap();
    for y in 0..4u16 {
        for x in 0..4u16 {
            assert_eq!(tex.read_vec4(x, y), Vec4::new(0.0, 0.0, 0.0, 1.0));
        }
    }
}
