//! Barycentric and perspective-correct interpolation against closed-form
//! expectations, on float color attachments so no quantization intervenes.

use rasterflow_core::Vec4;
use rasterflow_render::prelude::*;

fn make_float_target(ctx: &mut Context, w: u16, h: u16) -> (TextureId, TextureId, FboId) {
    let color = ctx.create_texture(PixelFormat::RGBA_F32, w, h, 1).unwrap();
    let depth = ctx.create_texture(PixelFormat::R_F32, w, h, 1).unwrap();
    let fbo = ctx.create_framebuffer();
    let f = ctx.framebuffer_mut(fbo).unwrap();
    f.reserve_color_buffers(1).unwrap();
    f.attach_color(0, color).unwrap();
    f.attach_depth(depth);
    (color, depth, fbo)
}

fn upload_positions(ctx: &mut Context, verts: &[[f32; 4]]) -> VaoId {
    let vbo = ctx.create_vbo(verts.len() * 16).unwrap();
    ctx.vbo_mut(vbo)
        .unwrap()
        .assign(bytemuck::cast_slice(verts), 0)
        .unwrap();
    let vao = ctx.create_vao();
    let v = ctx.vao_mut(vao).unwrap();
    v.set_vertex_buffer(vbo);
    v.set_num_bindings(1);
    v.set_binding(0, 0, 16, Dimension::Four, DataType::F32)
        .unwrap();
    vao
}

/// Affine screen-space barycentrics of pixel `(x, y)` in a triangle.
fn affine_bary(s: [[f32; 2]; 3], x: f32, y: f32) -> [f32; 3] {
    let den = (s[1][0] - s[0][0]) * (s[2][1] - s[0][1]) - (s[2][0] - s[0][0]) * (s[1][1] - s[0][1]);
    let l0 = ((s[1][0] - s[2][0]) * (y - s[2][1]) - (s[1][1] - s[2][1]) * (x - s[2][0])) / den;
    let l1 = ((s[2][0] - s[0][0]) * (y - s[0][1]) - (s[2][1] - s[0][1]) * (x - s[0][0])) / den;
    [l0, l1, 1.0 - l0 - l1]
}

/// Writes the vertex id into varying 0.
fn vs_vert_id(p: &mut VertexParam) -> Vec4 {
    let pos: [f32; 4] = p.vbo.element(p.vao.offset(0, p.vert_id));
    p.varyings[0] = Vec4::splat(p.vert_id as f32);
    Vec4::new(pos[0], pos[1], pos[2], pos[3])
}

/// Forwards interpolated varying 0 as the color output.
fn fs_forward(p: &mut FragmentParam) -> bool {
    p.outputs[0] = p.varyings[0];
    true
}

fn forward_shader(ctx: &mut Context, vs: rasterflow_render::VertexShaderFn) -> ShaderId {
    ctx.create_shader(
        VertexShader {
            num_varyings: 1,
            cull_mode: CullMode::Off,
            shader: vs,
        },
        FragmentShader {
            num_varyings: 1,
            num_outputs: 1,
            blend: BlendMode::Off,
            depth_test: true,
            depth_mask: true,
            shader: fs_forward,
        },
        None,
    )
    .unwrap()
}

#[test]
fn perspective_correction_diverges_from_screen_space_mean() {
    const SIZE: u16 = 16;
    let mut ctx = Context::default();
    let (color, _, fbo) = make_float_target(&mut ctx, SIZE, SIZE);

    // Vertex 2 sits ten times deeper; its clip position is scaled by w = 10
    // so all three land on the same full-viewport screen triangle.
    let w2 = 10.0f32;
    let verts: Vec<[f32; 4]> = vec![
        [-1.0, -1.0, 0.0, 1.0],
        [1.0, -1.0, 0.0, 1.0],
        [-w2, w2, 0.0, w2],
    ];
    let vao = upload_positions(&mut ctx, &verts);
    let shader = forward_shader(&mut ctx, vs_vert_id);
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::ZERO], 1.0).unwrap();

    let mesh = Mesh {
        vao,
        element_begin: 0,
        element_end: 3,
        mode: RenderMode::TRIANGLES,
    };
    ctx.draw(&mesh, shader, fbo).unwrap();

    // Screen triangle (0,0), (16,0), (0,16); sample near the 2D centroid.
    let (px, py) = (5u16, 5u16);
    let bc = affine_bary([[0.0, 0.0], [16.0, 0.0], [0.0, 16.0]], px as f32, py as f32);

    let screen_mean = bc[1] + 2.0 * bc[2];
    let inv_w = [1.0, 1.0, 1.0 / w2];
    let persp_den = bc[0] * inv_w[0] + bc[1] * inv_w[1] + bc[2] * inv_w[2];
    let persp_mean = (bc[1] * inv_w[1] + 2.0 * bc[2] * inv_w[2]) / persp_den;

    let got = ctx.texture(color).unwrap().read_vec4(px, py).x;
    assert!(
        (got - persp_mean).abs() < 1e-4,
        "got {got}, expected perspective-correct {persp_mean}"
    );
    assert!(
        (persp_mean - screen_mean).abs() / screen_mean >= 0.10,
        "test triangle is not perspective-skewed enough: {persp_mean} vs {screen_mean}"
    );
    assert!((got - screen_mean).abs() / screen_mean >= 0.10);
}

#[test]
fn passthrough_varying_matches_barycentric_mean() {
    const SIZE: u16 = 8;
    let mut ctx = Context::default();
    let (color, _, fbo) = make_float_target(&mut ctx, SIZE, SIZE);

    let verts: Vec<[f32; 4]> = vec![
        [-1.0, -1.0, 0.0, 1.0],
        [1.0, -1.0, 0.0, 1.0],
        [-1.0, 1.0, 0.0, 1.0],
    ];
    let vao = upload_positions(&mut ctx, &verts);
    let shader = forward_shader(&mut ctx, vs_vert_id);
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::ZERO], 1.0).unwrap();

    let mesh = Mesh {
        vao,
        element_begin: 0,
        element_end: 3,
        mode: RenderMode::TRIANGLES,
    };
    ctx.draw(&mesh, shader, fbo).unwrap();

    // Equal w: perspective correction reduces to the affine weights.
    let tex = ctx.texture(color).unwrap();
    for y in 0..SIZE {
        for x in 0..SIZE {
            if (x + y) as i32 >= SIZE as i32 {
                continue; // outside the lower-left triangle
            }
            let bc = affine_bary(
                [[0.0, 0.0], [8.0, 0.0], [0.0, 8.0]],
                x as f32,
                y as f32,
            );
            let want = bc[1] + 2.0 * bc[2];
            let got = tex.read_vec4(x, y).x;
            assert!(
                (got - want).abs() < 1e-5,
                "pixel ({x}, {y}): got {got}, want {want}"
            );
        }
    }
}

#[test]
fn barycentrics_sum_to_one_via_constant_varyings() {
    // If every vertex carries 1.0, any affine combination with weights
    // summing to 1 returns 1.0; deviations expose broken barycentrics.
    fn vs_one(p: &mut VertexParam) -> Vec4 {
        let pos: [f32; 4] = p.vbo.element(p.vao.offset(0, p.vert_id));
        p.varyings[0] = Vec4::splat(1.0);
        Vec4::new(pos[0], pos[1], pos[2], pos[3])
    }

    const SIZE: u16 = 32;
    let mut ctx = Context::default();
    let (color, _, fbo) = make_float_target(&mut ctx, SIZE, SIZE);

    let verts: Vec<[f32; 4]> = vec![
        [-0.9, -0.7, 0.0, 1.0],
        [0.8, -0.9, 0.0, 1.0],
        [-0.1, 0.9, 0.0, 1.0],
    ];
    let vao = upload_positions(&mut ctx, &verts);
    let shader = forward_shader(&mut ctx, vs_one);
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::ZERO], 1.0).unwrap();

    let mesh = Mesh {
        vao,
        element_begin: 0,
        element_end: 3,
        mode: RenderMode::TRIANGLES,
    };
    ctx.draw(&mesh, shader, fbo).unwrap();

    let tex = ctx.texture(color).unwrap();
    let mut covered = 0;
    for y in 0..SIZE {
        for x in 0..SIZE {
            let v = tex.read_vec4(x, y).x;
            if v != 0.0 {
                covered += 1;
                assert!((v - 1.0).abs() <= 4.0 * f32::EPSILON, "pixel ({x}, {y}): {v}");
            }
        }
    }
    assert!(covered > 100, "triangle rasterized only {covered} pixels");
}
