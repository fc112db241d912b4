//! Blitter: clear/blit round-trips, Y flip, resize, and format conversion.

use rasterflow_core::Vec4;
use rasterflow_render::prelude::*;

fn target_with_format(
    ctx: &mut Context,
    format: PixelFormat,
    w: u16,
    h: u16,
) -> (TextureId, FboId) {
    let color = ctx.create_texture(format, w, h, 1).unwrap();
    let depth = ctx.create_texture(PixelFormat::R_F32, w, h, 1).unwrap();
    let fbo = ctx.create_framebuffer();
    let f = ctx.framebuffer_mut(fbo).unwrap();
    f.reserve_color_buffers(1).unwrap();
    f.attach_color(0, color).unwrap();
    f.attach_depth(depth);
    (color, fbo)
}

#[test]
fn clear_then_blit_reproduces_clear_color_exactly() {
    let mut ctx = Context::default();
    let (color, fbo) = target_with_format(&mut ctx, PixelFormat::RGBA_U8, 16, 16);
    let clear = Vec4::new(0.2, 0.4, 0.6, 1.0);
    ctx.clear_framebuffer(fbo, &[0], &[clear], 1.0).unwrap();

    let expected: [u8; 4] = ctx.texture(color).unwrap().texel(0, 0);

    let mut win = WindowBuffer::new(16, 16).unwrap();
    ctx.blit(&mut win, color).unwrap();
    for y in 0..16u16 {
        for x in 0..16u16 {
            assert_eq!(win.pixel(x, y), expected, "({x}, {y})");
        }
    }
}

#[test]
fn blit_flips_vertically() {
    let mut ctx = Context::default();
    let (color, fbo) = target_with_format(&mut ctx, PixelFormat::RGBA_U8, 4, 4);
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::new(0.0, 0.0, 0.0, 1.0)], 1.0)
        .unwrap();
    // Texture row 3 is the top of the image and must land on window row 0.
    ctx.texture_mut(color)
        .unwrap()
        .set_texel::<[u8; 4]>(1, 3, [255, 0, 0, 255]);

    let mut win = WindowBuffer::new(4, 4).unwrap();
    ctx.blit(&mut win, color).unwrap();
    assert_eq!(win.pixel(1, 0), [255, 0, 0, 255]);
    assert_eq!(win.pixel(1, 3), [0, 0, 0, 255]);
}

#[test]
fn blit_upscales_with_nearest_neighbor() {
    let mut ctx = Context::default();
    let (color, fbo) = target_with_format(&mut ctx, PixelFormat::RGBA_U8, 2, 2);
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::new(0.0, 0.0, 0.0, 1.0)], 1.0)
        .unwrap();
    let tex = ctx.texture_mut(color).unwrap();
    tex.set_texel::<[u8; 4]>(0, 0, [255, 0, 0, 255]);
    tex.set_texel::<[u8; 4]>(1, 0, [0, 255, 0, 255]);
    tex.set_texel::<[u8; 4]>(0, 1, [0, 0, 255, 255]);
    tex.set_texel::<[u8; 4]>(1, 1, [255, 255, 255, 255]);

    let mut win = WindowBuffer::new(4, 4).unwrap();
    ctx.blit(&mut win, color).unwrap();

    // Each source texel expands to a 2x2 block; texture row 1 is on top.
    assert_eq!(win.pixel(0, 0), [0, 0, 255, 255]);
    assert_eq!(win.pixel(3, 0), [255, 255, 255, 255]);
    assert_eq!(win.pixel(0, 3), [255, 0, 0, 255]);
    assert_eq!(win.pixel(3, 3), [0, 255, 0, 255]);
}

#[test]
fn blit_converts_float_colors_with_saturation() {
    let mut ctx = Context::default();
    let (color, fbo) = target_with_format(&mut ctx, PixelFormat::RGBA_F32, 4, 4);
    // Out-of-range components must clamp, not wrap.
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::new(1.5, -0.25, 0.5, 1.0)], 1.0)
        .unwrap();

    let mut win = WindowBuffer::new(4, 4).unwrap();
    ctx.blit(&mut win, color).unwrap();
    assert_eq!(win.pixel(2, 2), [255, 0, 128, 255]);
}

#[test]
fn blit_handles_narrow_formats() {
    let mut ctx = Context::default();
    let (color, fbo) = target_with_format(
        &mut ctx,
        PixelFormat::new(Channels::Rg, Elem::U16),
        4,
        4,
    );
    ctx.clear_framebuffer(fbo, &[0], &[Vec4::new(1.0, 0.5, 0.9, 0.9)], 1.0)
        .unwrap();

    let mut win = WindowBuffer::new(4, 4).unwrap();
    ctx.blit(&mut win, color).unwrap();
    // Missing channels read as blue 0, alpha 1.
    let px = win.pixel(0, 0);
    assert_eq!(px[0], 255);
    assert_eq!(px[3], 255);
    assert_eq!(px[2], 0);
    assert!((px[1] as i32 - 128).abs() <= 1);
}

#[test]
fn blit_f32_matches_u8_source_pixels() {
    // The same clear through the f32 fast path and the u8 fast path agree.
    let clear = Vec4::new(0.25, 0.5, 0.75, 1.0);

    let mut ctx = Context::default();
    let (color_u8, fbo_u8) = target_with_format(&mut ctx, PixelFormat::RGBA_U8, 8, 8);
    ctx.clear_framebuffer(fbo_u8, &[0], &[clear], 1.0).unwrap();
    let mut win_u8 = WindowBuffer::new(8, 8).unwrap();
    ctx.blit(&mut win_u8, color_u8).unwrap();

    let (color_f32, fbo_f32) = target_with_format(&mut ctx, PixelFormat::RGBA_F32, 8, 8);
    ctx.clear_framebuffer(fbo_f32, &[0], &[clear], 1.0).unwrap();
    let mut win_f32 = WindowBuffer::new(8, 8).unwrap();
    ctx.blit(&mut win_f32, color_f32).unwrap();

    assert_eq!(win_u8.pixel(3, 3), win_f32.pixel(3, 3));
}
