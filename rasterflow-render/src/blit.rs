//! Nearest-neighbor blit from a texture into the window backbuffer.
//!
//! Source stepping uses a 16.16 fixed-point ratio per axis. Rows are flipped
//! vertically (the renderer's row 0 is the bottom of the image, the window's
//! row 0 is the top) and interleaved across the pool, `y % N == tid`.
//!
//! Two fast paths skip the format dispatch: RGBA8 sources copy 32-bit texels
//! directly, and RGBA-f32 sources saturate-convert in place. Everything else
//! goes through the normalized read path.

use crate::pool::{SendPtr, WorkerPool};
use crate::texture::{Elem, PixelFormat, Texture};
use crate::window::WindowBuffer;
use log::trace;
use rasterflow_core::Fixed16;

/// Scales `tex` into the whole window buffer.
pub(crate) fn blit_to_window(win: &mut WindowBuffer, tex: &Texture, pool: &WorkerPool) {
    let dst_w = win.width() as u32;
    let dst_h = win.height() as u32;
    let src_w = tex.width() as u32;
    let src_h = tex.height() as u32;
    let x_ratio = Fixed16::from_ratio(src_w, dst_w);
    let y_ratio = Fixed16::from_ratio(src_h, dst_h);

    trace!("blit {src_w}x{src_h} -> {dst_w}x{dst_h}");

    let out = SendPtr(win.bytes_mut().as_mut_ptr());
    let n = pool.num_workers() as u32;

    pool.run(&|worker_id| {
        let out = out;
        let mut y = worker_id as u32;
        while y < dst_h {
            let src_y = y_ratio.scale(dst_h - 1 - y) as u16;
            // SAFETY: rows are partitioned `y % N == worker_id`, and the
            // buffer outlives the dispatch.
            let row = unsafe { out.0.add(y as usize * dst_w as usize * 4) };
            blit_row(tex, src_y, x_ratio, row, dst_w);
            y += n;
        }
    });
}

/// Fills one destination row from source row `src_y`.
fn blit_row(tex: &Texture, src_y: u16, x_ratio: Fixed16, out: *mut u8, dst_w: u32) {
    let src_w = tex.width() as u32;
    match tex.format() {
        PixelFormat {
            channels: crate::texture::Channels::Rgba,
            elem: Elem::U8,
        } => {
            if src_w == dst_w && x_ratio == Fixed16::ONE {
                // Whole-row copy.
                let src = tex.row_ptr::<u32>(src_y) as *const u8;
                // SAFETY: both rows hold dst_w * 4 bytes.
                unsafe { core::ptr::copy_nonoverlapping(src, out, dst_w as usize * 4) };
            } else {
                let src = tex.row_ptr::<u32>(src_y);
                for x in 0..dst_w {
                    let sx = x_ratio.scale(x) as usize;
                    // SAFETY: sx < src_w by the ratio construction; the
                    // destination row holds dst_w texels.
                    unsafe {
                        let texel = core::ptr::read_unaligned(src.add(sx));
                        core::ptr::write_unaligned(out.add(x as usize * 4) as *mut u32, texel);
                    }
                }
            }
        }
        PixelFormat {
            channels: crate::texture::Channels::Rgba,
            elem: Elem::F32,
        } => {
            let src = tex.row_ptr::<[f32; 4]>(src_y);
            for x in 0..dst_w {
                let sx = x_ratio.scale(x) as usize;
                // SAFETY: sx < src_w; destination row holds dst_w texels.
                unsafe {
                    let texel = core::ptr::read_unaligned(src.add(sx));
                    let px = out.add(x as usize * 4);
                    for c in 0..4 {
                        *px.add(c) = (texel[c].clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
                    }
                }
            }
        }
        _ => {
            for x in 0..dst_w {
                let sx = x_ratio.scale(x) as u16;
                let v = tex.read_vec4(sx, src_y);
                // SAFETY: destination row holds dst_w texels.
                unsafe {
                    let px = out.add(x as usize * 4);
                    *px = (v.x.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
                    *px.add(1) = (v.y.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
                    *px.add(2) = (v.z.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
                    *px.add(3) = (v.w.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
                }
            }
        }
    }
}
