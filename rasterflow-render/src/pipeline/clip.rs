//! Sutherland-Hodgman polygon clipping against the view frustum.
//!
//! Planes are vec4 coefficient rows; a clip-space point `P` is inside plane
//! `E` iff `dot(P, E) >= 0`. The six rows encode `|x| <= w`, `|y| <= w`,
//! `|z| <= w`. With the `z-clip` feature off only the four side planes apply.
//!
//! Varyings are interpolated linearly in clip space by the same edge
//! parameter as positions; the fragment stage applies perspective correction
//! afterwards.

use crate::shader::MAX_VARYINGS;
use rasterflow_core::Vec4;

/// A triangle clipped against the frustum grows at most one vertex per
/// plane: 3 + 6 = 9.
pub(crate) const MAX_CLIP_VERTS: usize = 9;

/// One polygon corner mid-clip: position plus its varyings.
#[derive(Copy, Clone)]
pub(crate) struct ClipVert {
    pub pos: Vec4,
    pub varyings: [Vec4; MAX_VARYINGS],
}

impl Default for ClipVert {
    fn default() -> Self {
        Self {
            pos: Vec4::ZERO,
            varyings: [Vec4::ZERO; MAX_VARYINGS],
        }
    }
}

#[cfg(feature = "z-clip")]
const FRUSTUM_PLANES: [Vec4; 6] = [
    Vec4::new(1.0, 0.0, 0.0, 1.0),
    Vec4::new(-1.0, 0.0, 0.0, 1.0),
    Vec4::new(0.0, 1.0, 0.0, 1.0),
    Vec4::new(0.0, -1.0, 0.0, 1.0),
    Vec4::new(0.0, 0.0, 1.0, 1.0),
    Vec4::new(0.0, 0.0, -1.0, 1.0),
];

#[cfg(not(feature = "z-clip"))]
const FRUSTUM_PLANES: [Vec4; 4] = [
    Vec4::new(1.0, 0.0, 0.0, 1.0),
    Vec4::new(-1.0, 0.0, 0.0, 1.0),
    Vec4::new(0.0, 1.0, 0.0, 1.0),
    Vec4::new(0.0, -1.0, 0.0, 1.0),
];

/// Clips a triangle, returning the surviving polygon's vertex count.
///
/// The polygon lands in `out` fan-ready: the caller triangulates around
/// `out[0]`. Fewer than 3 vertices means the triangle was eliminated.
pub(crate) fn clip_triangle(
    tri: &[ClipVert; 3],
    num_varyings: usize,
    out: &mut [ClipVert; MAX_CLIP_VERTS],
) -> usize {
    let mut ping = [ClipVert::default(); MAX_CLIP_VERTS];
    let mut pong = [ClipVert::default(); MAX_CLIP_VERTS];
    ping[..3].copy_from_slice(tri);
    let mut count = 3usize;
    let mut cur = &mut ping;
    let mut next = &mut pong;

    for plane in FRUSTUM_PLANES {
        if count < 3 {
            break;
        }
        let mut emitted = 0usize;
        for i in 0..count {
            let a = cur[i];
            let b = cur[(i + 1) % count];
            let ta = a.pos.dot(plane);
            let tb = b.pos.dot(plane);
            let a_in = ta >= 0.0;
            let b_in = tb >= 0.0;

            if a_in != b_in {
                // Edge crosses the plane; emit the intersection.
                let t = ta / (ta - tb);
                let mut v = ClipVert {
                    pos: a.pos.mix(b.pos, t),
                    varyings: a.varyings,
                };
                for k in 0..num_varyings {
                    v.varyings[k] = a.varyings[k].mix(b.varyings[k], t);
                }
                debug_assert!(emitted < MAX_CLIP_VERTS);
                next[emitted] = v;
                emitted += 1;
            }
            if b_in {
                debug_assert!(emitted < MAX_CLIP_VERTS);
                next[emitted] = b;
                emitted += 1;
            }
        }
        count = emitted;
        core::mem::swap(&mut cur, &mut next);
    }

    out[..count].copy_from_slice(&cur[..count]);
    count
}
