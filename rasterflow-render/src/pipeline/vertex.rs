//! Per-worker vertex stage.
//!
//! Worker `t` owns primitives `begin + t*arity, begin + (t+N)*arity, ...` of
//! the stream. For each one it shades the vertices (through a small
//! direct-mapped post-transform cache when the stream is indexed), applies
//! face culling and the clip-space visibility test, clips partially visible
//! triangles, performs the perspective divide and screen mapping, and queues
//! the assembled primitive into its bin array.

use crate::pipeline::bins;
use crate::pipeline::clip::{clip_triangle, ClipVert, MAX_CLIP_VERTS};
use crate::pipeline::raster::FragmentProcessor;
use crate::pipeline::{DrawTask, FragmentBin, RenderMode, PTV_CACHE_SIZE};
use crate::shader::{CullMode, VertexParam, MAX_VARYINGS};
use rasterflow_core::Vec4;
use std::sync::atomic::Ordering;

/// Clip-space visibility of a triangle.
enum Visibility {
    Full,
    Partial,
    None,
}

/// Direct-mapped post-transform-vertex cache, scoped to one stream pass.
struct PtvCache {
    keys: [u32; PTV_CACHE_SIZE],
    pos: [Vec4; PTV_CACHE_SIZE],
    varyings: [[Vec4; MAX_VARYINGS]; PTV_CACHE_SIZE],
}

impl PtvCache {
    fn new() -> Self {
        Self {
            keys: [u32::MAX; PTV_CACHE_SIZE],
            pos: [Vec4::ZERO; PTV_CACHE_SIZE],
            varyings: [[Vec4::ZERO; MAX_VARYINGS]; PTV_CACHE_SIZE],
        }
    }
}

/// 3x3 determinant over the `(x, y, w)` lanes of three clip-space vertices.
#[inline(always)]
fn det3(a: Vec4, b: Vec4, c: Vec4) -> f32 {
    a.x * (b.y * c.w - c.y * b.w) - a.y * (b.x * c.w - c.x * b.w) + a.w * (b.x * c.y - c.x * b.y)
}

/// One worker's vertex stage for one draw.
pub(crate) struct VertexWorker<'t> {
    task: &'t DrawTask<'t>,
    worker_id: usize,
    frag: FragmentProcessor<'t>,
    cache: PtvCache,
    half_w: f32,
    half_h: f32,
}

impl<'t> VertexWorker<'t> {
    pub(crate) fn new(task: &'t DrawTask<'t>, worker_id: usize) -> Self {
        Self {
            task,
            worker_id,
            frag: FragmentProcessor::new(task),
            cache: PtvCache::new(),
            half_w: task.fbo.width as f32 * 0.5,
            half_h: task.fbo.height as f32 * 0.5,
        }
    }

    /// Runs the stage to completion, including the end-of-draw flush.
    pub(crate) fn run(&mut self) {
        let mesh = self.task.mesh;
        let arity = mesh.mode.arity();
        let step = self.task.num_workers as u32 * arity;
        let begin = mesh.element_begin + self.worker_id as u32 * arity;
        let end = mesh.element_end;

        if mesh.mode.contains(RenderMode::TRIANGLES) {
            let mut i = begin;
            while i < end {
                self.poll_flush();
                let ids = self.fetch3(i);
                self.process_triangle(ids);
                i += step;
            }
        } else if mesh.mode.contains(RenderMode::LINES) {
            let mut i = begin;
            while i < end {
                self.poll_flush();
                let v0 = self.fetch(i);
                let v1 = self.fetch(i + 1);
                self.process_line(v0, v1);
                i += step;
            }
        } else {
            let mut i = begin;
            while i < end {
                self.poll_flush();
                let vid = self.fetch(i);
                self.process_point(vid);
                i += step;
            }
        }

        // Producing is done. Keep joining flush epochs until one runs with
        // every producer idle; that epoch drains the remaining bins and every
        // participant observes it as final (the busy counter is stable inside
        // an epoch, so all workers agree).
        let sync = self.task.sync;
        sync.busy.fetch_sub(1, Ordering::AcqRel);
        loop {
            if sync.flush.load(Ordering::Acquire) > 0 || sync.busy.load(Ordering::Acquire) == 0 {
                if bins::flush_bins(self.task, self.worker_id, &mut self.frag) {
                    break;
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Joins an in-progress flush between primitives so a worker blocked on a
    /// full bin array is never stalled behind this one. Never the final
    /// epoch: this worker still counts as busy.
    #[inline(always)]
    fn poll_flush(&mut self) {
        if self.task.sync.flush.load(Ordering::Acquire) > 0 {
            let _ = bins::flush_bins(self.task, self.worker_id, &mut self.frag);
        }
    }

    /// Element -> vertex id, through the index buffer when present.
    #[inline(always)]
    fn fetch(&self, i: u32) -> u32 {
        match self.task.ibo {
            Some(ibo) => ibo.index(i),
            None => i,
        }
    }

    #[inline(always)]
    fn fetch3(&self, i: u32) -> [u32; 3] {
        match self.task.ibo {
            Some(ibo) => ibo.index3(i),
            None => [i, i + 1, i + 2],
        }
    }

    /// Invokes the vertex shader for `vert_id`.
    fn shade(&self, vert_id: u32) -> (Vec4, [Vec4; MAX_VARYINGS]) {
        let mut varyings = [Vec4::ZERO; MAX_VARYINGS];
        let mut param = VertexParam {
            uniforms: self.task.uniforms,
            vao: self.task.vao,
            vbo: self.task.vbo,
            vert_id,
            instance_id: 0,
            varyings: &mut varyings,
        };
        let pos = (self.task.shader.vert.shader)(&mut param);
        (pos, varyings)
    }

    /// Shades through the PTV cache; only worthwhile for indexed streams
    /// where vertex ids repeat.
    fn shade_cached(&mut self, vert_id: u32) -> (Vec4, [Vec4; MAX_VARYINGS]) {
        let slot = vert_id as usize & (PTV_CACHE_SIZE - 1);
        if self.cache.keys[slot] == vert_id {
            return (self.cache.pos[slot], self.cache.varyings[slot]);
        }
        let (pos, varyings) = self.shade(vert_id);
        self.cache.keys[slot] = vert_id;
        self.cache.pos[slot] = pos;
        self.cache.varyings[slot] = varyings;
        (pos, varyings)
    }

    fn process_point(&mut self, vert_id: u32) {
        let (pos, varyings) = self.shade(vert_id);
        // Points skip culling and clipping entirely.
        if pos.w > 0.0 {
            self.emit_point(pos, varyings);
        }
    }

    fn process_line(&mut self, v0: u32, v1: u32) {
        let (p0, var0) = self.shade(v0);
        let (p1, var1) = self.shade(v1);
        if p0.w >= 0.0 && p1.w >= 0.0 {
            self.emit_line((p0, var0), (p1, var1));
        }
    }

    fn process_triangle(&mut self, ids: [u32; 3]) {
        let indexed = self.task.ibo.is_some();
        let (p0, var0) = if indexed {
            self.shade_cached(ids[0])
        } else {
            self.shade(ids[0])
        };
        let (p1, var1) = if indexed {
            self.shade_cached(ids[1])
        } else {
            self.shade(ids[1])
        };
        let (p2, var2) = if indexed {
            self.shade_cached(ids[2])
        } else {
            self.shade(ids[2])
        };

        // Winding test in clip space; positive is back-facing.
        let det = det3(p0, p2, p1);
        match self.task.shader.vert.cull_mode {
            CullMode::Back if det > 0.0 => return,
            CullMode::Front if det < 0.0 => return,
            _ => {}
        }

        match Self::visibility(p0, p1, p2) {
            Visibility::None => {}
            Visibility::Full => {
                self.emit_triangle([(p0, var0), (p1, var1), (p2, var2)]);
            }
            Visibility::Partial => {
                let tri = [
                    ClipVert {
                        pos: p0,
                        varyings: var0,
                    },
                    ClipVert {
                        pos: p1,
                        varyings: var1,
                    },
                    ClipVert {
                        pos: p2,
                        varyings: var2,
                    },
                ];
                let mut poly = [ClipVert::default(); MAX_CLIP_VERTS];
                let count =
                    clip_triangle(&tri, self.task.shader.vert.num_varyings as usize, &mut poly);
                // Fan-triangulate around vertex 0.
                for i in 1..count.saturating_sub(1) {
                    self.emit_triangle([
                        (poly[0].pos, poly[0].varyings),
                        (poly[i].pos, poly[i].varyings),
                        (poly[i + 1].pos, poly[i + 1].varyings),
                    ]);
                }
            }
        }
    }

    fn visibility(p0: Vec4, p1: Vec4, p2: Vec4) -> Visibility {
        #[inline(always)]
        fn inside(v: Vec4) -> bool {
            if !(v.x.abs() <= v.w && v.y.abs() <= v.w) {
                return false;
            }
            #[cfg(feature = "z-clip")]
            if v.z.abs() > v.w {
                return false;
            }
            true
        }

        if inside(p0) && inside(p1) && inside(p2) {
            Visibility::Full
        } else if p0.w <= 0.0 && p1.w <= 0.0 && p2.w <= 0.0 {
            Visibility::None
        } else {
            Visibility::Partial
        }
    }

    /// Perspective divide plus viewport mapping. The result carries pixel
    /// x/y, depth z, and the reciprocal clip-space w in the last lane.
    #[inline(always)]
    fn to_screen(&self, c: Vec4) -> Vec4 {
        let iw = 1.0 / c.w;
        let sx = (self.half_w + c.x * iw * self.half_w).floor().max(0.0);
        let sy = (self.half_h + c.y * iw * self.half_h).floor().max(0.0);
        Vec4::new(sx, sy, c.z * iw, iw)
    }

    fn emit_point(&mut self, pos: Vec4, varyings: [Vec4; MAX_VARYINGS]) {
        let s = self.to_screen(pos);
        if !s.is_finite() {
            return;
        }
        let bin = FragmentBin {
            screen: [s, s, s],
            bary: [Vec4::ZERO; 3],
            varyings: [varyings, varyings, varyings],
            min_z: s.z,
        };
        bins::push_bin(self.task, self.worker_id, &mut self.frag, bin);
    }

    fn emit_line(&mut self, a: (Vec4, [Vec4; MAX_VARYINGS]), b: (Vec4, [Vec4; MAX_VARYINGS])) {
        let s0 = self.to_screen(a.0);
        let s1 = self.to_screen(b.0);
        if !s0.is_finite() || !s1.is_finite() {
            return;
        }
        let bin = FragmentBin {
            screen: [s0, s1, s1],
            bary: [Vec4::ZERO; 3],
            varyings: [a.1, b.1, b.1],
            min_z: s0.z.min(s1.z),
        };
        bins::push_bin(self.task, self.worker_id, &mut self.frag, bin);
    }

    fn emit_triangle(&mut self, verts: [(Vec4, [Vec4; MAX_VARYINGS]); 3]) {
        let s0 = self.to_screen(verts[0].0);
        let s1 = self.to_screen(verts[1].0);
        let s2 = self.to_screen(verts[2].0);
        if !s0.is_finite() || !s1.is_finite() || !s2.is_finite() {
            return;
        }

        // Affine barycentric coefficient rows over screen x/y:
        // bc(x, y) = bary[0]*x + bary[1]*y + bary[2], with bc summing to 1.
        let den = (s1.x - s0.x) * (s2.y - s0.y) - (s2.x - s0.x) * (s1.y - s0.y);
        if den == 0.0 {
            // Zero screen-space area; nothing to scan.
            return;
        }
        let inv = 1.0 / den;
        let bary = [
            Vec4::new(
                (s1.y - s2.y) * inv,
                (s2.y - s0.y) * inv,
                (s0.y - s1.y) * inv,
                0.0,
            ),
            Vec4::new(
                (s2.x - s1.x) * inv,
                (s0.x - s2.x) * inv,
                (s1.x - s0.x) * inv,
                0.0,
            ),
            Vec4::new(
                (s1.x * s2.y - s2.x * s1.y) * inv,
                (s2.x * s0.y - s0.x * s2.y) * inv,
                (s0.x * s1.y - s1.x * s0.y) * inv,
                0.0,
            ),
        ];

        let bin = FragmentBin {
            screen: [s0, s1, s2],
            bary,
            varyings: [verts[0].1, verts[1].1, verts[2].1],
            min_z: s0.z.min(s1.z).min(s2.z),
        };
        bins::push_bin(self.task, self.worker_id, &mut self.frag, bin);
    }
}
