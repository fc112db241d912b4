//! Scan-line fragment stage.
//!
//! A fragment processor rasterizes published bins for one flush epoch,
//! handling only scan-lines `y % N == tile`. Triangles take either the scalar
//! reference path or the 4-wide SIMD path (16- and 32-bit depth buffers);
//! both evaluate the same IEEE expression trees and produce identical
//! fragments. Wireframe triangles, lines, and points share the scalar
//! machinery.
//!
//! Surviving fragments are queued with their perspective-corrected
//! barycentrics; queue flushes interpolate varyings, invoke the fragment
//! shader, and write color and depth back.

use crate::pipeline::{DrawTask, FragmentBin, RenderMode, MAX_QUEUED_FRAGS};
use crate::shader::{BlendMode, FragCoord, FragmentParam, MAX_FRAG_OUTPUTS, MAX_VARYINGS};
use crate::texture::Elem;
use half::f16;
use rasterflow_core::{F32x4, I32x4, Vec4};

/// Depth-attachment element access, generic over the three depth formats.
pub(crate) trait DepthTexel: Copy {
    /// Whether the 4-wide triangle path applies to this format.
    const SIMD: bool;

    /// Widens to f32 for comparison.
    fn to_f32(self) -> f32;

    /// Narrows from f32 for writeback.
    fn from_f32(v: f32) -> Self;

    /// Loads four consecutive texels, widened.
    ///
    /// # Safety
    /// `ptr` must be valid for reading four elements.
    unsafe fn load4(ptr: *const Self) -> F32x4;
}

impl DepthTexel for f16 {
    const SIMD: bool = true;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }

    #[inline(always)]
    unsafe fn load4(ptr: *const Self) -> F32x4 {
        // SAFETY: caller guarantees four readable elements.
        unsafe {
            F32x4::new(
                (*ptr).to_f32(),
                (*ptr.add(1)).to_f32(),
                (*ptr.add(2)).to_f32(),
                (*ptr.add(3)).to_f32(),
            )
        }
    }
}

impl DepthTexel for f32 {
    const SIMD: bool = true;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline(always)]
    unsafe fn load4(ptr: *const Self) -> F32x4 {
        // SAFETY: caller guarantees four readable elements.
        unsafe { F32x4::load(ptr) }
    }
}

impl DepthTexel for f64 {
    const SIMD: bool = false;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        v as f64
    }

    #[inline(always)]
    unsafe fn load4(ptr: *const Self) -> F32x4 {
        // SAFETY: caller guarantees four readable elements.
        unsafe {
            F32x4::new(
                (*ptr) as f32,
                (*ptr.add(1)) as f32,
                (*ptr.add(2)) as f32,
                (*ptr.add(3)) as f32,
            )
        }
    }
}

/// Scan-line x-bounds of a triangle, from its edges sorted by y.
struct ScanlineBounds {
    p0: Vec4,
    p1: Vec4,
    p2: Vec4,
}

impl ScanlineBounds {
    fn new(a: Vec4, b: Vec4, c: Vec4) -> Self {
        // Stable 3-element sort by y.
        let (a, b) = if b.y < a.y { (b, a) } else { (a, b) };
        let (b, c) = if c.y < b.y { (c, b) } else { (b, c) };
        let (a, b) = if b.y < a.y { (b, a) } else { (a, b) };
        Self {
            p0: a,
            p1: b,
            p2: c,
        }
    }

    /// The span `[x_min, x_max)` covered at scan-line `yf`.
    ///
    /// Left edge inclusive through the ceiling of the exact intersection,
    /// right edge exclusive, so triangles sharing an edge never double-shade.
    /// Only meaningful for `p0.y <= yf < p2.y`.
    #[inline(always)]
    fn step(&self, yf: f32) -> (i32, i32) {
        let t20 = (yf - self.p0.y) / (self.p2.y - self.p0.y);
        let xa = self.p0.x + t20 * (self.p2.x - self.p0.x);

        let xb = if yf < self.p1.y {
            let t10 = (yf - self.p0.y) / (self.p1.y - self.p0.y);
            self.p0.x + t10 * (self.p1.x - self.p0.x)
        } else {
            let t21 = (yf - self.p1.y) / (self.p2.y - self.p1.y);
            self.p1.x + t21 * (self.p2.x - self.p1.x)
        };

        if xa <= xb {
            (xa.ceil() as i32, xb.ceil() as i32)
        } else {
            (xb.ceil() as i32, xa.ceil() as i32)
        }
    }
}

/// Queued fragments awaiting shading.
struct FragQueue {
    bc: [Vec4; MAX_QUEUED_FRAGS],
    coord: [FragCoord; MAX_QUEUED_FRAGS],
    len: usize,
}

/// Per-worker fragment stage state for one draw.
pub(crate) struct FragmentProcessor<'t> {
    task: &'t DrawTask<'t>,
    tile_id: usize,
    queue: Box<FragQueue>,
}

impl<'t> FragmentProcessor<'t> {
    pub(crate) fn new(task: &'t DrawTask<'t>) -> Self {
        Self {
            task,
            tile_id: 0,
            queue: Box::new(FragQueue {
                bc: [Vec4::ZERO; MAX_QUEUED_FRAGS],
                coord: [FragCoord::default(); MAX_QUEUED_FRAGS],
                len: 0,
            }),
        }
    }

    /// Adopts the tile id handed out by the flush barrier for this epoch.
    pub(crate) fn begin_epoch(&mut self, tile_id: usize) {
        self.tile_id = tile_id;
        debug_assert_eq!(self.queue.len, 0);
    }

    /// Rasterizes one published bin, dispatching on the depth format.
    pub(crate) fn raster_one(&mut self, producer: usize, index: usize) {
        let task = self.task;
        // SAFETY: `index` was published by the phase-1 barrier of the current
        // flush epoch and stays immutable until the epoch reset.
        let bin = unsafe { task.bin_sets[producer].read(index) };
        match self.task.fbo.depth.format.elem {
            Elem::F16 => self.raster_bin::<f16>(bin),
            Elem::F32 => self.raster_bin::<f32>(bin),
            Elem::F64 => self.raster_bin::<f64>(bin),
            _ => debug_assert!(false, "depth format validated at draw"),
        }
    }

    fn raster_bin<D: DepthTexel>(&mut self, bin: &FragmentBin) {
        let mode = self.task.mesh.mode;
        if mode.contains(RenderMode::TRIANGLES) {
            if mode.contains(RenderMode::WIREFRAME) {
                self.raster_wireframe::<D>(bin);
            } else if D::SIMD {
                self.raster_triangle_simd::<D>(bin);
            } else {
                self.raster_triangle_scalar::<D>(bin);
            }
        } else if mode.contains(RenderMode::LINES) {
            self.raster_line::<D>(bin);
        } else {
            self.raster_point::<D>(bin);
        }
    }

    /// First scan-line at or after `y0` owned by this tile.
    #[inline(always)]
    fn first_owned_line(&self, y0: i32) -> i32 {
        let n = self.task.num_workers as i32;
        y0 + (self.tile_id as i32 - y0).rem_euclid(n)
    }

    #[inline(always)]
    fn depth_passes(&self, z: f32, d: f32) -> bool {
        use crate::context::DepthOrder;
        match self.task.depth_order {
            DepthOrder::Normal => z < d,
            DepthOrder::Reversed => z > d,
        }
    }

    #[inline(always)]
    fn push_frag<D: DepthTexel>(&mut self, bin: &FragmentBin, bc: Vec4, x: u16, y: u16, z: f32) {
        let len = self.queue.len;
        self.queue.bc[len] = bc;
        self.queue.coord[len] = FragCoord { x, y, depth: z };
        self.queue.len = len + 1;
        if self.queue.len == MAX_QUEUED_FRAGS {
            self.flush_queue::<D>(bin);
        }
    }

    /// Scalar reference triangle path.
    fn raster_triangle_scalar<D: DepthTexel>(&mut self, bin: &FragmentBin) {
        let s = &bin.screen;
        let depth_row = Vec4::new(s[0].z, s[1].z, s[2].z, 0.0);
        let homogenous = Vec4::new(s[0].w, s[1].w, s[2].w, 0.0);
        let depth_test = self.task.shader.frag.depth_test;
        let n = self.task.num_workers as i32;
        let width = self.task.fbo.width as i32;
        let height = self.task.fbo.height as i32;

        let y_min = s[0].y.min(s[1].y).min(s[2].y);
        let y_max = s[0].y.max(s[1].y).max(s[2].y);
        let bounds = ScanlineBounds::new(s[0], s[1], s[2]);

        let mut y = self.first_owned_line((y_min.ceil() as i32).max(0));
        while (y as f32) < y_max && y < height {
            let yf = y as f32;
            let bc_y = bin.bary[1] * yf + bin.bary[2];
            let (x_lo, x_hi) = bounds.step(yf);
            let mut x = x_lo.max(0);
            let x_max = x_hi.min(width);
            if x < x_max {
                let row = self.task.fbo.depth_row_ptr::<D>(y as u16);
                // SAFETY: 0 <= x < x_max <= width keeps the pointer in-row.
                let mut px = unsafe { row.add(x as usize) };
                while x < x_max {
                    let xf = x as f32;
                    let bc = bin.bary[0] * xf + bc_y;
                    let z = bc.dot3(depth_row);
                    // SAFETY: px tracks x, still inside the row.
                    let d = unsafe { (*px).to_f32() };
                    if !depth_test || self.depth_passes(z, d) {
                        let persp = bc.dot3(homogenous);
                        let bc_w = (bc * homogenous) * (1.0 / persp);
                        self.push_frag::<D>(bin, bc_w, x as u16, y as u16, z);
                    }
                    x += 1;
                    // SAFETY: advanced alongside x; never dereferenced past
                    // x_max - 1.
                    px = unsafe { px.add(1) };
                }
            }
            y += n;
        }
        self.drain_queue::<D>(bin);
    }

    /// 4-wide triangle path. Lane expressions mirror the scalar path exactly;
    /// the remainder of each span runs the scalar body.
    fn raster_triangle_simd<D: DepthTexel>(&mut self, bin: &FragmentBin) {
        let s = &bin.screen;
        let depth_row = Vec4::new(s[0].z, s[1].z, s[2].z, 0.0);
        let homogenous = Vec4::new(s[0].w, s[1].w, s[2].w, 0.0);
        let depth_test = self.task.shader.frag.depth_test;
        let n = self.task.num_workers as i32;
        let width = self.task.fbo.width as i32;
        let height = self.task.fbo.height as i32;

        let b0 = bin.bary[0];
        let r0x = F32x4::splat(b0.x);
        let r0y = F32x4::splat(b0.y);
        let r0z = F32x4::splat(b0.z);
        let d0 = F32x4::splat(depth_row.x);
        let d1 = F32x4::splat(depth_row.y);
        let d2 = F32x4::splat(depth_row.z);
        let h0 = F32x4::splat(homogenous.x);
        let h1 = F32x4::splat(homogenous.y);
        let h2 = F32x4::splat(homogenous.z);

        let y_min = s[0].y.min(s[1].y).min(s[2].y);
        let y_max = s[0].y.max(s[1].y).max(s[2].y);
        let bounds = ScanlineBounds::new(s[0], s[1], s[2]);

        let mut y = self.first_owned_line((y_min.ceil() as i32).max(0));
        while (y as f32) < y_max && y < height {
            let yf = y as f32;
            let bc_y = bin.bary[1] * yf + bin.bary[2];
            let (x_lo, x_hi) = bounds.step(yf);
            let mut x = x_lo.max(0);
            let x_max = x_hi.min(width);

            if x < x_max {
                let row = self.task.fbo.depth_row_ptr::<D>(y as u16);
                let cy0 = F32x4::splat(bc_y.x);
                let cy1 = F32x4::splat(bc_y.y);
                let cy2 = F32x4::splat(bc_y.z);

                // Full quads.
                while x + 4 <= x_max {
                    let xf4 = F32x4::from_i32x4(I32x4::splat(x) + I32x4::iota());
                    let bc0 = r0x * xf4 + cy0;
                    let bc1 = r0y * xf4 + cy1;
                    let bc2 = r0z * xf4 + cy2;
                    let z4 = (bc0 * d0 + bc1 * d1) + bc2 * d2;
                    // SAFETY: x + 4 <= x_max <= width; four texels readable.
                    let d4 = unsafe { D::load4(row.add(x as usize) as *const D) };

                    let mask = if depth_test {
                        use crate::context::DepthOrder;
                        match self.task.depth_order {
                            DepthOrder::Normal => z4.cmp_lt(d4),
                            DepthOrder::Reversed => z4.cmp_gt(d4),
                        }
                        .bitmask()
                    } else {
                        0xF
                    };

                    if mask != 0 {
                        let persp4 = (bc0 * h0 + bc1 * h1) + bc2 * h2;
                        let recip = F32x4::splat(1.0) / persp4;
                        let bw0 = (bc0 * h0) * recip;
                        let bw1 = (bc1 * h1) * recip;
                        let bw2 = (bc2 * h2) * recip;

                        // Popcount-indexed compaction: every lane stores
                        // unconditionally, discarded lanes are overwritten by
                        // the next surviving one.
                        let base = self.queue.len;
                        let slot = [
                            base,
                            base + (mask & 0x1).count_ones() as usize,
                            base + (mask & 0x3).count_ones() as usize,
                            base + (mask & 0x7).count_ones() as usize,
                        ];
                        for lane in 0..4 {
                            let idx = slot[lane];
                            debug_assert!(idx < MAX_QUEUED_FRAGS);
                            self.queue.bc[idx] = Vec4::new(
                                bw0.extract(lane),
                                bw1.extract(lane),
                                bw2.extract(lane),
                                0.0,
                            );
                            self.queue.coord[idx] = FragCoord {
                                x: (x + lane as i32) as u16,
                                y: y as u16,
                                depth: z4.extract(lane),
                            };
                        }
                        self.queue.len = base + (mask & 0xF).count_ones() as usize;
                        if self.queue.len > MAX_QUEUED_FRAGS - 4 {
                            self.flush_queue::<D>(bin);
                        }
                    }
                    x += 4;
                }

                // Scalar remainder, identical to the reference path.
                // SAFETY: x < x_max <= width keeps the pointer in-row.
                let mut px = unsafe { row.add(x as usize) };
                while x < x_max {
                    let xf = x as f32;
                    let bc = bin.bary[0] * xf + bc_y;
                    let z = bc.dot3(depth_row);
                    // SAFETY: px tracks x, still inside the row.
                    let d = unsafe { (*px).to_f32() };
                    if !depth_test || self.depth_passes(z, d) {
                        let persp = bc.dot3(homogenous);
                        let bc_w = (bc * homogenous) * (1.0 / persp);
                        self.push_frag::<D>(bin, bc_w, x as u16, y as u16, z);
                    }
                    x += 1;
                    // SAFETY: advanced alongside x.
                    px = unsafe { px.add(1) };
                }
            }
            y += n;
        }
        self.drain_queue::<D>(bin);
    }

    /// Wireframe triangles: only the two span-edge pixels per scan-line.
    fn raster_wireframe<D: DepthTexel>(&mut self, bin: &FragmentBin) {
        let s = &bin.screen;
        let depth_row = Vec4::new(s[0].z, s[1].z, s[2].z, 0.0);
        let homogenous = Vec4::new(s[0].w, s[1].w, s[2].w, 0.0);
        let depth_test = self.task.shader.frag.depth_test;
        let n = self.task.num_workers as i32;
        let width = self.task.fbo.width as i32;
        let height = self.task.fbo.height as i32;

        let y_min = s[0].y.min(s[1].y).min(s[2].y);
        let y_max = s[0].y.max(s[1].y).max(s[2].y);
        let bounds = ScanlineBounds::new(s[0], s[1], s[2]);

        let mut y = self.first_owned_line((y_min.ceil() as i32).max(0));
        while (y as f32) < y_max && y < height {
            let yf = y as f32;
            let bc_y = bin.bary[1] * yf + bin.bary[2];
            let (x_lo, x_hi) = bounds.step(yf);
            let left = x_lo.max(0);
            let right = (x_hi - 1).min(width - 1);
            if left <= right {
                let row = self.task.fbo.depth_row_ptr::<D>(y as u16);
                let edges = if left == right {
                    [left, -1]
                } else {
                    [left, right]
                };
                for x in edges {
                    if x < 0 {
                        continue;
                    }
                    let xf = x as f32;
                    let bc = bin.bary[0] * xf + bc_y;
                    let z = bc.dot3(depth_row);
                    // SAFETY: 0 <= x < width.
                    let d = unsafe { (*row.add(x as usize)).to_f32() };
                    if !depth_test || self.depth_passes(z, d) {
                        let persp = bc.dot3(homogenous);
                        let bc_w = (bc * homogenous) * (1.0 / persp);
                        self.push_frag::<D>(bin, bc_w, x as u16, y as u16, z);
                    }
                }
            }
            y += n;
        }
        self.drain_queue::<D>(bin);
    }

    /// Bresenham line traversal; depth and varyings follow the parametric t.
    fn raster_line<D: DepthTexel>(&mut self, bin: &FragmentBin) {
        let s0 = bin.screen[0];
        let s1 = bin.screen[1];
        let depth_test = self.task.shader.frag.depth_test;
        let n = self.task.num_workers as i32;
        let tile = self.tile_id as i32;
        let width = self.task.fbo.width as i32;
        let height = self.task.fbo.height as i32;

        let x0 = s0.x as i32;
        let y0 = s0.y as i32;
        let x1 = s1.x as i32;
        let y1 = s1.y as i32;

        // Lines skip the clipper; reject segments that miss the framebuffer
        // before walking them.
        if x0.max(x1) < 0 || x0.min(x1) >= width || y0.max(y1) < 0 || y0.min(y1) >= height {
            return;
        }

        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let steps = dx.max(-dy);
        let inv_steps = if steps > 0 { 1.0 / steps as f32 } else { 0.0 };

        let mut err = dx + dy;
        let mut x = x0;
        let mut y = y0;
        let mut i = 0i32;
        loop {
            if y.rem_euclid(n) == tile && x >= 0 && x < width && y >= 0 && y < height {
                let t = i as f32 * inv_steps;
                let z = s0.z + (s1.z - s0.z) * t;
                let row = self.task.fbo.depth_row_ptr::<D>(y as u16);
                // SAFETY: 0 <= x < width.
                let d = unsafe { (*row.add(x as usize)).to_f32() };
                if !depth_test || self.depth_passes(z, d) {
                    // Perspective-correct the endpoint weights.
                    let w0 = (1.0 - t) * s0.w;
                    let w1 = t * s1.w;
                    let persp = w0 + w1;
                    let bc = Vec4::new(w0 / persp, w1 / persp, 0.0, 0.0);
                    self.push_frag::<D>(bin, bc, x as u16, y as u16, z);
                }
            }
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
            i += 1;
        }
        self.drain_queue::<D>(bin);
    }

    /// A single fragment at the screen coordinate.
    fn raster_point<D: DepthTexel>(&mut self, bin: &FragmentBin) {
        let s = bin.screen[0];
        let n = self.task.num_workers as i32;
        let tile = self.tile_id as i32;
        let x = s.x as i32;
        let y = s.y as i32;
        if y.rem_euclid(n) != tile
            || x < 0
            || x >= self.task.fbo.width as i32
            || y < 0
            || y >= self.task.fbo.height as i32
        {
            return;
        }
        let z = s.z;
        let row = self.task.fbo.depth_row_ptr::<D>(y as u16);
        // SAFETY: 0 <= x < width.
        let d = unsafe { (*row.add(x as usize)).to_f32() };
        if !self.task.shader.frag.depth_test || self.depth_passes(z, d) {
            let bc = Vec4::new(1.0, 0.0, 0.0, 0.0);
            self.push_frag::<D>(bin, bc, x as u16, y as u16, z);
        }
        self.drain_queue::<D>(bin);
    }

    #[inline(always)]
    fn drain_queue<D: DepthTexel>(&mut self, bin: &FragmentBin) {
        if self.queue.len > 0 {
            self.flush_queue::<D>(bin);
        }
    }

    /// Shades every queued fragment and writes survivors to the framebuffer.
    fn flush_queue<D: DepthTexel>(&mut self, bin: &FragmentBin) {
        let count = self.queue.len;
        self.queue.len = 0;

        let frag_shader = self.task.shader.frag;
        let num_varyings = frag_shader.num_varyings as usize;
        let num_outputs = (frag_shader.num_outputs as usize).min(self.task.fbo.num_colors);
        let blend = frag_shader.blend;

        let mut varyings = [Vec4::ZERO; MAX_VARYINGS];
        let mut outputs = [Vec4::ZERO; MAX_FRAG_OUTPUTS];

        for i in 0..count {
            let bc = self.queue.bc[i];
            let coord = self.queue.coord[i];

            for k in 0..num_varyings {
                varyings[k] = bin.varyings[0][k] * bc.x
                    + bin.varyings[1][k] * bc.y
                    + bin.varyings[2][k] * bc.z;
            }

            let mut param = FragmentParam {
                uniforms: self.task.uniforms,
                coord,
                varyings: &varyings[..num_varyings],
                outputs: &mut outputs,
            };
            let keep = (frag_shader.shader)(&mut param);
            if !keep {
                // Discarded: no color, no depth.
                continue;
            }

            for o in 0..num_outputs {
                if blend == BlendMode::Off {
                    self.task.fbo.put_pixel(o, coord.x, coord.y, outputs[o]);
                } else {
                    self.task
                        .fbo
                        .put_blended_pixel(o, coord.x, coord.y, outputs[o], blend);
                }
            }
            if frag_shader.depth_mask {
                let row = self.task.fbo.depth_row_ptr::<D>(coord.y);
                // SAFETY: the fragment was produced inside the framebuffer
                // and this worker owns scan-line coord.y.
                unsafe { *row.add(coord.x as usize) = D::from_f32(coord.depth) };
            }
        }
    }
}
