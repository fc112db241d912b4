//! aarch64 NEON backend using `core::arch` intrinsics.
//!
//! NEON is baseline on aarch64. `vdivq_f32` is a full-precision divide, so the
//! backend matches scalar semantics bit-for-bit like the x86 one.

use core::arch::aarch64::*;
use core::ops::{Add, Div, Mul, Sub};

/// A batch of 4 f32 lanes in a NEON register.
#[derive(Copy, Clone)]
#[repr(transparent)]
pub struct F32x4(float32x4_t);

/// A batch of 4 i32 lanes in a NEON register.
#[derive(Copy, Clone)]
#[repr(transparent)]
pub struct I32x4(int32x4_t);

impl F32x4 {
    /// Builds a vector from four lanes.
    #[inline(always)]
    pub fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        let lanes = [a, b, c, d];
        // SAFETY: lanes is 16 readable bytes.
        unsafe { Self(vld1q_f32(lanes.as_ptr())) }
    }

    /// Broadcasts one value into all lanes.
    #[inline(always)]
    pub fn splat(v: f32) -> Self {
        // SAFETY: broadcast of an immediate value.
        unsafe { Self(vdupq_n_f32(v)) }
    }

    /// Loads four lanes from a pointer. Unaligned.
    ///
    /// # Safety
    /// `ptr` must be valid for reading 16 bytes.
    #[inline(always)]
    pub unsafe fn load(ptr: *const f32) -> Self {
        // SAFETY: caller guarantees 16 readable bytes.
        unsafe { Self(vld1q_f32(ptr)) }
    }

    /// Stores four lanes to a pointer. Unaligned.
    ///
    /// # Safety
    /// `ptr` must be valid for writing 16 bytes.
    #[inline(always)]
    pub unsafe fn store(self, ptr: *mut f32) {
        // SAFETY: caller guarantees 16 writable bytes.
        unsafe { vst1q_f32(ptr, self.0) }
    }

    /// Extracts lane `i`.
    #[inline(always)]
    pub fn extract(self, i: usize) -> f32 {
        debug_assert!(i < 4);
        let mut lanes = [0.0f32; 4];
        // SAFETY: lanes is 16 writable bytes.
        unsafe { vst1q_f32(lanes.as_mut_ptr(), self.0) };
        lanes[i]
    }

    /// Lane mask of `self < rhs` (all-ones where true). NaN compares false.
    #[inline(always)]
    pub fn cmp_lt(self, rhs: Self) -> I32x4 {
        // SAFETY: ordered compare producing all-ones/zero lanes.
        unsafe { I32x4(vreinterpretq_s32_u32(vcltq_f32(self.0, rhs.0))) }
    }

    /// Lane mask of `self > rhs` (all-ones where true). NaN compares false.
    #[inline(always)]
    pub fn cmp_gt(self, rhs: Self) -> I32x4 {
        // SAFETY: ordered compare producing all-ones/zero lanes.
        unsafe { I32x4(vreinterpretq_s32_u32(vcgtq_f32(self.0, rhs.0))) }
    }

    /// Converts signed integer lanes to f32 lanes.
    #[inline(always)]
    pub fn from_i32x4(v: I32x4) -> Self {
        // SAFETY: cvt rounds exactly like `as f32` for i32 inputs.
        unsafe { Self(vcvtq_f32_s32(v.0)) }
    }
}

impl Add for F32x4 {
    type Output = Self;
    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        // SAFETY: plain IEEE add.
        unsafe { Self(vaddq_f32(self.0, rhs.0)) }
    }
}

impl Sub for F32x4 {
    type Output = Self;
    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        // SAFETY: plain IEEE sub.
        unsafe { Self(vsubq_f32(self.0, rhs.0)) }
    }
}

impl Mul for F32x4 {
    type Output = Self;
    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        // SAFETY: plain IEEE mul.
        unsafe { Self(vmulq_f32(self.0, rhs.0)) }
    }
}

impl Div for F32x4 {
    type Output = Self;
    #[inline(always)]
    fn div(self, rhs: Self) -> Self {
        // SAFETY: full-precision IEEE divide.
        unsafe { Self(vdivq_f32(self.0, rhs.0)) }
    }
}

impl I32x4 {
    /// Builds a vector from four lanes.
    #[inline(always)]
    pub fn new(a: i32, b: i32, c: i32, d: i32) -> Self {
        let lanes = [a, b, c, d];
        // SAFETY: lanes is 16 readable bytes.
        unsafe { Self(vld1q_s32(lanes.as_ptr())) }
    }

    /// Broadcasts one value into all lanes.
    #[inline(always)]
    pub fn splat(v: i32) -> Self {
        // SAFETY: broadcast of an immediate value.
        unsafe { Self(vdupq_n_s32(v)) }
    }

    /// `(0, 1, 2, 3)`.
    #[inline(always)]
    pub fn iota() -> Self {
        Self::new(0, 1, 2, 3)
    }

    /// Extracts lane `i`.
    #[inline(always)]
    pub fn extract(self, i: usize) -> i32 {
        debug_assert!(i < 4);
        let mut lanes = [0i32; 4];
        // SAFETY: lanes is 16 writable bytes.
        unsafe { vst1q_s32(lanes.as_mut_ptr(), self.0) };
        lanes[i]
    }

    /// Packs the sign bit of every lane into the low 4 bits.
    ///
    /// NEON has no movemask; select one bit per lane and sum across.
    #[inline(always)]
    pub fn bitmask(self) -> u32 {
        // SAFETY: shift/and/horizontal-add over lanes.
        unsafe {
            let bits = I32x4::new(1, 2, 4, 8).0;
            let signs = vshrq_n_s32::<31>(self.0);
            let masked = vandq_s32(signs, bits);
            vaddvq_s32(masked) as u32
        }
    }
}

impl Add for I32x4 {
    type Output = Self;
    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        // SAFETY: wrapping integer add.
        unsafe { Self(vaddq_s32(self.0, rhs.0)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_masks() {
        let a = F32x4::new(1.0, 5.0, f32::NAN, -2.0);
        let b = F32x4::new(2.0, 4.0, 1.0, -2.0);
        assert_eq!(a.cmp_lt(b).bitmask(), 0b0001);
        assert_eq!(a.cmp_gt(b).bitmask(), 0b0010);
    }

    #[test]
    fn iota_and_convert() {
        let x = I32x4::splat(2) + I32x4::iota();
        let f = F32x4::from_i32x4(x);
        assert_eq!(f.extract(0), 2.0);
        assert_eq!(f.extract(3), 5.0);
    }
}
