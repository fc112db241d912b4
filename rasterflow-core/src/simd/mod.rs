//! Platform-specific 4-lane SIMD backends.
//!
//! Every backend exposes the same two types, [`F32x4`] and [`I32x4`], with an
//! identical inherent API. The scalar backend is the reference semantics and
//! is always compiled so the hardware backends can be tested against it.
//!
//! The rasterizer depends on the backends agreeing bit-for-bit with scalar
//! f32 arithmetic: lane operations are plain IEEE add/sub/mul/div and min/max,
//! never fused multiply-adds or reciprocal estimates.

// Scalar backend is always available for testing/reference.
pub mod scalar;

#[cfg(target_arch = "x86_64")]
pub mod x86;

#[cfg(target_arch = "aarch64")]
pub mod arm;

#[cfg(target_arch = "x86_64")]
pub use x86::{F32x4, I32x4};

#[cfg(target_arch = "aarch64")]
pub use arm::{F32x4, I32x4};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub use scalar::{F32x4, I32x4};
