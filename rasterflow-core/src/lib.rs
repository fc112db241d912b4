//! # Rasterflow Core
//!
//! Math and SIMD foundation for the rasterflow software rasterizer:
//!
//! - [`Vec4`] / [`Mat4`]: 4-component f32 vector and column-major 4x4 matrix,
//!   the currency of the vertex and fragment pipeline.
//! - [`F32x4`] / [`I32x4`]: 4-lane vectors with SSE2, NEON and portable scalar
//!   backends. The scalar backend defines the semantics; the hardware backends
//!   match it bit-for-bit (strict IEEE ops, no FMA contraction, no approximate
//!   reciprocals).
//! - [`Fixed16`]: 16.16 unsigned fixed point used by blit source stepping.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod fixed;
pub mod mat;
pub mod simd;
pub mod vec;

pub use fixed::Fixed16;
pub use mat::Mat4;
pub use simd::{F32x4, I32x4};
pub use vec::Vec4;
