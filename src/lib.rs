//! nn-platform: runtime CPU capability probe and kernel dispatch.
//!
//! This crate is the platform layer of a numeric math library. It provides:
//! - **One-Shot Capability Probe**: CPUID / XCR0 / auxiliary-vector feature
//!   detection, performed once per process
//! - **Kernel Selection Policy**: the ranked mapping from detected capability
//!   bits to the best available call target per compute category
//! - **Immutable Platform Descriptor**: a `OnceLock`-guarded singleton every
//!   numeric entry point reads its call targets and tuning constants from
//! - **Fused Bias + Activation Engine**: the post-processing pass every
//!   compute kernel applies to its raw output
//!
//! Kernel arithmetic bodies live in sibling crates; this crate only decides
//! *which* variant runs and applies the shared epilogue.
//!
//! # Quick Start
//!
//! ```ignore
//! use nn_platform::{platform, apply_activation, Activation};
//!
//! let p = platform(); // probe + select on first call, cached afterwards
//! let align = p.preferred_buffer_alignment();
//!
//! // After a kernel produced raw output:
//! apply_activation(&Activation::relu(), &mut output, Some(&bias), m, n, ldc);
//! ```

pub mod activation;
pub mod arch;
pub mod buffer;
pub mod platform;

pub use activation::{apply_activation, Activation, ActivationError, ActivationKind};
pub use arch::Platform;
pub use buffer::{with_scratch, AlignedBuf};
pub use platform::{
    gemm_f32_kernel, install, maximum_thread_count, platform, preferred_buffer_alignment,
    quantize_linear_s8_kernel, quantize_linear_u8_kernel, PlatformError,
};

#[cfg(not(target_arch = "powerpc64"))]
pub use platform::{conv_kernel, qgemm_u8s8_dispatch, qgemm_u8u8_dispatch};

#[cfg(target_arch = "powerpc64")]
pub use platform::qgemm_dispatch;

#[cfg(target_arch = "x86_64")]
pub use platform::quantized_overflow;
