//! Per-architecture capability probing and kernel selection.
//!
//! One module per target architecture, each exposing the same shape: a
//! `CpuCaps` capability bit set with a `probe()`, a set of tagged kernel
//! selector enums, and a `Platform` descriptor built by `from_caps`. The
//! selection policies are plain data logic and compile on every host; only
//! the probe bodies are `#[cfg(target_arch)]`-gated. `Platform::detect()`
//! on the alias below runs the native probe and policy.

pub mod aarch64;
pub mod generic;
pub mod power;
pub mod x86;

/// Preferred byte alignment for kernel buffers unless a stronger vector
/// selection overrides it. Power of two.
pub const DEFAULT_PREFERRED_BUFFER_ALIGNMENT: usize = 32;

/// Baseline cap on usable worker threads. Scaled up by the selection policy
/// when hybrid-core topology is detected.
pub const BASE_MAXIMUM_THREAD_COUNT: usize = 16;

/// The platform descriptor for the architecture this crate was built for,
/// with its kernel selector types re-exported alongside.
#[cfg(target_arch = "x86_64")]
pub type Platform = x86::Platform;

#[cfg(target_arch = "x86_64")]
pub use x86::{ConvKernel, GemmF32Kernel, GemmF64Kernel, QGemmDispatch, QuantizeLinearKernel};

#[cfg(target_arch = "aarch64")]
pub type Platform = aarch64::Platform;

#[cfg(target_arch = "aarch64")]
pub use aarch64::{ConvKernel, GemmF32Kernel, QGemmDispatch, QuantizeLinearKernel};

#[cfg(target_arch = "powerpc64")]
pub type Platform = power::Platform;

#[cfg(target_arch = "powerpc64")]
pub use power::{GemmF32Kernel, GemmF64Kernel, QGemmDispatch, QuantizeLinearKernel};

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "powerpc64"
)))]
pub type Platform = generic::Platform;

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "powerpc64"
)))]
pub use generic::{ConvKernel, GemmF32Kernel, QGemmDispatch, QuantizeLinearKernel};
