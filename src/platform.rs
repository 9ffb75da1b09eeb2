//! Global access point for the platform descriptor.
//!
//! The descriptor is built exactly once — probe, then selection policy —
//! behind a `OnceLock`. Concurrent first-time callers block until the one
//! construction finishes; afterwards reads are plain shared references with
//! no synchronization. There is no environment-variable surface: detection
//! is zero-configuration, and the one escape hatch is [`install`], which
//! seeds the slot with a caller-built descriptor before first use.

use std::sync::OnceLock;

use thiserror::Error;

use crate::arch::{self, Platform};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform descriptor already initialized")]
    AlreadyInitialized,
}

static PLATFORM: OnceLock<Platform> = OnceLock::new();

/// The process-wide platform descriptor, probing and selecting on first
/// call.
pub fn platform() -> &'static Platform {
    PLATFORM.get_or_init(|| {
        let p = Platform::detect();
        log::info!("platform initialized: {p}");
        p
    })
}

/// Install a caller-built descriptor before first use.
///
/// This bypasses auto-detection entirely; it is the seam tests and
/// embedders use to pin kernel selection. Fails once [`platform`] has run
/// or a previous install succeeded — the descriptor is write-once.
pub fn install(descriptor: Platform) -> Result<(), PlatformError> {
    PLATFORM
        .set(descriptor)
        .map_err(|_| PlatformError::AlreadyInitialized)
}

// ── Public queries ─────────────────────────────────────────────────────

/// Preferred byte alignment for kernel buffers. Always a power of two;
/// buffers with weaker alignment still work, just slower.
pub fn preferred_buffer_alignment() -> usize {
    platform().preferred_buffer_alignment()
}

/// Upper bound on worker threads the kernels can make use of.
pub fn maximum_thread_count() -> usize {
    platform().maximum_thread_count()
}

/// Whether the quantized matmul routine saturates (rather than wraps) on
/// intermediate overflow, in which case callers must pre-scale operands.
/// Meaningful only where separate u8×u8 and u8×s8 dispatch handles exist.
#[cfg(target_arch = "x86_64")]
pub fn quantized_overflow() -> bool {
    platform().quantized_overflow()
}

/// Selected dense f32 matmul call target.
pub fn gemm_f32_kernel() -> arch::GemmF32Kernel {
    platform().gemm_f32()
}

/// Selected convolution call target.
#[cfg(not(target_arch = "powerpc64"))]
pub fn conv_kernel() -> arch::ConvKernel {
    platform().conv()
}

/// Selected quantized matmul dispatch handle for u8×u8 operands.
#[cfg(not(target_arch = "powerpc64"))]
pub fn qgemm_u8u8_dispatch() -> arch::QGemmDispatch {
    platform().qgemm_u8u8()
}

/// Selected quantized matmul dispatch handle for u8×s8 operands.
#[cfg(not(target_arch = "powerpc64"))]
pub fn qgemm_u8s8_dispatch() -> arch::QGemmDispatch {
    platform().qgemm_u8s8()
}

/// Selected quantized matmul dispatch handle, if this processor has one.
#[cfg(target_arch = "powerpc64")]
pub fn qgemm_dispatch() -> Option<arch::QGemmDispatch> {
    platform().qgemm_dispatch()
}

/// Selected signed-output linear-quantization call target.
pub fn quantize_linear_s8_kernel() -> arch::QuantizeLinearKernel {
    platform().quantize_linear_s8()
}

/// Selected unsigned-output linear-quantization call target.
pub fn quantize_linear_u8_kernel() -> arch::QuantizeLinearKernel {
    platform().quantize_linear_u8()
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_stable_across_calls() {
        let p1 = platform();
        let p2 = platform();
        assert!(std::ptr::eq(p1, p2));
        assert_eq!(preferred_buffer_alignment(), preferred_buffer_alignment());
    }

    #[test]
    fn alignment_is_a_power_of_two_at_least_default() {
        let align = preferred_buffer_alignment();
        assert!(align.is_power_of_two());
        assert!(align >= arch::DEFAULT_PREFERRED_BUFFER_ALIGNMENT);
    }

    #[test]
    fn thread_count_is_baseline_or_scaled() {
        let threads = maximum_thread_count();
        assert!(
            threads == arch::BASE_MAXIMUM_THREAD_COUNT
                || threads == arch::BASE_MAXIMUM_THREAD_COUNT * 4
        );
    }

    #[test]
    fn install_after_first_use_is_rejected() {
        let _ = platform();
        let err = install(Platform::detect()).unwrap_err();
        assert!(matches!(err, PlatformError::AlreadyInitialized));
    }
}
