//! ARM64 capability probe and kernel selection policy.
//!
//! NEON is architectural on AArch64, so the baseline kernels are NEON
//! kernels. The one probed bit is ASIMD dot-product (SDOT/UDOT), read from
//! the ELF auxiliary vector on Linux/Android and from the OS feature query
//! elsewhere. Dot-product support upgrades the four dependent dispatch
//! handles as a unit — there is no valid partially-upgraded state.

use std::fmt;

use crate::arch::{BASE_MAXIMUM_THREAD_COUNT, DEFAULT_PREFERRED_BUFFER_ALIGNMENT};

// ── Capability bit set ─────────────────────────────────────────────────

/// Raw OS-reported capability bits for ARM64. Read-only after probing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCaps {
    /// ASIMD dot-product instructions (SDOT/UDOT).
    pub asimd_dot: bool,
}

#[cfg(target_arch = "aarch64")]
impl CpuCaps {
    /// Probe the running processor. Never fails; an unavailable query reads
    /// as "feature absent".
    pub fn probe() -> Self {
        let caps = CpuCaps {
            asimd_dot: detect_asimd_dot(),
        };
        log::debug!("aarch64 caps: {caps:?}");
        caps
    }
}

#[cfg(all(
    target_arch = "aarch64",
    any(target_os = "linux", target_os = "android")
))]
fn detect_asimd_dot() -> bool {
    // Defined locally so older hwcap headers at build time don't matter.
    const HWCAP_ASIMDDP: libc::c_ulong = 1 << 20;
    let hwcap = unsafe { libc::getauxval(libc::AT_HWCAP) };
    hwcap & HWCAP_ASIMDDP != 0
}

#[cfg(all(
    target_arch = "aarch64",
    not(any(target_os = "linux", target_os = "android"))
))]
fn detect_asimd_dot() -> bool {
    std::arch::is_aarch64_feature_detected!("dotprod")
}

// ── Kernel selectors ───────────────────────────────────────────────────

/// Dense f32 matmul kernel. NEON is the architectural baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmF32Kernel {
    Neon,
}

impl GemmF32Kernel {
    pub fn rank(self) -> usize {
        0
    }

    pub fn name(self) -> &'static str {
        "neon"
    }
}

/// Quantized matmul dispatch handle, serving both operand-sign pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QGemmDispatch {
    Neon,
    NeonDot,
}

impl QGemmDispatch {
    pub fn rank(self) -> usize {
        match self {
            Self::Neon => 0,
            Self::NeonDot => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Neon => "neon",
            Self::NeonDot => "neon-dot",
        }
    }
}

/// Symmetric-quantized matmul dispatch handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmQGemmDispatch {
    Neon,
    NeonDot,
}

impl SymmQGemmDispatch {
    pub fn rank(self) -> usize {
        match self {
            Self::Neon => 0,
            Self::NeonDot => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Neon => "neon",
            Self::NeonDot => "neon-dot",
        }
    }
}

/// NCHW convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvKernel {
    Neon,
}

impl ConvKernel {
    pub fn rank(self) -> usize {
        0
    }

    pub fn name(self) -> &'static str {
        "neon"
    }
}

/// Convolution-with-symmetric-quantization kernel (per filter sign).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvSymKernel {
    Neon,
    NeonDot,
}

impl ConvSymKernel {
    pub fn rank(self) -> usize {
        match self {
            Self::Neon => 0,
            Self::NeonDot => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Neon => "neon",
            Self::NeonDot => "neon-dot",
        }
    }
}

/// Linear-quantization encode kernel (per output sign).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeLinearKernel {
    Neon,
}

impl QuantizeLinearKernel {
    pub fn rank(self) -> usize {
        0
    }

    pub fn name(self) -> &'static str {
        "neon"
    }
}

// ── Platform descriptor + selection policy ─────────────────────────────

/// Per-process descriptor of selected call targets and tuning constants.
/// Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub gemm_f32: GemmF32Kernel,
    /// One dispatch handle serves both unsigned×unsigned and
    /// unsigned×signed operand pairs on this architecture.
    pub qgemm: QGemmDispatch,
    pub symm_qgemm: SymmQGemmDispatch,
    pub conv: ConvKernel,
    pub conv_sym_s8: ConvSymKernel,
    pub conv_sym_u8: ConvSymKernel,
    pub quantize_linear_s8: QuantizeLinearKernel,
    pub quantize_linear_u8: QuantizeLinearKernel,
    pub preferred_buffer_alignment: usize,
    pub maximum_thread_count: usize,
    pub nchwc_block_size: usize,
}

impl Platform {
    /// The baseline descriptor: valid on every AArch64 processor.
    pub fn baseline() -> Self {
        Platform {
            gemm_f32: GemmF32Kernel::Neon,
            qgemm: QGemmDispatch::Neon,
            symm_qgemm: SymmQGemmDispatch::Neon,
            conv: ConvKernel::Neon,
            conv_sym_s8: ConvSymKernel::Neon,
            conv_sym_u8: ConvSymKernel::Neon,
            quantize_linear_s8: QuantizeLinearKernel::Neon,
            quantize_linear_u8: QuantizeLinearKernel::Neon,
            preferred_buffer_alignment: DEFAULT_PREFERRED_BUFFER_ALIGNMENT,
            maximum_thread_count: BASE_MAXIMUM_THREAD_COUNT,
            // The packed cache-blocked layout is not used on this
            // architecture.
            nchwc_block_size: 1,
        }
    }

    /// Apply the selection policy to a capability set.
    ///
    /// Dot-product support upgrades all four dependent handles together;
    /// its absence leaves all four at baseline.
    pub fn from_caps(caps: &CpuCaps) -> Self {
        let mut p = Platform::baseline();

        if caps.asimd_dot {
            p.qgemm = QGemmDispatch::NeonDot;
            p.symm_qgemm = SymmQGemmDispatch::NeonDot;
            p.conv_sym_s8 = ConvSymKernel::NeonDot;
            p.conv_sym_u8 = ConvSymKernel::NeonDot;
        }

        p
    }

    /// Probe the running machine and select kernels for it.
    #[cfg(target_arch = "aarch64")]
    pub fn detect() -> Self {
        Self::from_caps(&CpuCaps::probe())
    }

    // Uniform accessor surface shared by every architecture's descriptor.

    pub fn gemm_f32(&self) -> GemmF32Kernel {
        self.gemm_f32
    }

    pub fn conv(&self) -> ConvKernel {
        self.conv
    }

    pub fn qgemm_u8u8(&self) -> QGemmDispatch {
        self.qgemm
    }

    pub fn qgemm_u8s8(&self) -> QGemmDispatch {
        self.qgemm
    }

    pub fn quantize_linear_s8(&self) -> QuantizeLinearKernel {
        self.quantize_linear_s8
    }

    pub fn quantize_linear_u8(&self) -> QuantizeLinearKernel {
        self.quantize_linear_u8
    }

    pub fn preferred_buffer_alignment(&self) -> usize {
        self.preferred_buffer_alignment
    }

    pub fn maximum_thread_count(&self) -> usize {
        self.maximum_thread_count
    }

    pub fn nchwc_block_size(&self) -> usize {
        self.nchwc_block_size
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sgemm={} qgemm={} symm_qgemm={} conv={} conv_sym_s8={} \
             conv_sym_u8={} | align={} threads={}",
            self.gemm_f32.name(),
            self.qgemm.name(),
            self.symm_qgemm.name(),
            self.conv.name(),
            self.conv_sym_s8.name(),
            self.conv_sym_u8.name(),
            self.preferred_buffer_alignment,
            self.maximum_thread_count,
        )
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_product_upgrades_all_four_handles() {
        let p = Platform::from_caps(&CpuCaps { asimd_dot: true });
        assert_eq!(p.qgemm, QGemmDispatch::NeonDot);
        assert_eq!(p.symm_qgemm, SymmQGemmDispatch::NeonDot);
        assert_eq!(p.conv_sym_s8, ConvSymKernel::NeonDot);
        assert_eq!(p.conv_sym_u8, ConvSymKernel::NeonDot);
    }

    #[test]
    fn no_dot_product_leaves_all_four_at_baseline() {
        let p = Platform::from_caps(&CpuCaps::default());
        assert_eq!(p.qgemm, QGemmDispatch::Neon);
        assert_eq!(p.symm_qgemm, SymmQGemmDispatch::Neon);
        assert_eq!(p.conv_sym_s8, ConvSymKernel::Neon);
        assert_eq!(p.conv_sym_u8, ConvSymKernel::Neon);
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn probe_is_infallible() {
        let caps = CpuCaps::probe();
        eprintln!("probed: {caps:?}");
    }
}
