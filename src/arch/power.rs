//! POWER capability probe and kernel selection policy.
//!
//! Capability bits come from the AT_HWCAP2 auxiliary vector: ISA 3.00
//! ("P9") and ISA 3.1 plus matrix-multiply-assist ("P10"). The P10
//! selection path additionally needs the `power10` cargo feature, standing
//! in for a toolchain new enough to build the MMA kernel bodies; without
//! the feature the probe still runs and P10 selection is skipped.

use std::fmt;

use crate::arch::{BASE_MAXIMUM_THREAD_COUNT, DEFAULT_PREFERRED_BUFFER_ALIGNMENT};

// ── Capability bit set ─────────────────────────────────────────────────

/// Raw OS-reported capability bits for POWER. Read-only after probing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCaps {
    /// ISA 3.00 (POWER9).
    pub arch_3_00: bool,
    /// ISA 3.1 (POWER10).
    pub arch_3_1: bool,
    /// Matrix-multiply-assist facility.
    pub mma: bool,
}

#[cfg(target_arch = "powerpc64")]
impl CpuCaps {
    /// Probe the running processor. Never fails; an unavailable query reads
    /// as "feature absent".
    pub fn probe() -> Self {
        let caps = probe_hwcap2();
        log::debug!("power caps: {caps:?}");
        caps
    }
}

#[cfg(all(target_arch = "powerpc64", target_os = "linux"))]
fn probe_hwcap2() -> CpuCaps {
    // From linux asm/cputable.h.
    const PPC_FEATURE2_ARCH_3_00: libc::c_ulong = 0x0080_0000;
    const PPC_FEATURE2_ARCH_3_1: libc::c_ulong = 0x0004_0000;
    const PPC_FEATURE2_MMA: libc::c_ulong = 0x0002_0000;

    let hwcap2 = unsafe { libc::getauxval(libc::AT_HWCAP2) };
    CpuCaps {
        arch_3_00: hwcap2 & PPC_FEATURE2_ARCH_3_00 != 0,
        arch_3_1: hwcap2 & PPC_FEATURE2_ARCH_3_1 != 0,
        mma: hwcap2 & PPC_FEATURE2_MMA != 0,
    }
}

#[cfg(all(target_arch = "powerpc64", not(target_os = "linux")))]
fn probe_hwcap2() -> CpuCaps {
    CpuCaps::default()
}

// ── Kernel selectors ───────────────────────────────────────────────────

/// Dense f32 matmul kernel. VSX is the architectural baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmF32Kernel {
    Vsx,
    Mma,
}

impl GemmF32Kernel {
    pub fn rank(self) -> usize {
        match self {
            Self::Vsx => 0,
            Self::Mma => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vsx => "vsx",
            Self::Mma => "mma",
        }
    }
}

/// Dense f64 matmul kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmF64Kernel {
    Vsx,
    Mma,
}

impl GemmF64Kernel {
    pub fn rank(self) -> usize {
        match self {
            Self::Vsx => 0,
            Self::Mma => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vsx => "vsx",
            Self::Mma => "mma",
        }
    }
}

/// Linear-quantization encode kernel (per output sign).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeLinearKernel {
    Vsx,
    P9,
}

impl QuantizeLinearKernel {
    pub fn rank(self) -> usize {
        match self {
            Self::Vsx => 0,
            Self::P9 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vsx => "vsx",
            Self::P9 => "p9",
        }
    }
}

/// Quantized matmul dispatch handle. Only installed on P10 hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QGemmDispatch {
    P10,
}

impl QGemmDispatch {
    pub fn rank(self) -> usize {
        1
    }

    pub fn name(self) -> &'static str {
        "p10-mma"
    }
}

// ── Platform descriptor + selection policy ─────────────────────────────

/// Per-process descriptor of selected call targets and tuning constants.
/// Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub gemm_f32: GemmF32Kernel,
    pub gemm_f64: GemmF64Kernel,
    pub quantize_linear_s8: QuantizeLinearKernel,
    pub quantize_linear_u8: QuantizeLinearKernel,
    /// Quantized matmul is only available once P10 MMA is selected.
    pub qgemm: Option<QGemmDispatch>,
    pub preferred_buffer_alignment: usize,
    pub maximum_thread_count: usize,
    pub nchwc_block_size: usize,
}

impl Platform {
    /// The baseline descriptor: valid on every supported POWER processor.
    pub fn baseline() -> Self {
        Platform {
            gemm_f32: GemmF32Kernel::Vsx,
            gemm_f64: GemmF64Kernel::Vsx,
            quantize_linear_s8: QuantizeLinearKernel::Vsx,
            quantize_linear_u8: QuantizeLinearKernel::Vsx,
            qgemm: None,
            preferred_buffer_alignment: DEFAULT_PREFERRED_BUFFER_ALIGNMENT,
            maximum_thread_count: BASE_MAXIMUM_THREAD_COUNT,
            nchwc_block_size: 1,
        }
    }

    /// Apply the selection policy to a capability set.
    ///
    /// The P9 and P10 upgrades are independent: P9 covers the two
    /// quantize-linear kernels, P10 the matmul kernels plus the quantized
    /// matmul dispatch.
    pub fn from_caps(caps: &CpuCaps) -> Self {
        let mut p = Platform::baseline();

        if caps.arch_3_00 {
            p.quantize_linear_s8 = QuantizeLinearKernel::P9;
            p.quantize_linear_u8 = QuantizeLinearKernel::P9;
        }

        if cfg!(feature = "power10") && caps.arch_3_1 && caps.mma {
            p.gemm_f32 = GemmF32Kernel::Mma;
            p.gemm_f64 = GemmF64Kernel::Mma;
            p.qgemm = Some(QGemmDispatch::P10);
        }

        p
    }

    /// Probe the running machine and select kernels for it.
    #[cfg(target_arch = "powerpc64")]
    pub fn detect() -> Self {
        Self::from_caps(&CpuCaps::probe())
    }

    // Uniform accessor surface shared by every architecture's descriptor.

    pub fn gemm_f32(&self) -> GemmF32Kernel {
        self.gemm_f32
    }

    pub fn gemm_f64(&self) -> GemmF64Kernel {
        self.gemm_f64
    }

    pub fn qgemm_dispatch(&self) -> Option<QGemmDispatch> {
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
            "sgemm={} dgemm={} qlinear_s8={} qlinear_u8={} qgemm={} | \
             align={} threads={}",
            self.gemm_f32.name(),
            self.gemm_f64.name(),
            self.quantize_linear_s8.name(),
            self.quantize_linear_u8.name(),
            self.qgemm.map_or("none", QGemmDispatch::name),
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
    fn p9_upgrades_only_quantize_linear() {
        let p = Platform::from_caps(&CpuCaps {
            arch_3_00: true,
            ..CpuCaps::default()
        });
        assert_eq!(p.quantize_linear_s8, QuantizeLinearKernel::P9);
        assert_eq!(p.quantize_linear_u8, QuantizeLinearKernel::P9);
        assert_eq!(p.gemm_f32, GemmF32Kernel::Vsx);
        assert_eq!(p.gemm_f64, GemmF64Kernel::Vsx);
        assert_eq!(p.qgemm, None);
    }

    #[cfg(feature = "power10")]
    #[test]
    fn p10_upgrades_matmul_independently_of_p9() {
        let p = Platform::from_caps(&CpuCaps {
            arch_3_00: false,
            arch_3_1: true,
            mma: true,
        });
        assert_eq!(p.gemm_f32, GemmF32Kernel::Mma);
        assert_eq!(p.gemm_f64, GemmF64Kernel::Mma);
        assert_eq!(p.qgemm, Some(QGemmDispatch::P10));
        // P9-owned slots stay baseline without the P9 bit.
        assert_eq!(p.quantize_linear_s8, QuantizeLinearKernel::Vsx);
    }

    #[cfg(not(feature = "power10"))]
    #[test]
    fn p10_selection_skipped_without_build_support() {
        let p = Platform::from_caps(&CpuCaps {
            arch_3_00: false,
            arch_3_1: true,
            mma: true,
        });
        assert_eq!(p.gemm_f32, GemmF32Kernel::Vsx);
        assert_eq!(p.qgemm, None);
    }

    #[test]
    fn mma_bit_alone_is_not_enough() {
        let p = Platform::from_caps(&CpuCaps {
            mma: true,
            ..CpuCaps::default()
        });
        assert_eq!(p.gemm_f32, GemmF32Kernel::Vsx);
        assert_eq!(p.qgemm, None);
    }
}
