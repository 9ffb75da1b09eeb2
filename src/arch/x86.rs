//! x86-64 capability probe and kernel selection policy.
//!
//! Probing reads raw CPUID leaves 1 and 7 plus the XCR0 extended control
//! register; the bits land in `CpuCaps` exactly as the hardware reports
//! them. No bit implies another — the selection policy re-checks every
//! prerequisite itself, so a capability set with (say) AVX512-VNNI but no
//! AVX2 resolves to the strongest tier whose full prerequisite chain holds.
//!
//! AMX is special: beyond the CPUID bits the kernel must grant tile-data
//! state permission via `arch_prctl`, requested at most once per process.
//! Denial, failure, or a non-Linux build all read as "AMX unavailable".

use std::fmt;

use crate::arch::{BASE_MAXIMUM_THREAD_COUNT, DEFAULT_PREFERRED_BUFFER_ALIGNMENT};

// ── Capability bit set ─────────────────────────────────────────────────

/// Raw hardware/OS capability bits for x86-64. Read-only after probing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCaps {
    pub sse41: bool,
    pub avx: bool,
    /// XCR0 confirms the OS saves SSE+YMM register state.
    pub os_saves_ymm: bool,
    /// XCR0 additionally confirms opmask/ZMM state saving.
    pub os_saves_zmm: bool,
    pub avx2: bool,
    pub fma3: bool,
    /// Hybrid core topology (performance + efficiency cores).
    pub hybrid: bool,
    /// AVX-VNNI proper (leaf 7 subleaf 1). Probed but currently wired to no
    /// specialization.
    pub avx_vnni: bool,
    pub avx512f: bool,
    /// AVX512BW, AVX512DQ, and AVX512VL all present.
    pub avx512_core: bool,
    pub avx512_vnni: bool,
    pub amx_tile: bool,
    pub amx_int8: bool,
    /// The one-time `arch_prctl` tile-data grant succeeded.
    pub amx_os_granted: bool,
}

#[cfg(target_arch = "x86_64")]
impl CpuCaps {
    /// Probe the running processor. Never fails; any query that cannot be
    /// made reads as "feature absent".
    pub fn probe() -> Self {
        use std::arch::x86_64::{__cpuid, __cpuid_count};

        let mut caps = CpuCaps::default();

        let leaf0 = unsafe { __cpuid(0) };
        let max_leaf = leaf0.eax;

        let leaf1 = unsafe { __cpuid(1) };
        caps.sse41 = leaf1.ecx & (1 << 19) != 0;
        caps.fma3 = leaf1.ecx & (1 << 12) != 0;
        caps.avx = leaf1.ecx & (1 << 28) != 0;
        let osxsave = leaf1.ecx & (1 << 27) != 0;

        // XCR0 is only readable once CPUID confirms OSXSAVE.
        if caps.avx && osxsave {
            let xcr0 = read_xcr0();
            caps.os_saves_ymm = xcr0 & 0x6 == 0x6;
            caps.os_saves_zmm = xcr0 & 0xE6 == 0xE6;
        }

        if max_leaf >= 7 {
            let leaf7 = unsafe { __cpuid_count(7, 0) };
            caps.avx2 = leaf7.ebx & (1 << 5) != 0;
            caps.avx512f = leaf7.ebx & (1 << 16) != 0;
            let dq = leaf7.ebx & (1 << 17) != 0;
            let bw = leaf7.ebx & (1 << 30) != 0;
            let vl = leaf7.ebx & (1 << 31) != 0;
            caps.avx512_core = bw && dq && vl;
            caps.avx512_vnni = leaf7.ecx & (1 << 11) != 0;
            caps.hybrid = leaf7.edx & (1 << 15) != 0;
            caps.amx_tile = leaf7.edx & (1 << 24) != 0;
            caps.amx_int8 = leaf7.edx & (1 << 25) != 0;

            if leaf7.eax >= 1 {
                let leaf7_1 = unsafe { __cpuid_count(7, 1) };
                caps.avx_vnni = leaf7_1.eax & (1 << 4) != 0;
            }
        }

        if caps.amx_tile && caps.amx_int8 {
            caps.amx_os_granted = request_amx_permission();
        }

        log::debug!("x86 caps: {caps:?}");
        caps
    }
}

/// Read the XCR0 extended control register. Caller must have confirmed the
/// OSXSAVE CPUID bit first.
#[cfg(target_arch = "x86_64")]
fn read_xcr0() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        std::arch::asm!(
            "xgetbv",
            in("ecx") 0u32,
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack, preserves_flags),
        );
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Ask the kernel to enable AMX tile-data state for this process.
///
/// Grant state is cached in an AtomicU8 (0=unasked, 1=granted, 2=denied)
/// so the syscall fires at most once per process. Any failure mode — the
/// call returning nonzero, or a build without arch_prctl — reads as
/// denied.
#[cfg(target_arch = "x86_64")]
fn request_amx_permission() -> bool {
    use std::sync::atomic::{AtomicU8, Ordering};

    static STATE: AtomicU8 = AtomicU8::new(0);
    match STATE.load(Ordering::Relaxed) {
        1 => return true,
        2 => return false,
        _ => {}
    }
    #[cfg(target_os = "linux")]
    {
        const ARCH_REQ_XCOMP_PERM: i32 = 0x1023;
        const XFEATURE_XTILEDATA: u64 = 18;
        let ret = unsafe { arch_prctl_raw(ARCH_REQ_XCOMP_PERM, XFEATURE_XTILEDATA) };
        let ok = ret == 0;
        if !ok {
            log::warn!("AMX tile-data permission denied (arch_prctl returned {ret})");
        }
        STATE.store(if ok { 1 } else { 2 }, Ordering::Relaxed);
        ok
    }
    #[cfg(not(target_os = "linux"))]
    {
        STATE.store(2, Ordering::Relaxed);
        false
    }
}

/// Raw arch_prctl, which libc does not expose a binding for.
#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
unsafe fn arch_prctl_raw(code: i32, addr: u64) -> i64 {
    let ret: i64;
    std::arch::asm!(
        "syscall",
        in("rax") 158i64, // __NR_arch_prctl
        in("rdi") code as i64,
        in("rsi") addr,
        out("rcx") _,
        out("r11") _,
        lateout("rax") ret,
        options(nostack),
    );
    ret
}

// ── Kernel selectors ───────────────────────────────────────────────────

/// Dense f32 matmul kernel variants, baseline first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmF32Kernel {
    Sse,
    Avx,
    Fma3,
}

impl GemmF32Kernel {
    pub fn rank(self) -> usize {
        match self {
            Self::Sse => 0,
            Self::Avx => 1,
            Self::Fma3 => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Avx => "avx",
            Self::Fma3 => "fma3",
        }
    }
}

/// Dense f64 matmul kernel variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmF64Kernel {
    Sse,
    Avx,
    Fma3,
}

impl GemmF64Kernel {
    pub fn rank(self) -> usize {
        match self {
            Self::Sse => 0,
            Self::Avx => 1,
            Self::Fma3 => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Avx => "avx",
            Self::Fma3 => "fma3",
        }
    }
}

/// Quantized matmul dispatch handle. Each variant stands for an opaque
/// pack/compute/requantize bundle owned by the kernel crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QGemmDispatch {
    Baseline,
    Sse41,
    Avx2Vnni,
    Amx,
}

impl QGemmDispatch {
    pub fn rank(self) -> usize {
        match self {
            Self::Baseline => 0,
            Self::Sse41 => 1,
            Self::Avx2Vnni => 2,
            Self::Amx => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Sse41 => "sse41",
            Self::Avx2Vnni => "avx2-vnni",
            Self::Amx => "amx",
        }
    }
}

/// NCHW convolution kernel variants. Mirrors the dense matmul precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvKernel {
    Sse,
    Avx,
    Fma3,
}

impl ConvKernel {
    pub fn rank(self) -> usize {
        match self {
            Self::Sse => 0,
            Self::Avx => 1,
            Self::Fma3 => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Avx => "avx",
            Self::Fma3 => "fma3",
        }
    }
}

/// Linear-quantization encode kernel variants (per output sign).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeLinearKernel {
    Sse2,
    Avx512,
}

impl QuantizeLinearKernel {
    pub fn rank(self) -> usize {
        match self {
            Self::Sse2 => 0,
            Self::Avx512 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sse2 => "sse2",
            Self::Avx512 => "avx512",
        }
    }
}

// ── Platform descriptor + selection policy ─────────────────────────────

/// Per-process descriptor of selected call targets and tuning constants.
/// Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub gemm_f32: GemmF32Kernel,
    pub gemm_f64: GemmF64Kernel,
    pub qgemm_u8u8: QGemmDispatch,
    pub qgemm_u8s8: QGemmDispatch,
    pub conv: ConvKernel,
    pub quantize_linear_s8: QuantizeLinearKernel,
    pub quantize_linear_u8: QuantizeLinearKernel,
    pub preferred_buffer_alignment: usize,
    pub maximum_thread_count: usize,
    /// Block size of the packed cache-blocked (NCHWc) layout.
    pub nchwc_block_size: usize,
}

impl Platform {
    /// The baseline descriptor: valid on every x86-64 processor.
    pub fn baseline() -> Self {
        Platform {
            gemm_f32: GemmF32Kernel::Sse,
            gemm_f64: GemmF64Kernel::Sse,
            qgemm_u8u8: QGemmDispatch::Baseline,
            qgemm_u8s8: QGemmDispatch::Baseline,
            conv: ConvKernel::Sse,
            quantize_linear_s8: QuantizeLinearKernel::Sse2,
            quantize_linear_u8: QuantizeLinearKernel::Sse2,
            preferred_buffer_alignment: DEFAULT_PREFERRED_BUFFER_ALIGNMENT,
            maximum_thread_count: BASE_MAXIMUM_THREAD_COUNT,
            nchwc_block_size: 8,
        }
    }

    /// Apply the selection policy to a capability set.
    ///
    /// Tiers are evaluated weakest to strongest and overwrite forward, so a
    /// larger capability set can only ever select an equal or more
    /// specialized target per category.
    pub fn from_caps(caps: &CpuCaps) -> Self {
        let mut p = Platform::baseline();

        // SSE4.1 tier upgrades the unsigned×signed pair only; the
        // unsigned×unsigned pair stays baseline until a stronger tier.
        if caps.sse41 {
            p.qgemm_u8s8 = QGemmDispatch::Sse41;
        }

        let avx_path = caps.avx && caps.os_saves_ymm;
        if avx_path {
            p.gemm_f32 = GemmF32Kernel::Avx;
            p.gemm_f64 = GemmF64Kernel::Avx;
            p.conv = ConvKernel::Avx;

            if caps.avx2 && caps.fma3 {
                p.gemm_f32 = GemmF32Kernel::Fma3;
                p.gemm_f64 = GemmF64Kernel::Fma3;
                p.conv = ConvKernel::Fma3;

                if caps.avx512f && caps.avx512_core && caps.os_saves_zmm {
                    p.preferred_buffer_alignment = 64;
                    p.nchwc_block_size = 16;
                    p.quantize_linear_s8 = QuantizeLinearKernel::Avx512;
                    p.quantize_linear_u8 = QuantizeLinearKernel::Avx512;
                }

                if caps.avx512_vnni {
                    p.qgemm_u8u8 = QGemmDispatch::Avx2Vnni;
                    p.qgemm_u8s8 = QGemmDispatch::Avx2Vnni;
                }
            }
        }

        // Thread-count heuristic for asymmetric core counts; independent of
        // which matmul kernel was chosen.
        if caps.hybrid {
            p.maximum_thread_count = BASE_MAXIMUM_THREAD_COUNT * 4;
        }

        // AMX needs both tile bits and the one-time OS grant.
        if caps.amx_tile && caps.amx_int8 && caps.amx_os_granted {
            p.qgemm_u8u8 = QGemmDispatch::Amx;
            p.qgemm_u8s8 = QGemmDispatch::Amx;
        }

        p
    }

    /// Probe the running machine and select kernels for it.
    #[cfg(target_arch = "x86_64")]
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

    pub fn conv(&self) -> ConvKernel {
        self.conv
    }

    pub fn qgemm_u8u8(&self) -> QGemmDispatch {
        self.qgemm_u8u8
    }

    pub fn qgemm_u8s8(&self) -> QGemmDispatch {
        self.qgemm_u8s8
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

    /// True when both quantized dispatch handles share one routine, which
    /// saturates rather than wraps on intermediate overflow. Callers use
    /// this to decide whether operands need pre-scaling.
    pub fn quantized_overflow(&self) -> bool {
        self.qgemm_u8u8 == self.qgemm_u8s8
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sgemm={} dgemm={} conv={} qgemm_u8u8={} qgemm_u8s8={} \
             qlinear_s8={} qlinear_u8={} | align={} threads={} nchwc={}",
            self.gemm_f32.name(),
            self.gemm_f64.name(),
            self.conv.name(),
            self.qgemm_u8u8.name(),
            self.qgemm_u8s8.name(),
            self.quantize_linear_s8.name(),
            self.quantize_linear_u8.name(),
            self.preferred_buffer_alignment,
            self.maximum_thread_count,
            self.nchwc_block_size,
        )
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn probe_is_infallible() {
        let caps = CpuCaps::probe();
        eprintln!("probed: {caps:?}");
        // Every x86-64 build target has SSE2; SSE4.1 is near-universal but
        // not guaranteed, so only sanity-check derived state here.
        if caps.os_saves_zmm {
            assert!(caps.os_saves_ymm, "ZMM state save implies YMM state save");
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn detect_matches_probe_policy() {
        let p1 = Platform::detect();
        let p2 = Platform::from_caps(&CpuCaps::probe());
        assert_eq!(p1, p2);
    }

    #[test]
    fn avx_reported_but_os_opted_out_stays_sse() {
        let caps = CpuCaps {
            avx: true,
            avx2: true,
            fma3: true,
            ..CpuCaps::default()
        };
        let p = Platform::from_caps(&caps);
        assert_eq!(p.gemm_f32, GemmF32Kernel::Sse);
        assert_eq!(p.conv, ConvKernel::Sse);
    }

    #[test]
    fn display_names_every_slot() {
        let p = Platform::baseline();
        let s = p.to_string();
        for needle in ["sgemm=", "dgemm=", "conv=", "qgemm_u8u8=", "align=32"] {
            assert!(s.contains(needle), "missing {needle} in {s}");
        }
    }
}
