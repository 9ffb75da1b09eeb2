//! Scalar baseline descriptor for architectures without a probe.
//!
//! Targets outside x86-64 / AArch64 / POWER get portable scalar kernels and
//! the default tuning constants; there is nothing to probe.

use std::fmt;

use crate::arch::{BASE_MAXIMUM_THREAD_COUNT, DEFAULT_PREFERRED_BUFFER_ALIGNMENT};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCaps;

/// Dense f32 matmul kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmF32Kernel {
    Scalar,
}

impl GemmF32Kernel {
    pub fn rank(self) -> usize {
        0
    }

    pub fn name(self) -> &'static str {
        "scalar"
    }
}

/// Quantized matmul dispatch handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QGemmDispatch {
    Scalar,
}

impl QGemmDispatch {
    pub fn rank(self) -> usize {
        0
    }

    pub fn name(self) -> &'static str {
        "scalar"
    }
}

/// NCHW convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvKernel {
    Scalar,
}

impl ConvKernel {
    pub fn rank(self) -> usize {
        0
    }

    pub fn name(self) -> &'static str {
        "scalar"
    }
}

/// Linear-quantization encode kernel (per output sign).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeLinearKernel {
    Scalar,
}

impl QuantizeLinearKernel {
    pub fn rank(self) -> usize {
        0
    }

    pub fn name(self) -> &'static str {
        "scalar"
    }
}

/// Per-process descriptor of selected call targets and tuning constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub gemm_f32: GemmF32Kernel,
    pub qgemm_u8u8: QGemmDispatch,
    pub qgemm_u8s8: QGemmDispatch,
    pub conv: ConvKernel,
    pub quantize_linear_s8: QuantizeLinearKernel,
    pub quantize_linear_u8: QuantizeLinearKernel,
    pub preferred_buffer_alignment: usize,
    pub maximum_thread_count: usize,
    pub nchwc_block_size: usize,
}

impl Platform {
    pub fn baseline() -> Self {
        Platform {
            gemm_f32: GemmF32Kernel::Scalar,
            qgemm_u8u8: QGemmDispatch::Scalar,
            qgemm_u8s8: QGemmDispatch::Scalar,
            conv: ConvKernel::Scalar,
            quantize_linear_s8: QuantizeLinearKernel::Scalar,
            quantize_linear_u8: QuantizeLinearKernel::Scalar,
            preferred_buffer_alignment: DEFAULT_PREFERRED_BUFFER_ALIGNMENT,
            maximum_thread_count: BASE_MAXIMUM_THREAD_COUNT,
            nchwc_block_size: 1,
        }
    }

    pub fn from_caps(_caps: &CpuCaps) -> Self {
        Platform::baseline()
    }

    pub fn detect() -> Self {
        Platform::baseline()
    }

    pub fn gemm_f32(&self) -> GemmF32Kernel {
        self.gemm_f32
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
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sgemm={} conv={} | align={} threads={}",
            self.gemm_f32.name(),
            self.conv.name(),
            self.preferred_buffer_alignment,
            self.maximum_thread_count,
        )
    }
}
