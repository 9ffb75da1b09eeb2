//! Fused bias addition and activation.
//!
//! Every compute kernel hands its raw output matrix to [`apply_activation`]
//! as the final step: for each row, optionally add that row's scalar bias
//! (broadcast across the row), then apply the activation transform, in
//! place. Rows are processed top to bottom in 4-lane vector chunks with a
//! scalar tail, and both paths use the same per-lane arithmetic, so the
//! vectorized sweep matches a pure scalar reference exactly.
//!
//! The pass is built from two small strategies composed by sequencing: an
//! activation kind supplies a per-chunk and a per-scalar transform, and a
//! bias rule supplies the same two shapes. Identity with no bias is
//! recognized up front and skipped without touching the buffer.
//!
//! The engine holds no state; callers may run it concurrently on disjoint
//! buffers, or on disjoint row ranges of one buffer.

use thiserror::Error;
use wide::f32x4;
use wide::CmpGt;

/// Lanes per vector chunk.
const LANES: usize = 4;

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("clip bounds inverted: min {min} > max {max}")]
    InvertedClipBounds { min: f32, max: f32 },
}

/// Which transform to apply, with its parameters carried by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationKind {
    Identity,
    Relu,
    LeakyRelu { alpha: f32 },
    Clip { min: f32, max: f32 },
    HardSigmoid { alpha: f32, beta: f32 },
}

/// Activation descriptor passed alongside a kernel's output parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Activation {
    kind: ActivationKind,
}

impl Activation {
    pub fn identity() -> Self {
        Activation {
            kind: ActivationKind::Identity,
        }
    }

    pub fn relu() -> Self {
        Activation {
            kind: ActivationKind::Relu,
        }
    }

    pub fn leaky_relu(alpha: f32) -> Self {
        Activation {
            kind: ActivationKind::LeakyRelu { alpha },
        }
    }

    pub fn clip(min: f32, max: f32) -> Result<Self, ActivationError> {
        if min > max {
            return Err(ActivationError::InvertedClipBounds { min, max });
        }
        Ok(Activation {
            kind: ActivationKind::Clip { min, max },
        })
    }

    pub fn hard_sigmoid(alpha: f32, beta: f32) -> Self {
        Activation {
            kind: ActivationKind::HardSigmoid { alpha, beta },
        }
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }
}

// ── Strategy traits ────────────────────────────────────────────────────

/// One activation kind: a chunked transform and its scalar twin.
trait ActivationFn {
    fn vector(&self, v: f32x4) -> f32x4;
    fn scalar(&self, v: f32) -> f32;
}

struct IdentityFn;

impl ActivationFn for IdentityFn {
    #[inline(always)]
    fn vector(&self, v: f32x4) -> f32x4 {
        v
    }

    #[inline(always)]
    fn scalar(&self, v: f32) -> f32 {
        v
    }
}

struct ReluFn;

impl ActivationFn for ReluFn {
    #[inline(always)]
    fn vector(&self, v: f32x4) -> f32x4 {
        v.max(f32x4::ZERO)
    }

    #[inline(always)]
    fn scalar(&self, v: f32) -> f32 {
        v.max(0.0)
    }
}

struct LeakyReluFn {
    alpha: f32,
    alpha_v: f32x4,
}

impl LeakyReluFn {
    fn new(alpha: f32) -> Self {
        LeakyReluFn {
            alpha,
            alpha_v: f32x4::splat(alpha),
        }
    }
}

impl ActivationFn for LeakyReluFn {
    #[inline(always)]
    fn vector(&self, v: f32x4) -> f32x4 {
        v.cmp_gt(f32x4::ZERO).blend(v, v * self.alpha_v)
    }

    #[inline(always)]
    fn scalar(&self, v: f32) -> f32 {
        if v > 0.0 {
            v
        } else {
            v * self.alpha
        }
    }
}

struct ClipFn {
    min: f32,
    max: f32,
    min_v: f32x4,
    max_v: f32x4,
}

impl ClipFn {
    fn new(min: f32, max: f32) -> Self {
        ClipFn {
            min,
            max,
            min_v: f32x4::splat(min),
            max_v: f32x4::splat(max),
        }
    }
}

impl ActivationFn for ClipFn {
    #[inline(always)]
    fn vector(&self, v: f32x4) -> f32x4 {
        v.max(self.min_v).min(self.max_v)
    }

    #[inline(always)]
    fn scalar(&self, v: f32) -> f32 {
        v.max(self.min).min(self.max)
    }
}

struct HardSigmoidFn {
    alpha: f32,
    beta: f32,
    alpha_v: f32x4,
    beta_v: f32x4,
    one_v: f32x4,
}

impl HardSigmoidFn {
    fn new(alpha: f32, beta: f32) -> Self {
        HardSigmoidFn {
            alpha,
            beta,
            alpha_v: f32x4::splat(alpha),
            beta_v: f32x4::splat(beta),
            one_v: f32x4::splat(1.0),
        }
    }
}

impl ActivationFn for HardSigmoidFn {
    #[inline(always)]
    fn vector(&self, v: f32x4) -> f32x4 {
        (v * self.alpha_v + self.beta_v)
            .max(f32x4::ZERO)
            .min(self.one_v)
    }

    #[inline(always)]
    fn scalar(&self, v: f32) -> f32 {
        (v * self.alpha + self.beta).max(0.0).min(1.0)
    }
}

/// Bias presence: the same two shapes as an activation, applied first.
trait BiasRule {
    fn load_row(&mut self, row: usize);
    fn vector(&self, v: f32x4) -> f32x4;
    fn scalar(&self, v: f32) -> f32;
}

struct PerRowBias<'a> {
    bias: &'a [f32],
    current: f32,
    broadcast: f32x4,
}

impl<'a> PerRowBias<'a> {
    fn new(bias: &'a [f32]) -> Self {
        PerRowBias {
            bias,
            current: 0.0,
            broadcast: f32x4::ZERO,
        }
    }
}

impl BiasRule for PerRowBias<'_> {
    #[inline(always)]
    fn load_row(&mut self, row: usize) {
        self.current = self.bias[row];
        self.broadcast = f32x4::splat(self.current);
    }

    #[inline(always)]
    fn vector(&self, v: f32x4) -> f32x4 {
        v + self.broadcast
    }

    #[inline(always)]
    fn scalar(&self, v: f32) -> f32 {
        v + self.current
    }
}

struct NoBias;

impl BiasRule for NoBias {
    #[inline(always)]
    fn load_row(&mut self, _row: usize) {}

    #[inline(always)]
    fn vector(&self, v: f32x4) -> f32x4 {
        v
    }

    #[inline(always)]
    fn scalar(&self, v: f32) -> f32 {
        v
    }
}

// ── The sweep ──────────────────────────────────────────────────────────

/// Step over the output matrix, composing bias then activation per element.
fn sweep<A: ActivationFn, B: BiasRule>(
    act: &A,
    mut bias: B,
    buffer: &mut [f32],
    m: usize,
    n: usize,
    ldc: usize,
) {
    for r in 0..m {
        bias.load_row(r);
        let row = &mut buffer[r * ldc..r * ldc + n];

        let mut chunks = row.chunks_exact_mut(LANES);
        for chunk in &mut chunks {
            let v = f32x4::from([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let v = act.vector(bias.vector(v));
            chunk.copy_from_slice(&v.to_array());
        }
        for x in chunks.into_remainder() {
            *x = act.scalar(bias.scalar(*x));
        }
    }
}

fn run<A: ActivationFn>(
    act: &A,
    buffer: &mut [f32],
    bias: Option<&[f32]>,
    m: usize,
    n: usize,
    ldc: usize,
) {
    match bias {
        Some(b) => sweep(act, PerRowBias::new(b), buffer, m, n, ldc),
        None => sweep(act, NoBias, buffer, m, n, ldc),
    }
}

/// Apply an activation to an `m`×`n` output matrix in place, optionally
/// adding a per-row scalar bias first.
///
/// `buffer` is addressed as `row * ldc + col` with `ldc >= n`; columns
/// `n..ldc` of each row are never read or written. `bias`, when present,
/// holds one value per row. Shape consistency is the caller's contract and
/// is only debug-asserted.
pub fn apply_activation(
    activation: &Activation,
    buffer: &mut [f32],
    bias: Option<&[f32]>,
    m: usize,
    n: usize,
    ldc: usize,
) {
    debug_assert!(ldc >= n, "row stride {ldc} shorter than row width {n}");
    if let Some(b) = bias {
        debug_assert_eq!(b.len(), m, "bias length must equal row count");
    }
    debug_assert!(m == 0 || buffer.len() >= (m - 1) * ldc + n);

    match activation.kind {
        ActivationKind::Identity => match bias {
            // Identity with no bias is a no-op: skip the sweep entirely.
            None => {}
            Some(b) => sweep(&IdentityFn, PerRowBias::new(b), buffer, m, n, ldc),
        },
        ActivationKind::Relu => run(&ReluFn, buffer, bias, m, n, ldc),
        ActivationKind::LeakyRelu { alpha } => {
            run(&LeakyReluFn::new(alpha), buffer, bias, m, n, ldc)
        }
        ActivationKind::Clip { min, max } => run(&ClipFn::new(min, max), buffer, bias, m, n, ldc),
        ActivationKind::HardSigmoid { alpha, beta } => {
            run(&HardSigmoidFn::new(alpha, beta), buffer, bias, m, n, ldc)
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_clamps_negatives() {
        let mut buf = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        apply_activation(&Activation::relu(), &mut buf, None, 1, 5, 5);
        assert_eq!(buf, vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn leaky_relu_scales_negatives() {
        let mut buf = vec![-2.0, -1.0, 0.0, 1.0];
        apply_activation(&Activation::leaky_relu(0.1), &mut buf, None, 1, 4, 4);
        assert_eq!(buf, vec![-0.2, -0.1, 0.0, 1.0]);
    }

    #[test]
    fn clip_bounds_both_sides() {
        let mut buf = vec![-5.0, -0.5, 0.5, 5.0, 0.0, 1.0];
        let act = Activation::clip(-1.0, 1.0).unwrap();
        apply_activation(&act, &mut buf, None, 1, 6, 6);
        assert_eq!(buf, vec![-1.0, -0.5, 0.5, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn clip_rejects_inverted_bounds() {
        assert!(matches!(
            Activation::clip(1.0, -1.0),
            Err(ActivationError::InvertedClipBounds { .. })
        ));
    }

    #[test]
    fn hard_sigmoid_saturates() {
        let mut buf = vec![-100.0, 0.0, 100.0];
        apply_activation(&Activation::hard_sigmoid(0.2, 0.5), &mut buf, None, 1, 3, 3);
        assert_eq!(buf, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn bias_broadcasts_one_scalar_per_row() {
        // 2 rows x 3 cols, stride 3.
        let mut buf = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let bias = [10.0, 20.0];
        apply_activation(&Activation::identity(), &mut buf, Some(&bias), 2, 3, 3);
        assert_eq!(buf, vec![11.0, 12.0, 13.0, 24.0, 25.0, 26.0]);
    }

    #[test]
    fn identity_without_bias_leaves_nan_bits_alone() {
        let sentinel = f32::from_bits(0x7FC0_1234);
        let mut buf = vec![sentinel; 9];
        apply_activation(&Activation::identity(), &mut buf, None, 3, 3, 3);
        for x in &buf {
            assert_eq!(x.to_bits(), 0x7FC0_1234);
        }
    }

    #[test]
    fn stride_padding_is_untouched() {
        // 2 rows x 2 cols, stride 4; padding holds a sentinel.
        let mut buf = vec![1.0, 2.0, -9.0, -9.0, 3.0, 4.0, -9.0, -9.0];
        let bias = [1.0, 1.0];
        apply_activation(&Activation::relu(), &mut buf, Some(&bias), 2, 2, 4);
        assert_eq!(buf, vec![2.0, 3.0, -9.0, -9.0, 4.0, 5.0, -9.0, -9.0]);
    }

    #[test]
    fn empty_shapes_are_no_ops() {
        let mut buf: Vec<f32> = vec![];
        apply_activation(&Activation::relu(), &mut buf, None, 0, 0, 0);
        let mut buf = vec![7.0; 4];
        apply_activation(&Activation::relu(), &mut buf, Some(&[1.0; 4]), 4, 0, 1);
        assert_eq!(buf, vec![7.0; 4]);
    }
}
