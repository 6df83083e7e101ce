//! Distance kernels for `f64` descriptors
//!
//! Explicit SIMD paths for aarch64 (NEON) and x86_64 (AVX2+FMA), with a scalar
//! fallback. Face descriptors are 128-dimensional, so the vector loop covers
//! the whole input and the scalar tail only runs for odd test shapes.
//!
//! | Platform     | ISA        | Width             |
//! |--------------|------------|-------------------|
//! | aarch64      | NEON       | 128-bit (2×f64)   |
//! | x86_64+AVX2  | AVX2+FMA   | 256-bit (4×f64)   |
//! | other        | scalar     | 1×f64             |

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistanceError {
    #[error("Shape mismatch: {left} != {right}")]
    ShapeMismatch { left: usize, right: usize },

    #[error("Empty vector")]
    Empty,

    #[error("Unsupported norm order: {0}")]
    InvalidOrder(u32),
}

// ============================================================================
// aarch64 NEON intrinsics
// ============================================================================

#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn dot_product_neon(a: &[f64], b: &[f64]) -> f64 {
    use std::arch::aarch64::*;

    let n = a.len();
    let chunks = n / 2;

    let mut acc = vdupq_n_f64(0.0);
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = vld1q_f64(a_ptr.add(i * 2));
        let vb = vld1q_f64(b_ptr.add(i * 2));
        acc = vfmaq_f64(acc, va, vb);
    }

    let mut sum = vaddvq_f64(acc);
    for i in chunks * 2..n {
        sum += a[i] * b[i];
    }
    sum
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn l2_distance_squared_neon(a: &[f64], b: &[f64]) -> f64 {
    use std::arch::aarch64::*;

    let n = a.len();
    let chunks = n / 2;

    let mut acc = vdupq_n_f64(0.0);
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = vld1q_f64(a_ptr.add(i * 2));
        let vb = vld1q_f64(b_ptr.add(i * 2));
        let diff = vsubq_f64(va, vb);
        acc = vfmaq_f64(acc, diff, diff);
    }

    let mut sum = vaddvq_f64(acc);
    for i in chunks * 2..n {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

// ============================================================================
// x86_64 AVX2 intrinsics (runtime feature detection)
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn horizontal_sum_avx2(acc: std::arch::x86_64::__m256d) -> f64 {
    use std::arch::x86_64::*;

    let hi = _mm256_extractf128_pd(acc, 1);
    let lo = _mm256_castpd256_pd128(acc);
    let pair = _mm_add_pd(lo, hi);
    let high = _mm_unpackhi_pd(pair, pair);
    _mm_cvtsd_f64(_mm_add_sd(pair, high))
}

/// AVX2+FMA dot product: 4 doubles per iteration (unaligned load)
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn dot_product_avx2(a: &[f64], b: &[f64]) -> f64 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 4;

    let mut acc = _mm256_setzero_pd();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = _mm256_loadu_pd(a_ptr.add(i * 4));
        let vb = _mm256_loadu_pd(b_ptr.add(i * 4));
        acc = _mm256_fmadd_pd(va, vb, acc);
    }

    let mut sum = horizontal_sum_avx2(acc);
    for i in chunks * 4..n {
        sum += a[i] * b[i];
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn l2_distance_squared_avx2(a: &[f64], b: &[f64]) -> f64 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 4;

    let mut acc = _mm256_setzero_pd();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = _mm256_loadu_pd(a_ptr.add(i * 4));
        let vb = _mm256_loadu_pd(b_ptr.add(i * 4));
        let diff = _mm256_sub_pd(va, vb);
        acc = _mm256_fmadd_pd(diff, diff, acc);
    }

    let mut sum = horizontal_sum_avx2(acc);
    for i in chunks * 4..n {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

// ============================================================================
// Scalar fallback
// ============================================================================

#[inline(always)]
fn dot_product_scalar(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline(always)]
fn l2_distance_squared_scalar(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

// ============================================================================
// Public dispatch functions
// ============================================================================

/// The kernels read `b` with `a`'s length, so both are cut to the shorter one.
#[inline(always)]
fn common_prefix<'a, 'b>(a: &'a [f64], b: &'b [f64]) -> (&'a [f64], &'b [f64]) {
    let n = a.len().min(b.len());
    (&a[..n], &b[..n])
}

/// Dot product over the common prefix of `a` and `b`
#[inline(always)]
pub fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    let (a, b) = common_prefix(a, b);

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { dot_product_neon(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { dot_product_avx2(a, b) };
        }
    }

    #[allow(unreachable_code)]
    dot_product_scalar(a, b)
}

/// Squared Euclidean distance ||a - b||² over the common prefix
#[inline(always)]
pub fn l2_distance_squared(a: &[f64], b: &[f64]) -> f64 {
    let (a, b) = common_prefix(a, b);

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { l2_distance_squared_neon(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { l2_distance_squared_avx2(a, b) };
        }
    }

    #[allow(unreachable_code)]
    l2_distance_squared_scalar(a, b)
}

/// Euclidean distance ||a - b||₂
#[inline(always)]
pub fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    l2_distance_squared(a, b).sqrt()
}

/// Manhattan distance ||a - b||₁
#[inline]
pub fn l1_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// p-norm distance between two vectors.
///
/// `order = 1` is Manhattan, `order = 2` Euclidean; higher orders use the
/// general `(Σ|aᵢ-bᵢ|ᵖ)^(1/p)` form.
pub fn distance(a: &[f64], b: &[f64], order: u32) -> Result<f64, DistanceError> {
    if a.len() != b.len() {
        return Err(DistanceError::ShapeMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(DistanceError::Empty);
    }

    match order {
        0 => Err(DistanceError::InvalidOrder(order)),
        1 => Ok(l1_distance(a, b)),
        2 => Ok(l2_distance(a, b)),
        p => {
            let p = p as f64;
            let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs().powf(p)).sum();
            Ok(sum.powf(1.0 / p))
        }
    }
}

/// Componentwise mean of equally long vectors.
///
/// Returns `None` for an empty input.
pub fn mean<'a, I>(vectors: I) -> Option<Vec<f64>>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut acc = first.to_vec();
    let mut count = 1usize;

    for v in iter {
        debug_assert_eq!(v.len(), acc.len(), "Vector length mismatch");
        for (a, x) in acc.iter_mut().zip(v) {
            *a += x;
        }
        count += 1;
    }

    let n = count as f64;
    for a in acc.iter_mut() {
        *a /= n;
    }
    Some(acc)
}

/// Componentwise closeness: `|a - b| <= atol + rtol * |b|`.
pub fn all_close(a: &[f64], b: &[f64], rtol: f64, atol: f64) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= atol + rtol * y.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product_basic() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];

        // 1*5 + 2*6 + 3*7 + 4*8 = 70
        assert!((dot_product(&a, &b) - 70.0).abs() < 1e-12);
    }

    #[test]
    fn test_dot_product_descriptor_width() {
        let a: Vec<f64> = (0..128).map(|i| i as f64 / 128.0).collect();
        let b: Vec<f64> = (0..128).map(|i| (127 - i) as f64 / 128.0).collect();

        let expected: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot_product(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_dot_product_odd_length_tail() {
        let a = [1.0, -2.0, 3.0, -4.0, 5.0, 6.0, 7.0];
        let b = [1.0; 7];
        assert!((dot_product(&a, &b) - 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_kernels_stop_at_shorter_input() {
        let long = [2.0; 9];
        let short = [1.0, 3.0];

        assert_eq!(dot_product(&long, &short), 8.0);
        assert_eq!(dot_product(&short, &long), 8.0);
        assert_eq!(l2_distance_squared(&long, &short), 2.0);
        assert_eq!(l2_distance_squared(&short, &[]), 0.0);
    }

    #[test]
    fn test_l2_distance_worked_example() {
        let d = distance(&[1.0, 2.0], &[3.0, 4.0], 2).unwrap();
        assert_eq!(d, 8.0f64.sqrt());
    }

    #[test]
    fn test_l1_distance() {
        let d = distance(&[1.0, 2.0], &[3.0, 5.0], 1).unwrap();
        assert_eq!(d, 5.0);
    }

    #[test]
    fn test_higher_order_distance() {
        let d = distance(&[0.0, 0.0], &[3.0, 4.0], 3).unwrap();
        assert!((d - 91.0f64.powf(1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_distance_symmetry_and_identity() {
        let a = [0.25, -1.5, 3.0, 8.0, 0.125];
        let b = [1.0, 2.0, -3.0, 4.0, 9.5];

        for order in [1, 2] {
            assert_eq!(distance(&a, &b, order).unwrap(), distance(&b, &a, order).unwrap());
            assert_eq!(distance(&a, &a, order).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_distance_shape_mismatch() {
        let result = distance(&[1.0, 2.0], &[1.0, 2.0, 3.0], 2);
        assert!(matches!(result, Err(DistanceError::ShapeMismatch { left: 2, right: 3 })));
    }

    #[test]
    fn test_distance_rejects_empty_and_order_zero() {
        assert_eq!(distance(&[], &[], 2), Err(DistanceError::Empty));
        assert_eq!(distance(&[1.0], &[1.0], 0), Err(DistanceError::InvalidOrder(0)));
    }

    #[test]
    fn test_mean() {
        let a = [1.0, 2.0];
        let b = [3.0, 4.0];
        let m = mean([&a[..], &b[..]]).unwrap();
        assert_eq!(m, vec![2.0, 3.0]);
        assert!(mean(std::iter::empty::<&[f64]>()).is_none());
    }

    #[test]
    fn test_all_close() {
        assert!(all_close(&[1.0, 2.0], &[1.0 + 1e-9, 2.0], 1e-5, 1e-8));
        assert!(!all_close(&[1.0, 2.0], &[1.1, 2.0], 1e-5, 1e-8));
        assert!(!all_close(&[1.0], &[1.0, 2.0], 1e-5, 1e-8));
    }
}
