//! SIMD-accelerated vector kernels for the dense level-set solvers
//!
//! When the `simd` feature is enabled these use 128-bit SIMD (f32x4), which
//! maps to SSE/NEON natively and to WASM SIMD in the browser.
//!
//! All operations have scalar fallbacks when SIMD is disabled.

#[cfg(feature = "simd")]
use wide::f32x4;

/// SIMD lane width (4 for f32x4)
#[cfg(feature = "simd")]
pub const SIMD_WIDTH: usize = 4;

#[cfg(not(feature = "simd"))]
pub const SIMD_WIDTH: usize = 1;

// ============================================================================
// Fused Multiply-Add Operations
// ============================================================================

/// Compute a[i] = a[i] + alpha * b[i] (axpy operation)
#[cfg(feature = "simd")]
#[inline]
pub fn axpy_f32(a: &mut [f32], alpha: f32, b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    let n = a.len();
    let chunks = n / SIMD_WIDTH;
    let remainder = n % SIMD_WIDTH;

    let valpha = f32x4::splat(alpha);

    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let va = f32x4::from(&a[idx..idx + SIMD_WIDTH]);
        let vb = f32x4::from(&b[idx..idx + SIMD_WIDTH]);
        let result = va + valpha * vb;
        a[idx..idx + SIMD_WIDTH].copy_from_slice(result.as_array_ref());
    }

    let start = chunks * SIMD_WIDTH;
    for i in 0..remainder {
        a[start + i] += alpha * b[start + i];
    }
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn axpy_f32(a: &mut [f32], alpha: f32, b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    for (ai, &bi) in a.iter_mut().zip(b.iter()) {
        *ai += alpha * bi;
    }
}

// ============================================================================
// Reductions
// ============================================================================

/// Compute max(|a[i]|), 0 for an empty slice
#[cfg(feature = "simd")]
#[inline]
pub fn max_abs_f32(a: &[f32]) -> f32 {
    let n = a.len();
    let chunks = n / SIMD_WIDTH;
    let remainder = n % SIMD_WIDTH;

    let mut vmax = f32x4::ZERO;
    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let va = f32x4::from(&a[idx..idx + SIMD_WIDTH]);
        vmax = vmax.max(va.abs());
    }

    let mut result = vmax.to_array().iter().fold(0.0f32, |m, &v| m.max(v));

    let start = chunks * SIMD_WIDTH;
    for i in 0..remainder {
        result = result.max(a[start + i].abs());
    }

    result
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn max_abs_f32(a: &[f32]) -> f32 {
    a.iter().fold(0.0f32, |m, &v| m.max(v.abs()))
}

/// True when every element is finite
#[inline]
pub fn all_finite_f32(a: &[f32]) -> bool {
    a.iter().all(|v| v.is_finite())
}

// ============================================================================
// Element-wise Operations
// ============================================================================

/// Clamp every element into [lo, hi] in place
#[cfg(feature = "simd")]
#[inline]
pub fn clamp_f32(a: &mut [f32], lo: f32, hi: f32) {
    let n = a.len();
    let chunks = n / SIMD_WIDTH;
    let remainder = n % SIMD_WIDTH;

    let vlo = f32x4::splat(lo);
    let vhi = f32x4::splat(hi);

    for i in 0..chunks {
        let idx = i * SIMD_WIDTH;
        let va = f32x4::from(&a[idx..idx + SIMD_WIDTH]);
        let result = va.max(vlo).min(vhi);
        a[idx..idx + SIMD_WIDTH].copy_from_slice(result.as_array_ref());
    }

    let start = chunks * SIMD_WIDTH;
    for i in 0..remainder {
        a[start + i] = a[start + i].clamp(lo, hi);
    }
}

#[cfg(not(feature = "simd"))]
#[inline]
pub fn clamp_f32(a: &mut [f32], lo: f32, hi: f32) {
    for v in a.iter_mut() {
        *v = v.clamp(lo, hi);
    }
}
