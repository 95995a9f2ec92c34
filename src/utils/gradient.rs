//! Finite difference operators on flat volumes
//!
//! Central differences with zero-flux (clamped) boundaries, scaled by the
//! voxel size along each axis.

/// Central difference gradient
///
/// # Arguments
/// * `x` - Input array (nx * ny * nz)
/// * `nx`, `ny`, `nz` - Array dimensions
/// * `vsx`, `vsy`, `vsz` - Voxel sizes
///
/// # Returns
/// Tuple of (gx, gy, gz), each nx * ny * nz
pub fn central_gradient(
    x: &[f32],
    nx: usize, ny: usize, nz: usize,
    vsx: f64, vsy: f64, vsz: f64,
) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let n_total = nx * ny * nz;
    let mut gx = vec![0.0f32; n_total];
    let mut gy = vec![0.0f32; n_total];
    let mut gz = vec![0.0f32; n_total];

    let hx = (0.5 / vsx) as f32;
    let hy = (0.5 / vsy) as f32;
    let hz = (0.5 / vsz) as f32;

    // Fortran order: index = i + j*nx + k*nx*ny
    for k in 0..nz {
        let km1 = k.saturating_sub(1);
        let kp1 = (k + 1).min(nz - 1);
        for j in 0..ny {
            let jm1 = j.saturating_sub(1);
            let jp1 = (j + 1).min(ny - 1);
            for i in 0..nx {
                let im1 = i.saturating_sub(1);
                let ip1 = (i + 1).min(nx - 1);

                let idx = i + j * nx + k * nx * ny;
                gx[idx] = (x[ip1 + j * nx + k * nx * ny] - x[im1 + j * nx + k * nx * ny]) * hx;
                gy[idx] = (x[i + jp1 * nx + k * nx * ny] - x[i + jm1 * nx + k * nx * ny]) * hy;
                gz[idx] = (x[i + j * nx + kp1 * nx * ny] - x[i + j * nx + km1 * nx * ny]) * hz;
            }
        }
    }

    (gx, gy, gz)
}

/// Gradient magnitude |∇x| using central differences
pub fn gradient_magnitude(
    x: &[f32],
    nx: usize, ny: usize, nz: usize,
    vsx: f64, vsy: f64, vsz: f64,
) -> Vec<f32> {
    let (gx, gy, gz) = central_gradient(x, nx, ny, nz, vsx, vsy, vsz);
    gx.iter()
        .zip(gy.iter())
        .zip(gz.iter())
        .map(|((&a, &b), &c)| (a * a + b * b + c * c).sqrt())
        .collect()
}
