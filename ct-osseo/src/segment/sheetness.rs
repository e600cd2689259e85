//! Descoteaux 片状度增强.
//!
//! 对 Gaussian 平滑后的体数据求 Hessian 特征值, 以片状/块状/噪声三个
//! 比值组合出片状结构响应, 用于突出薄层皮质骨.

use nalgebra::Matrix3;
use ndarray::{Array3, Zip};

use crate::data::Grid3;

/// 片状比值的敏感度.
const ALPHA: f64 = 0.5;
/// 块状比值的敏感度.
const BETA: f64 = 0.5;

/// 单尺度 Descoteaux 片状度.
///
/// `sigma` 为 Hessian 的 Gaussian 尺度 (毫米), 取皮质骨厚度时响应最强.
/// 噪声项的敏感度自适应取全图最大 Frobenius 范数的一半, 输出落在 [0, 1].
/// 亮片状结构要求最大特征值显著为负, 因此该函数只响应暗背景上的亮片.
pub fn descoteaux_sheetness(scan: &Grid3<f32>, sigma: f64) -> Grid3<f32> {
    let smoothed = super::gaussian_smooth(scan, sigma);
    let (nz, nh, nw) = smoothed.shape();
    let sp = smoothed.geom().spacing();

    // 第一趟: 逐体素 Hessian 特征值 (按绝对值升序) 与 Frobenius 范数.
    let mut ev1 = Array3::<f32>::zeros((nz, nh, nw));
    let mut ev2 = Array3::<f32>::zeros((nz, nh, nw));
    let mut ev3 = Array3::<f32>::zeros((nz, nh, nw));
    let data = smoothed.data();
    Zip::indexed(&mut ev1)
        .and(&mut ev2)
        .and(&mut ev3)
        .par_for_each(|(z, h, w), e1, e2, e3| {
            let at = |dz: i64, dh: i64, dw: i64| -> f64 {
                let zz = (z as i64 + dz).clamp(0, nz as i64 - 1) as usize;
                let hh = (h as i64 + dh).clamp(0, nh as i64 - 1) as usize;
                let ww = (w as i64 + dw).clamp(0, nw as i64 - 1) as usize;
                data[(zz, hh, ww)] as f64
            };
            let c = at(0, 0, 0);
            // 物理坐标按 (x, y, z) = (w, h, z) 排列.
            let (sx, sy, sz) = (sp[2], sp[1], sp[0]);
            let dxx = (at(0, 0, 1) - 2.0 * c + at(0, 0, -1)) / (sx * sx);
            let dyy = (at(0, 1, 0) - 2.0 * c + at(0, -1, 0)) / (sy * sy);
            let dzz = (at(1, 0, 0) - 2.0 * c + at(-1, 0, 0)) / (sz * sz);
            let dxy = (at(0, 1, 1) - at(0, 1, -1) - at(0, -1, 1) + at(0, -1, -1))
                / (4.0 * sx * sy);
            let dxz = (at(1, 0, 1) - at(1, 0, -1) - at(-1, 0, 1) + at(-1, 0, -1))
                / (4.0 * sx * sz);
            let dyz = (at(1, 1, 0) - at(1, -1, 0) - at(-1, 1, 0) + at(-1, -1, 0))
                / (4.0 * sy * sz);

            let hess = Matrix3::new(dxx, dxy, dxz, dxy, dyy, dyz, dxz, dyz, dzz);
            let mut ev: Vec<f64> = hess
                .symmetric_eigen()
                .eigenvalues
                .iter()
                .copied()
                .collect();
            ev.sort_by(|a, b| a.abs().total_cmp(&b.abs()));
            *e1 = ev[0] as f32;
            *e2 = ev[1] as f32;
            *e3 = ev[2] as f32;
        });

    // 噪声敏感度取最大 Frobenius 范数的一半.
    let max_frobenius = {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
        let (s1, s2, s3) = (
            ev1.as_slice().expect("连续存储"),
            ev2.as_slice().expect("连续存储"),
            ev3.as_slice().expect("连续存储"),
        );
        s1.into_par_iter()
            .zip(s2)
            .zip(s3)
            .map(|((a, b), c)| {
                ((*a as f64).powi(2) + (*b as f64).powi(2) + (*c as f64).powi(2)).sqrt()
            })
            .reduce(|| 0.0, f64::max)
    };
    let c = 0.5 * max_frobenius;

    let mut out = Grid3::zeros(scan.region(), *scan.geom());
    if c <= 0.0 {
        return out;
    }

    // 第二趟: 组合三个比值.
    Zip::from(out.data_mut())
        .and(&ev1)
        .and(&ev2)
        .and(&ev3)
        .par_for_each(|o, &e1, &e2, &e3| {
            let (l1, l2, l3) = (e1 as f64, e2 as f64, e3 as f64);
            // 亮片要求最大特征值为负.
            if l3 >= 0.0 || l3.abs() < f64::EPSILON {
                *o = 0.0;
                return;
            }
            let r_sheet = l2.abs() / l3.abs();
            let r_blob = (2.0 * l3.abs() - l2.abs() - l1.abs()).abs() / l3.abs();
            let r_noise = (l1 * l1 + l2 * l2 + l3 * l3).sqrt();
            let s = (-r_sheet * r_sheet / (2.0 * ALPHA * ALPHA)).exp()
                * (1.0 - (-r_blob * r_blob / (2.0 * BETA * BETA)).exp())
                * (1.0 - (-r_noise * r_noise / (2.0 * c * c)).exp());
            *o = s as f32;
        });
    out
}
