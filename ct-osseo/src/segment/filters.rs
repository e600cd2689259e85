//! 体数据预处理滤波.

use ndarray::{Array3, Axis, Zip};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

use crate::data::Grid3;

/// 3x3x3 中值滤波, 边界按最近体素复制.
///
/// 用于压制显微 CT 的椒盐噪声, 同时保持皮质骨边缘.
pub fn median_filter(scan: &Grid3<f32>) -> Grid3<f32> {
    let (nz, nh, nw) = scan.shape();
    let src = scan.data();
    let mut out = Array3::<f32>::zeros((nz, nh, nw));

    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(z, mut plane)| {
            let mut window = [0f32; 27];
            for h in 0..nh {
                for w in 0..nw {
                    let mut n = 0;
                    for dz in -1i64..=1 {
                        for dh in -1i64..=1 {
                            for dw in -1i64..=1 {
                                let zz = (z as i64 + dz).clamp(0, nz as i64 - 1) as usize;
                                let hh = (h as i64 + dh).clamp(0, nh as i64 - 1) as usize;
                                let ww = (w as i64 + dw).clamp(0, nw as i64 - 1) as usize;
                                window[n] = src[(zz, hh, ww)];
                                n += 1;
                            }
                        }
                    }
                    window.sort_unstable_by(|a, b| a.total_cmp(b));
                    plane[(h, w)] = window[13];
                }
            }
        });
    Grid3::from_parts(out, scan.index_origin(), *scan.geom())
}

/// 各向同性标准差 `sigma` (毫米) 的可分离 Gaussian 平滑.
///
/// 每个方向的核半径取 `ceil(3 sigma / spacing)`, 边界按最近体素复制.
pub fn gaussian_smooth(scan: &Grid3<f32>, sigma: f64) -> Grid3<f32> {
    let mut data = scan.data().to_owned();
    let sp = scan.geom().spacing();
    for axis in 0..3 {
        let kernel = gaussian_kernel(sigma, sp[axis]);
        data = convolve_axis(&data, axis, &kernel);
    }
    Grid3::from_parts(data, scan.index_origin(), *scan.geom())
}

fn gaussian_kernel(sigma: f64, spacing: f64) -> Vec<f32> {
    let radius = (3.0 * sigma / spacing).ceil().max(1.0) as i64;
    let mut k: Vec<f64> = (-radius..=radius)
        .map(|i| {
            let x = i as f64 * spacing;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = k.iter().sum();
    k.iter_mut().for_each(|v| *v /= sum);
    k.iter().map(|v| *v as f32).collect()
}

fn convolve_axis(data: &Array3<f32>, axis: usize, kernel: &[f32]) -> Array3<f32> {
    let n = data.len_of(Axis(axis));
    let radius = kernel.len() as i64 / 2;
    let mut out = data.clone();

    let outer = usize::from(axis == 0);
    let t = match (axis, outer) {
        (0, _) => 0,
        (1, 0) => 0,
        _ => 1,
    };
    let src = data.view();
    Zip::from(out.axis_iter_mut(Axis(outer)))
        .and(src.axis_iter(Axis(outer)))
        .par_for_each(|mut oplane, iplane| {
            let mut line = vec![0f32; n];
            for (mut olane, ilane) in oplane
                .lanes_mut(Axis(t))
                .into_iter()
                .zip(iplane.lanes(Axis(t)))
            {
                for (dst, src) in line.iter_mut().zip(ilane.iter()) {
                    *dst = *src;
                }
                for (i, o) in olane.iter_mut().enumerate() {
                    let mut acc = 0f32;
                    for (j, &k) in kernel.iter().enumerate() {
                        let idx = (i as i64 + j as i64 - radius).clamp(0, n as i64 - 1) as usize;
                        acc += k * line[idx];
                    }
                    *o = acc;
                }
            }
        });
    out
}

/// 不低于 `lower` 的体素标记为前景.
pub fn binary_threshold(scan: &Grid3<f32>, lower: f32) -> Grid3<u8> {
    let mut out = Grid3::zeros(scan.region(), *scan.geom());
    Zip::from(out.data_mut())
        .and(scan.data())
        .par_for_each(|o, &v| {
            *o = u8::from(v >= lower);
        });
    out
}
