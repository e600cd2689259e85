//! 精确 Euclidean 距离场.
//!
//! 逐轴下包络变换 (Felzenszwalb & Huttenlocher), 支持各向异性体素分辨率.
//! 距离按体素中心到体素中心计算; 网格之外视为未知 (无穷远),
//! 对边界行为敏感的调用方应先做 zero-pad.

use ndarray::{Array3, Axis, Zip};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::data::Grid3;

/// 下包络变换使用的有限 "无穷大". 避免 `f32::INFINITY` 参与减法产生 NaN.
const INF: f32 = 1.0e20;

/// 带符号的平方距离场.
///
/// 前景 (非零) 体素取到最近背景体素中心的负平方距离, 背景体素取到最近
/// 前景体素中心的正平方距离. 某一类体素不存在时, 对侧距离为 [`INF`] 量级.
pub fn sdf_squared(mask: &Grid3<u8>) -> Grid3<f32> {
    let d_fg = edt_squared(mask, true);
    let d_bg = edt_squared(mask, false);

    let mut out = Grid3::from_parts(d_fg, mask.index_origin(), *mask.geom());
    Zip::from(out.data_mut())
        .and(mask.data())
        .and(&d_bg)
        .par_for_each(|o, &m, &din| {
            if m != 0 {
                *o = -din;
            }
        });
    out
}

/// 非平方的带符号距离场.
///
/// `inside_positive` 为真时前景为正, 背景为负; 为假时相反.
pub fn sdf(mask: &Grid3<u8>, inside_positive: bool) -> Grid3<f32> {
    let mut sq = sdf_squared(mask);
    let sign = if inside_positive { -1.0 } else { 1.0 };
    sq.data_mut().mapv_inplace(|v| {
        let mag = v.abs().sqrt();
        if v > 0.0 {
            sign * mag
        } else {
            -sign * mag
        }
    });
    sq
}

/// 到最近 "站点" 体素中心的平方距离. `sites_foreground`
/// 决定站点是前景 (非零) 还是背景.
fn edt_squared(mask: &Grid3<u8>, sites_foreground: bool) -> Array3<f32> {
    let (nz, nh, nw) = mask.shape();
    let mut f = Array3::<f32>::from_elem((nz, nh, nw), INF);
    Zip::from(&mut f).and(mask.data()).par_for_each(|o, &m| {
        if (m != 0) == sites_foreground {
            *o = 0.0;
        }
    });

    let sp = mask.geom().spacing();
    // 依次沿 w, h, z 做一维变换. 每一维并行处理正交切片.
    dt_pass(&mut f, 2, sp[2] as f32);
    dt_pass(&mut f, 1, sp[1] as f32);
    dt_pass(&mut f, 0, sp[0] as f32);
    f
}

/// 沿 `axis` 对每条体素线做一维下包络变换.
fn dt_pass(f: &mut Array3<f32>, axis: usize, spacing: f32) {
    // 并行维取一个与变换维正交的轴.
    let outer = usize::from(axis == 0);
    // 去掉 outer 后, 变换维在切片中的位置.
    let t = match (axis, outer) {
        (0, _) => 0,
        (1, 0) => 0,
        _ => 1,
    };

    f.axis_iter_mut(Axis(outer))
        .into_par_iter()
        .for_each(|mut plane| {
            let n = plane.len_of(Axis(t));
            let mut line = vec![0f32; n];
            let mut dist = vec![0f32; n];
            let mut v = vec![0usize; n];
            let mut z = vec![0f32; n + 1];
            for mut lane in plane.lanes_mut(Axis(t)) {
                for (dst, src) in line.iter_mut().zip(lane.iter()) {
                    *dst = *src;
                }
                dt_1d(&line, &mut dist, &mut v, &mut z, spacing);
                for (dst, src) in lane.iter_mut().zip(dist.iter()) {
                    *dst = *src;
                }
            }
        });
}

/// 一维平方距离下包络变换. `f` 为输入, `d` 为输出,
/// `v`/`z` 为调用方提供的暂存区, `s` 为采样间距.
fn dt_1d(f: &[f32], d: &mut [f32], v: &mut [usize], z: &mut [f32], s: f32) {
    let n = f.len();
    debug_assert!(n > 0);
    let mut k = 0usize;
    v[0] = 0;
    z[0] = -INF;
    z[1] = INF;
    for q in 1..n {
        let xq = q as f32 * s;
        let fq = f[q] + xq * xq;
        loop {
            let p = v[k];
            let xp = p as f32 * s;
            // 两条抛物线的交点横坐标.
            let sep = (fq - (f[p] + xp * xp)) / (2.0 * (xq - xp));
            if sep <= z[k] {
                // z[0] = -INF 保证 k > 0.
                k -= 1;
            } else {
                k += 1;
                v[k] = q;
                z[k] = sep;
                z[k + 1] = INF;
                break;
            }
        }
    }

    let mut k = 0usize;
    for q in 0..n {
        let xq = q as f32 * s;
        while z[k + 1] < xq {
            k += 1;
        }
        let xp = v[k] as f32 * s;
        d[q] = (xq - xp) * (xq - xp) + f[v[k]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Geometry, Region3};

    fn float_eq(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    fn point_mask(spacing: [f64; 3]) -> Grid3<u8> {
        let mut g = Grid3::zeros(Region3::from_shape((5, 5, 5)), Geometry::identity(spacing));
        g.data_mut()[(2, 2, 2)] = 1;
        g
    }

    #[test]
    fn single_point_distances_are_exact() {
        let d = sdf_squared(&point_mask([1.0; 3]));
        // 前景体素自身: 到最近背景的负平方距离 = -1.
        float_eq(d.data()[(2, 2, 2)], -1.0);
        // 面邻居 1, 棱邻居 2, 体对角 3, 两步 4.
        float_eq(d.data()[(2, 2, 3)], 1.0);
        float_eq(d.data()[(2, 3, 3)], 2.0);
        float_eq(d.data()[(3, 3, 3)], 3.0);
        float_eq(d.data()[(2, 2, 0)], 4.0);
    }

    #[test]
    fn anisotropic_spacing_scales_each_axis() {
        let d = sdf_squared(&point_mask([3.0, 1.0, 2.0]));
        float_eq(d.data()[(3, 2, 2)], 9.0);
        float_eq(d.data()[(2, 3, 2)], 1.0);
        float_eq(d.data()[(2, 2, 3)], 4.0);
        // 最近前景按物理距离选取: 混合偏移取各轴平方和.
        float_eq(d.data()[(3, 3, 3)], 9.0 + 1.0 + 4.0);
    }

    #[test]
    fn solid_block_interior_goes_negative() {
        let mut g = Grid3::zeros(Region3::from_shape((7, 7, 7)), Geometry::identity([1.0; 3]));
        for z in 1..6 {
            for h in 1..6 {
                for w in 1..6 {
                    g.data_mut()[(z, h, w)] = 1;
                }
            }
        }
        let d = sdf_squared(&g);
        // 中心体素到最近背景 (面方向 3 格) 的负平方距离.
        float_eq(d.data()[(3, 3, 3)], -9.0);
        // 边界前景体素距背景一格.
        float_eq(d.data()[(1, 3, 3)], -1.0);
        // 角落背景体素.
        float_eq(d.data()[(0, 0, 0)], 3.0);
    }

    #[test]
    fn non_squared_sign_convention() {
        let m = point_mask([1.0; 3]);
        let inside_pos = sdf(&m, true);
        float_eq(inside_pos.data()[(2, 2, 2)], 1.0);
        float_eq(inside_pos.data()[(2, 2, 4)], -2.0);

        let inside_neg = sdf(&m, false);
        float_eq(inside_neg.data()[(2, 2, 2)], -1.0);
        float_eq(inside_neg.data()[(2, 2, 4)], 2.0);
    }
}
