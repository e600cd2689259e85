//! 体数据插值与标签重采样.

use nalgebra::Vector3;
use ndarray::Zip;

use crate::data::Grid3;

use super::ParamTransform;

/// 物理点处的三线性插值. 点落在网格外时返回 `None`.
pub fn interp_linear(grid: &Grid3<f32>, p: &Vector3<f64>) -> Option<f64> {
    let (nz, nh, nw) = grid.shape();
    let ci = grid.continuous_index(p);
    let n = [nz, nh, nw];
    for d in 0..3 {
        if !(0.0..=(n[d] - 1) as f64).contains(&ci[d]) {
            return None;
        }
    }
    let mut i0 = [0usize; 3];
    let mut i1 = [0usize; 3];
    let mut frac = [0f64; 3];
    for d in 0..3 {
        let f = ci[d].floor();
        i0[d] = f as usize;
        i1[d] = (i0[d] + 1).min(n[d] - 1);
        frac[d] = ci[d] - f;
    }
    let data = grid.data();
    let mut acc = 0f64;
    for dz in 0..2 {
        for dh in 0..2 {
            for dw in 0..2 {
                let w = (if dz == 0 { 1.0 - frac[0] } else { frac[0] })
                    * (if dh == 0 { 1.0 - frac[1] } else { frac[1] })
                    * (if dw == 0 { 1.0 - frac[2] } else { frac[2] });
                let idx = (
                    if dz == 0 { i0[0] } else { i1[0] },
                    if dh == 0 { i0[1] } else { i1[1] },
                    if dw == 0 { i0[2] } else { i1[2] },
                );
                acc += w * data[idx] as f64;
            }
        }
    }
    Some(acc)
}

/// 将图谱标签按 `transform` (fixed -> moving) 重采样到 `reference` 网格.
///
/// 标签用最近邻插值, 落在图谱之外的体素置背景.
pub fn resample_labels(
    atlas: &Grid3<u8>,
    reference: &Grid3<f32>,
    transform: &dyn ParamTransform,
) -> Grid3<u8> {
    let (nz, nh, nw) = atlas.shape();
    let n = [nz, nh, nw];
    let mut out = Grid3::<u8>::zeros(reference.region(), *reference.geom());
    Zip::indexed(out.data_mut()).par_for_each(|(z, h, w), o| {
        let p = reference.point_at((z, h, w));
        let mp = transform.apply(&p);
        let ci = atlas.continuous_index(&mp);
        let mut idx = [0usize; 3];
        for d in 0..3 {
            let r = ci[d].round();
            if r < 0.0 || r > (n[d] - 1) as f64 {
                return;
            }
            idx[d] = r as usize;
        }
        *o = atlas.data()[(idx[0], idx[1], idx[2])];
    });
    out
}
