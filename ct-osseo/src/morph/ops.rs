//! 基于距离场的球形结构元形态学算子.

use std::collections::VecDeque;

use ndarray::Zip;

use crate::data::{Grid3, Region3};

/// 以半径 `radius` (毫米) 的球形结构元膨胀二值掩码.
///
/// 等价于保留到前景平方距离不超过 `radius²` 的体素.
/// 结构元可能越出网格, 需要保留膨胀结果的调用方应先 [`zero_pad`].
pub fn sdf_dilate(mask: &Grid3<u8>, radius: f64) -> Grid3<u8> {
    let dist = super::sdf_squared(mask);
    let r2 = (radius * radius) as f32;
    let mut out = Grid3::zeros(mask.region(), *mask.geom());
    Zip::from(out.data_mut())
        .and(dist.data())
        .par_for_each(|o, &d| {
            if d <= r2 {
                *o = 1;
            }
        });
    out
}

/// 以半径 `radius` (毫米) 的球形结构元腐蚀二值掩码.
///
/// 对补集做距离变换, 保留到背景平方距离不低于 `radius²` 的前景体素.
/// 网格之外按背景处理, 因此贴边的前景会被削掉.
pub fn sdf_erode(mask: &Grid3<u8>, radius: f64) -> Grid3<u8> {
    let dist = super::sdf_squared(&logical_not(mask));
    let r2 = (radius * radius) as f32;
    let mut out = Grid3::zeros(mask.region(), *mask.geom());
    Zip::from(out.data_mut())
        .and(dist.data())
        .par_for_each(|o, &d| {
            if d >= r2 {
                *o = 1;
            }
        });
    out
}

/// 二值取反.
pub fn logical_not(mask: &Grid3<u8>) -> Grid3<u8> {
    let mut out = Grid3::zeros(mask.region(), *mask.geom());
    Zip::from(out.data_mut())
        .and(mask.data())
        .par_for_each(|o, &m| {
            *o = u8::from(m == 0);
        });
    out
}

/// 每个方向补 `pad` 个零体素, 全局索引原点相应前移.
pub fn zero_pad(mask: &Grid3<u8>, pad: [usize; 3]) -> Grid3<u8> {
    let mut out = Grid3::zeros(mask.region().pad(pad), *mask.geom());
    out.slice_region_mut(&mask.region()).assign(&mask.data());
    out
}

/// 填充二值掩码内部的封闭孔洞.
///
/// 从网格边界的背景体素做 6-连通泛洪, 未被到达的背景体素划为前景.
pub fn fill_holes(mask: &mut Grid3<u8>) {
    let (nz, nh, nw) = mask.shape();
    if nz == 0 || nh == 0 || nw == 0 {
        return;
    }
    let mut reached = ndarray::Array3::<u8>::zeros((nz, nh, nw));
    let mut queue = VecDeque::new();
    {
        let data = mask.data();
        let mut push_if_bg = |idx: (usize, usize, usize),
                              reached: &mut ndarray::Array3<u8>,
                              queue: &mut VecDeque<(usize, usize, usize)>| {
            if data[idx] == 0 && reached[idx] == 0 {
                reached[idx] = 1;
                queue.push_back(idx);
            }
        };
        for z in 0..nz {
            for h in 0..nh {
                for w in 0..nw {
                    if z == 0 || z == nz - 1 || h == 0 || h == nh - 1 || w == 0 || w == nw - 1 {
                        push_if_bg((z, h, w), &mut reached, &mut queue);
                    }
                }
            }
        }
        while let Some((z, h, w)) = queue.pop_front() {
            let mut visit = |idx: (usize, usize, usize)| {
                if data[idx] == 0 && reached[idx] == 0 {
                    reached[idx] = 1;
                    queue.push_back(idx);
                }
            };
            if z > 0 {
                visit((z - 1, h, w));
            }
            if z + 1 < nz {
                visit((z + 1, h, w));
            }
            if h > 0 {
                visit((z, h - 1, w));
            }
            if h + 1 < nh {
                visit((z, h + 1, w));
            }
            if w > 0 {
                visit((z, h, w - 1));
            }
            if w + 1 < nw {
                visit((z, h, w + 1));
            }
        }
    }
    Zip::from(mask.data_mut())
        .and(&reached)
        .par_for_each(|m, &r| {
            if *m == 0 && r == 0 {
                *m = 1;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Geometry;

    fn cube(shape: (usize, usize, usize), lo: usize, hi: usize) -> Grid3<u8> {
        let mut g = Grid3::zeros(Region3::from_shape(shape), Geometry::identity([1.0; 3]));
        for z in lo..hi {
            for h in lo..hi {
                for w in lo..hi {
                    g.data_mut()[(z, h, w)] = 1;
                }
            }
        }
        g
    }

    fn count(g: &Grid3<u8>) -> usize {
        g.data().iter().filter(|v| **v != 0).count()
    }

    #[test]
    fn dilate_radius_one_adds_face_neighbors() {
        let mut g = Grid3::zeros(Region3::from_shape((5, 5, 5)), Geometry::identity([1.0; 3]));
        g.data_mut()[(2, 2, 2)] = 1;
        let d = sdf_dilate(&g, 1.0);
        // 单点 + 六个面邻居.
        assert_eq!(count(&d), 7);
        assert_eq!(d.data()[(2, 2, 3)], 1);
        assert_eq!(d.data()[(3, 3, 3)], 0);
    }

    #[test]
    fn erode_shrinks_cube_by_radius() {
        let g = cube((9, 9, 9), 1, 8);
        let e = sdf_erode(&g, 2.0);
        // 7^3 的立方体腐蚀半径 2 后每面各缩 2 格, 剩 3^3.
        assert_eq!(count(&e), 27);
        assert_eq!(e.data()[(4, 4, 4)], 1);
        assert_eq!(e.data()[(2, 4, 4)], 0);
    }

    #[test]
    fn erode_then_dilate_stays_within_original() {
        let g = cube((11, 11, 11), 2, 9);
        let opened = sdf_dilate(&sdf_erode(&g, 2.0), 2.0);
        Zip::from(opened.data()).and(g.data()).for_each(|&o, &m| {
            assert!(o <= m);
        });
        assert!(count(&opened) > 0);
    }

    #[test]
    fn dilate_then_erode_contains_original() {
        let g = cube((11, 11, 11), 3, 8);
        let closed = sdf_erode(&sdf_dilate(&g, 2.0), 2.0);
        Zip::from(closed.data()).and(g.data()).for_each(|&c, &m| {
            assert!(c >= m);
        });
        assert!(count(&closed) >= count(&g));
    }

    #[test]
    fn zero_pad_shifts_index_origin() {
        let g = cube((3, 3, 3), 0, 3);
        let p = zero_pad(&g, [2, 1, 0]);
        assert_eq!(p.index_origin(), [-2, -1, 0]);
        assert_eq!(p.shape(), (7, 5, 3));
        assert_eq!(count(&p), 27);
        assert_eq!(p.get([0, 0, 0]), Some(&1));
        assert_eq!(p.get([-2, 0, 0]), Some(&0));
    }

    #[test]
    fn fill_holes_closes_internal_cavity_only() {
        let mut g = cube((9, 9, 9), 1, 8);
        // 内腔 3^3.
        for z in 3..6 {
            for h in 3..6 {
                for w in 3..6 {
                    g.data_mut()[(z, h, w)] = 0;
                }
            }
        }
        let hollow = count(&g);
        fill_holes(&mut g);
        assert_eq!(count(&g), hollow + 27);
        // 外部背景保持不变.
        assert_eq!(g.data()[(0, 0, 0)], 0);
        assert_eq!(g.data()[(4, 4, 4)], 1);
    }
}
