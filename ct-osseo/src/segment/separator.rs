//! 逐骨形态学分离.
//!
//! 先用高阈值连通域把各骨骼分开, 再对每块骨骼在其扩展包围盒内
//! 做盆域划分与形态学重建, 最终输出皮质骨/松质骨/骨髓三类标签.

use itertools::izip;
use log::info;
use ndarray::{Axis, Zip};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

use crate::consts::{label, segment as cfg};
use crate::data::{Grid3, Region3};
use crate::error::SegmentError;
use crate::morph::{fill_holes, label_components, sdf_dilate, sdf_erode, sdf_squared, zero_pad};
use crate::progress::{ProgressSink, StageTimer};

/// 分离参数.
#[derive(Debug, Clone, Copy)]
pub struct SeparatorConfig {
    /// 皮质骨厚度 (毫米). 决定各形态学半径与片状度尺度.
    pub cortical_thickness: f64,
    /// 为真时每块骨骼只输出一个整骨标签 `b`,
    /// 为假时拆分为 `3b-2` (皮质骨), `3b-1` (松质骨), `3b` (骨髓).
    pub whole_bones: bool,
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            cortical_thickness: 0.1,
            whole_bones: false,
        }
    }
}

/// 分离结果.
#[derive(Debug)]
pub struct SeparatedBones {
    /// 标签图, 与输入同区域.
    pub labels: Grid3<u8>,
    /// 检测到的骨骼数.
    pub bone_count: usize,
    /// `replaced_by[b] > 0` 表示骨骼 `b` 是 `replaced_by[b]` 内部的孤岛,
    /// 已并入后者.
    pub replaced_by: Vec<u8>,
}

/// 对 (已去噪的) 显微 CT 体数据做逐骨分割.
///
/// 骨骼数超过 [`label::MAX_BONES`] 或高阈值下不存在骨骼时返回错误.
pub fn separate_bones(
    scan: &Grid3<f32>,
    config: &SeparatorConfig,
    timer: &StageTimer,
    sink: &dyn ProgressSink,
) -> Result<SeparatedBones, SegmentError> {
    let whole = scan.region();
    if whole.is_empty() {
        return Err(SegmentError::EmptyInput);
    }

    let ct = config.cortical_thickness;
    let sp = scan.geom().spacing();
    let max_radius = cfg::MAX_RADIUS_FACTOR * ct;
    let mut op_size = [0usize; 3];
    for d in 0..3 {
        // 形态学半径换算成各方向体素数的安全余量.
        op_size[d] = (max_radius / sp[d]).ceil() as usize;
    }
    let eps_dist = (cfg::EPS_FACTOR * scan.geom().geometric_mean_spacing()) as f32;
    let padded_whole = whole.pad(op_size);

    let gauss_label = super::binary_threshold(
        &super::gaussian_smooth(scan, ct),
        cfg::GAUSS_THRESHOLD,
    );
    let desco_label = super::binary_threshold(
        &super::descoteaux_sheetness(scan, ct),
        cfg::SHEETNESS_THRESHOLD,
    );
    sink.report(0.51);
    let th_label = super::binary_threshold(scan, cfg::STRICT_BONE_THRESHOLD);

    // 皮质骨掩码: (片状度 ∨ 平滑高亮) ∧ 高阈值. 分配在外扩区域上,
    // 便于后续与形态学结果在同一坐标系下取值.
    let mut cortex = Grid3::<u8>::zeros(padded_whole, *scan.geom());
    Zip::from(cortex.slice_region_mut(&whole))
        .and(gauss_label.data())
        .and(desco_label.data())
        .and(th_label.data())
        .par_for_each(|c, &g, &d, &t| {
            if (d != 0 || g != 0) && t != 0 {
                *c = 1;
            }
        });
    drop(gauss_label);
    drop(desco_label);
    sink.report(0.52);
    timer.stage("皮质骨掩码");

    let cc = label_components(&th_label, cfg::MIN_COMPONENT_SIZE);
    let num_bones = cc.len();
    if num_bones == 0 {
        return Err(SegmentError::EmptyInput);
    }
    // 每块骨骼占三个标签.
    if num_bones > label::MAX_BONES {
        return Err(SegmentError::TooManyBones(num_bones));
    }
    info!("高阈值下共检测到 {num_bones} 块骨骼");
    sink.report(0.55);

    let mut bones = Grid3::<u16>::zeros(padded_whole, *scan.geom());
    bones
        .slice_region_mut(&whole)
        .assign(&cc.labels.data());
    sink.report(0.56);

    let mut bone_mask = Grid3::<u8>::zeros(padded_whole, *scan.geom());
    Zip::from(bone_mask.data_mut())
        .and(bones.data())
        .par_for_each(|m, &b| {
            *m = u8::from(b != 0);
        });
    // 所有骨骼的全局距离场, 盆域划分的参照.
    let bone_dist = sdf_squared(&bone_mask);
    drop(bone_mask);
    sink.report(0.69);
    timer.stage("全局距离场");

    // 逐骨紧包围盒, 按 z 切片并行归并.
    let (min_idx, max_idx) = {
        let view = cc.labels.data();
        let o = whole.origin;
        let empty = || {
            (
                vec![[i64::MAX; 3]; num_bones + 1],
                vec![[i64::MIN; 3]; num_bones + 1],
            )
        };
        view.axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .fold(empty, |(mut mn, mut mx), (z, plane)| {
                for ((h, w), &v) in plane.indexed_iter() {
                    if v != 0 {
                        let v = v as usize;
                        let gi = [o[0] + z as i64, o[1] + h as i64, o[2] + w as i64];
                        for d in 0..3 {
                            mn[v][d] = mn[v][d].min(gi[d]);
                            mx[v][d] = mx[v][d].max(gi[d]);
                        }
                    }
                }
                (mn, mx)
            })
            .reduce(empty, |(mut amn, mut amx), (bmn, bmx)| {
                for b in 1..=num_bones {
                    for d in 0..3 {
                        amn[b][d] = amn[b][d].min(bmn[b][d]);
                        amx[b][d] = amx[b][d].max(bmx[b][d]);
                    }
                }
                (amn, amx)
            })
    };
    drop(cc);
    sink.report(0.7);

    let mut labels = Grid3::<u8>::zeros(whole, *scan.geom());
    let mut replaced_by = vec![0u8; num_bones + 1];

    for bone in 1..=num_bones {
        let bone_progress = 0.3 / num_bones as f64;
        let begin = 0.7 + bone_progress * (bone - 1) as f64;
        sink.report(begin);

        if replaced_by[bone] > 0 {
            info!("骨骼 {bone} 是骨骼 {} 内部的孤岛", replaced_by[bone]);
            continue;
        }

        let tight = Region3::from_corners(min_idx[bone], max_idx[bone]);
        let expanded = tight.pad(op_size);
        // tight 含于 whole, 交集必非空.
        let safe = expanded.intersect(&whole).expect("包围盒与输入不相交");

        let mut this_bone = Grid3::<u8>::zeros(expanded, *scan.geom());
        Zip::from(this_bone.slice_region_mut(&tight))
            .and(bones.slice_region(&tight))
            .par_for_each(|o, &b| {
                if b as usize == bone {
                    *o = 1;
                }
            });
        let this_dist = sdf_squared(&this_bone);
        drop(this_bone);
        sink.report(begin + bone_progress * 0.05);

        // 盆域: 到本骨的距离与到最近骨的距离一致的体素.
        let mut basin = Grid3::<u8>::zeros(safe, *scan.geom());
        Zip::from(basin.slice_region_mut(&tight))
            .and(this_dist.slice_region(&tight))
            .and(bone_dist.slice_region(&tight))
            .par_for_each(|o, &t, &g| {
                if (t - g).abs() < eps_dist {
                    *o = 1;
                }
            });
        drop(this_dist);
        sink.report(begin + bone_progress * 0.10);

        fill_holes(&mut basin);
        sink.report(begin + bone_progress * 0.20);

        // 盆域之外一律压成背景, 避免区域生长越过盆域边界.
        let mut partial = Grid3::<f32>::from_elem(safe, *scan.geom(), cfg::BACKGROUND_SENTINEL);
        Zip::from(partial.slice_region_mut(&tight))
            .and(basin.slice_region(&tight))
            .and(scan.slice_region(&tight))
            .par_for_each(|o, &b, &v| {
                if b != 0 {
                    *o = v;
                }
            });
        sink.report(begin + bone_progress * 0.25);

        // 种子与孤岛检测一趟完成: 本骨体素作种子; 盆域内的其它骨骼
        // 是本骨内部的孤岛, 标记后跳过其独立处理.
        let mut seeds: Vec<[i64; 3]> = Vec::new();
        for (((z, h, w), &b), &in_basin) in izip!(
            bones.slice_region(&tight).indexed_iter(),
            basin.slice_region(&tight).iter()
        ) {
            if b == 0 {
                continue;
            }
            if b as usize == bone {
                seeds.push([
                    tight.origin[0] + z as i64,
                    tight.origin[1] + h as i64,
                    tight.origin[2] + w as i64,
                ]);
            } else if in_basin != 0 {
                replaced_by[b as usize] = bone as u8;
            }
        }

        // 低阈值生长, 把松质骨也纳入.
        let th_bone = super::connected_threshold(&partial, &seeds, cfg::REGION_GROW_THRESHOLD);
        drop(partial);
        sink.report(begin + bone_progress * 0.35);

        let mut th_bone = zero_pad(&th_bone, op_size);
        sink.report(begin + bone_progress * 0.40);
        let dilated = sdf_dilate(&th_bone, cfg::TRABECULAR_DILATE * ct);
        sink.report(begin + bone_progress * 0.50);
        let eroded = sdf_erode(&dilated, cfg::TRABECULAR_ERODE * ct);
        sink.report(begin + bone_progress * 0.60);
        let dilated = sdf_dilate(&eroded, cfg::TRABECULAR_REDILATE * ct);
        sink.report(begin + bone_progress * 0.70);

        // 闭运算的中间结果并回种子掩码, 作为骨髓重建的起点.
        Zip::from(th_bone.slice_region_mut(&tight))
            .and(eroded.slice_region(&tight))
            .par_for_each(|o, &e| {
                *o |= e;
            });
        drop(eroded);
        sink.report(begin + bone_progress * 0.75);
        let dilated_marrow = sdf_dilate(&th_bone, cfg::MARROW_DILATE * ct);
        drop(th_bone);
        sink.report(begin + bone_progress * 0.85);
        let eroded_marrow = sdf_erode(&dilated_marrow, cfg::MARROW_ERODE * ct);
        drop(dilated_marrow);
        sink.report(begin + bone_progress * 0.95);

        // 合成, 全部裁剪到盆域内.
        let whole_bones = config.whole_bones;
        Zip::from(labels.slice_region_mut(&safe))
            .and(basin.data())
            .and(cortex.slice_region(&safe))
            .and(dilated.slice_region(&safe))
            .and(eroded_marrow.slice_region(&safe))
            .par_for_each(|o, &in_basin, &c, &d, &m| {
                if in_basin == 0 {
                    return;
                }
                if whole_bones {
                    if c != 0 || d != 0 || m != 0 {
                        *o = bone as u8;
                    }
                } else if c != 0 {
                    *o = label::cortical(bone as u8);
                } else if d != 0 {
                    *o = label::trabecular(bone as u8);
                } else if m != 0 {
                    *o = label::marrow(bone as u8);
                }
            });
    }
    sink.report(1.0);
    timer.stage("逐骨合成");

    Ok(SeparatedBones {
        labels,
        bone_count: num_bones,
        replaced_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Geometry;
    use crate::progress::NullProgress;

    /// 双骨假体: 各向同性 1mm, 两个 22^3 的立方骨,
    /// 外 2 层高亮皮质, 再 2 层中等亮度松质, 中心 14^3 为暗腔.
    fn two_bone_phantom() -> Grid3<f32> {
        let r = Region3::from_shape((50, 50, 50));
        Grid3::from_shape_fn(r, Geometry::identity([1.0; 3]), |(z, h, w)| {
            for (z0, h0, w0) in [(2usize, 14usize, 14usize), (26, 14, 14)] {
                let inside = z >= z0
                    && z < z0 + 22
                    && h >= h0
                    && h < h0 + 22
                    && w >= w0
                    && w < w0 + 22;
                if inside {
                    let depth = [z - z0, z0 + 21 - z, h - h0, h0 + 21 - h, w - w0, w0 + 21 - w]
                        .into_iter()
                        .min()
                        .unwrap();
                    return if depth <= 1 {
                        10_000.0
                    } else if depth <= 3 {
                        2_500.0
                    } else {
                        -500.0
                    };
                }
            }
            0.0
        })
    }

    fn run(scan: &Grid3<f32>, config: &SeparatorConfig) -> SeparatedBones {
        separate_bones(scan, config, &StageTimer::new(), &NullProgress).unwrap()
    }

    fn count_label(out: &SeparatedBones, l: u8) -> usize {
        out.labels.data().iter().filter(|v| **v == l).count()
    }

    #[test]
    fn two_bones_get_three_labels_each() {
        let scan = two_bone_phantom();
        let out = run(
            &scan,
            &SeparatorConfig {
                cortical_thickness: 2.0,
                whole_bones: false,
            },
        );
        assert_eq!(out.bone_count, 2);
        assert!(out.replaced_by.iter().all(|r| *r == 0));
        // 每块骨骼的皮质/松质/骨髓标签都非空.
        for l in 1..=6u8 {
            assert!(count_label(&out, l) > 0, "标签 {l} 为空");
        }
        assert!(out.labels.data().iter().all(|v| *v <= 6));
        // 两骨之间的空隙保持背景.
        assert!(label::is_background(out.labels.data()[(0, 0, 0)]));

        // 骨骼 1 的标签不越过其包围盒 (z ∈ [2, 23]).
        for ((z, _, _), &v) in out.labels.data().indexed_iter() {
            if label::bone_of(v) == 1 {
                assert!((2..=23).contains(&z), "标签 {v} 出现在 z = {z}");
            }
        }
    }

    #[test]
    fn whole_bones_mode_uses_one_label_per_bone() {
        let scan = two_bone_phantom();
        let out = run(
            &scan,
            &SeparatorConfig {
                cortical_thickness: 2.0,
                whole_bones: true,
            },
        );
        assert_eq!(out.bone_count, 2);
        assert!(count_label(&out, 1) > 0);
        assert!(count_label(&out, 2) > 0);
        assert!(out.labels.data().iter().all(|v| *v <= 2));
    }

    #[test]
    fn island_component_is_absorbed_by_enclosing_bone() {
        let mut scan = two_bone_phantom();
        // 骨骼 1 暗腔中央放一个 10^3 的高亮孤岛 (体素数恰好达到保留下限).
        for z in 8..18 {
            for h in 20..30 {
                for w in 20..30 {
                    scan.data_mut()[(z, h, w)] = 10_000.0;
                }
            }
        }
        let out = run(
            &scan,
            &SeparatorConfig {
                cortical_thickness: 2.0,
                whole_bones: false,
            },
        );
        assert_eq!(out.bone_count, 2);
        // 孤岛被并入包裹它的骨骼, 不产生第二组标签.
        assert_eq!(out.replaced_by[2], 1);
        for l in 4..=6u8 {
            assert_eq!(count_label(&out, l), 0, "孤岛不应有独立标签 {l}");
        }
        // 孤岛体素归属骨骼 1.
        let center = out.labels.data()[(13, 25, 25)];
        assert_eq!(label::bone_of(center), 1);
    }

    #[test]
    fn too_many_bones_is_rejected() {
        // 5x5x4 = 100 个 10^3 的立方骨, 超出标签容量.
        let r = Region3::from_shape((60, 74, 74));
        let scan = Grid3::from_shape_fn(r, Geometry::identity([1.0; 3]), |(z, h, w)| {
            if z % 14 < 10 && h % 14 < 10 && w % 14 < 10 && z < 56 && h < 70 && w < 70 {
                6_000.0
            } else {
                0.0
            }
        });
        let config = SeparatorConfig {
            cortical_thickness: 0.5,
            whole_bones: false,
        };
        let err = separate_bones(&scan, &config, &StageTimer::new(), &NullProgress).unwrap_err();
        assert!(matches!(err, SegmentError::TooManyBones(100)));
    }

    #[test]
    fn empty_scan_is_rejected() {
        let scan = Grid3::<f32>::zeros(
            Region3::from_shape((8, 8, 8)),
            Geometry::identity([1.0; 3]),
        );
        let config = SeparatorConfig::default();
        let err = separate_bones(&scan, &config, &StageTimer::new(), &NullProgress).unwrap_err();
        assert!(matches!(err, SegmentError::EmptyInput));
    }
}
