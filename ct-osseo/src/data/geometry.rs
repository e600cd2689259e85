//! 体数据的物理几何信息: 体素分辨率, 物理原点与方向矩阵.

use nalgebra::{Matrix3, Vector3};
use nifti::NiftiHeader;

/// 索引空间到物理空间的映射.
///
/// 索引以 `(z, h, w)` 顺序给出 (与数据存储一致), 物理点以 LPS 约定的
/// `(x, y, z)` 毫米坐标表示. 物理原点对应全局索引 `(0, 0, 0)`,
/// 因此 zero-pad 产生的负索引原点不影响物理映射.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// 体素分辨率, 按 (z, h, w) 排列, 以毫米为单位.
    spacing: [f64; 3],
    /// 全局索引 (0, 0, 0) 的物理坐标.
    origin: Vector3<f64>,
    direction: Matrix3<f64>,
    inv_direction: Matrix3<f64>,
}

impl Geometry {
    /// 由分辨率, 物理原点和方向矩阵构造.
    ///
    /// 若分辨率含非正分量或方向矩阵不可逆, 则程序 panic.
    pub fn new(spacing: [f64; 3], origin: [f64; 3], direction: Matrix3<f64>) -> Self {
        assert!(spacing.iter().all(|s| *s > 0.0), "体素分辨率必须为正");
        let inv_direction = direction.try_inverse().expect("方向矩阵不可逆");
        Self {
            spacing,
            origin: Vector3::new(origin[0], origin[1], origin[2]),
            direction,
            inv_direction,
        }
    }

    /// 以单位方向矩阵和零原点构造.
    #[inline]
    pub fn identity(spacing: [f64; 3]) -> Self {
        Self::new(spacing, [0.0; 3], Matrix3::identity())
    }

    /// 从 nii 文件 header 解析几何信息.
    ///
    /// 优先使用 sform 仿射, 其次 qform 四元数, 都缺失时退化为单位方向.
    /// nii 的物理坐标为 RAS, 这里统一转换为 LPS (翻转 x, y).
    pub fn from_header(h: &NiftiHeader) -> Self {
        let [_, pw, ph, pz, ..] = h.pixdim;
        let spacing = [pz as f64, ph as f64, pw as f64];

        let (mut dir, mut origin) = if h.sform_code > 0 {
            let rows = [h.srow_x, h.srow_y, h.srow_z];
            let mut dir = Matrix3::zeros();
            for (i, row) in rows.iter().enumerate() {
                for j in 0..3 {
                    // 第 j 列对应第 j 个索引轴 (w, h, z), 除掉分辨率得到单位方向.
                    dir[(i, j)] = row[j] as f64 / spacing[2 - j];
                }
            }
            let origin = Vector3::new(rows[0][3] as f64, rows[1][3] as f64, rows[2][3] as f64);
            (dir, origin)
        } else if h.qform_code > 0 {
            let (b, c, d) = (
                h.quatern_b as f64,
                h.quatern_c as f64,
                h.quatern_d as f64,
            );
            let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();
            let mut dir = Matrix3::new(
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - b * b - c * c,
            );
            // qfac 决定 z 轴朝向.
            if h.pixdim[0] < 0.0 {
                for i in 0..3 {
                    dir[(i, 2)] = -dir[(i, 2)];
                }
            }
            let origin = Vector3::new(
                h.quatern_x as f64,
                h.quatern_y as f64,
                h.quatern_z as f64,
            );
            (dir, origin)
        } else {
            (Matrix3::identity(), Vector3::zeros())
        };

        // RAS -> LPS.
        for j in 0..3 {
            dir[(0, j)] = -dir[(0, j)];
            dir[(1, j)] = -dir[(1, j)];
        }
        origin.x = -origin.x;
        origin.y = -origin.y;

        Self::new(spacing, [origin.x, origin.y, origin.z], dir)
    }

    /// 获取体素分辨率, 按 (z, h, w) 排列, 以毫米为单位.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 获取全局索引 (0, 0, 0) 的物理坐标.
    #[inline]
    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    /// 获取方向矩阵.
    #[inline]
    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    /// 三个方向分辨率的几何平均值. 几何平均保持体素体积不变.
    #[inline]
    pub fn geometric_mean_spacing(&self) -> f64 {
        (self.spacing[0] * self.spacing[1] * self.spacing[2]).cbrt()
    }

    /// 将 (z, h, w) 连续全局索引映射到物理点.
    #[inline]
    pub fn index_to_point(&self, idx: [f64; 3]) -> Vector3<f64> {
        let v = Vector3::new(
            idx[2] * self.spacing[2],
            idx[1] * self.spacing[1],
            idx[0] * self.spacing[0],
        );
        self.direction * v + self.origin
    }

    /// 将物理点映射回 (z, h, w) 连续全局索引.
    #[inline]
    pub fn point_to_index(&self, p: &Vector3<f64>) -> [f64; 3] {
        let v = self.inv_direction * (p - self.origin);
        [
            v.z / self.spacing[0],
            v.y / self.spacing[1],
            v.x / self.spacing[2],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_eq(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn index_point_round_trip_anisotropic() {
        let g = Geometry::new(
            [2.5, 0.75, 0.75],
            [10.0, -4.0, 7.5],
            Matrix3::identity(),
        );
        let idx = [3.0, 11.0, 5.0];
        let p = g.index_to_point(idx);
        float_eq(p.x, 10.0 + 5.0 * 0.75);
        float_eq(p.y, -4.0 + 11.0 * 0.75);
        float_eq(p.z, 7.5 + 3.0 * 2.5);

        let back = g.point_to_index(&p);
        for d in 0..3 {
            float_eq(back[d], idx[d]);
        }
    }

    #[test]
    fn geometric_mean_preserves_voxel_volume() {
        let g = Geometry::identity([2.0, 1.0, 0.5]);
        let m = g.geometric_mean_spacing();
        float_eq(m * m * m, 2.0 * 1.0 * 0.5);
    }

    #[test]
    fn default_header_maps_to_lps_identity() {
        let mut h = NiftiHeader::default();
        h.pixdim = [1.0; 8];
        let g = Geometry::from_header(&h);
        assert_eq!(g.spacing(), [1.0; 3]);
        // 无 sform/qform 时方向退化为单位阵, 再做 RAS -> LPS 翻转.
        let p = g.index_to_point([0.0, 2.0, 3.0]);
        float_eq(p.x, -3.0);
        float_eq(p.y, -2.0);
        float_eq(p.z, 0.0);
    }
}
