//! 三次 B-spline 自由形变 (FFD).

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::consts::register as cfg;
use crate::data::Grid3;

use super::{Affine3, ParamTransform};

/// 定义在长方体物理域上的三次 B-spline 位移场.
///
/// 控制点系数按维分组存放: 先全部 x 位移, 再 y, 再 z;
/// 每组内按 `(iz * ncy + iy) * ncx + ix` 展平. 域外位移为零.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BsplineFfd {
    origin: Vector3<f64>,
    /// 域各物理轴 (x, y, z) 的长度 (毫米).
    physical_dim: [f64; 3],
    inv_direction: Matrix3<f64>,
    /// 各物理轴的网格单元数.
    mesh_size: [usize; 3],
    /// 各物理轴的控制点数 = 单元数 + 阶数.
    ncp: [usize; 3],
    coefficients: Vec<f64>,
}

impl BsplineFfd {
    /// 以 `reference` 的物理范围为变换域, 每维 `nodes_per_dim` 个控制点,
    /// 系数零初始化 (单位变换).
    pub fn for_domain(reference: &Grid3<f32>, nodes_per_dim: usize) -> Self {
        assert!(nodes_per_dim > cfg::SPLINE_ORDER, "控制点数必须大于阶数");
        let (nz, nh, nw) = reference.shape();
        let sp = reference.geom().spacing();
        let mesh = nodes_per_dim - cfg::SPLINE_ORDER;
        let ncp = [nodes_per_dim; 3];
        let n = ncp[0] * ncp[1] * ncp[2];
        Self {
            origin: reference.point_at((0, 0, 0)),
            physical_dim: [
                sp[2] * (nw - 1) as f64,
                sp[1] * (nh - 1) as f64,
                sp[0] * (nz - 1) as f64,
            ],
            inv_direction: reference
                .geom()
                .direction()
                .try_inverse()
                .expect("方向矩阵不可逆"),
            mesh_size: [mesh; 3],
            ncp,
            coefficients: vec![0.0; 3 * n],
        }
    }

    /// 每个位移分量的控制点总数.
    #[inline]
    fn nodes(&self) -> usize {
        self.ncp[0] * self.ncp[1] * self.ncp[2]
    }

    /// 三次 B-spline 的四个基函数权重, `t` 为单元内参数.
    fn cubic_weights(t: f64) -> [f64; 4] {
        let t2 = t * t;
        let t3 = t2 * t;
        [
            (1.0 - t).powi(3) / 6.0,
            (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
            (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
            t3 / 6.0,
        ]
    }

    /// 物理点的支撑: 各轴起始控制点下标与对应权重. 域外返回 `None`.
    fn support(&self, p: &Vector3<f64>) -> Option<([usize; 3], [[f64; 4]; 3])> {
        let local = self.inv_direction * (p - self.origin);
        let mut start = [0usize; 3];
        let mut weights = [[0f64; 4]; 3];
        for d in 0..3 {
            let u = local[d] / self.physical_dim[d] * self.mesh_size[d] as f64;
            if !(0.0..=self.mesh_size[d] as f64).contains(&u) {
                return None;
            }
            // 域上边界归入最后一个单元.
            let cell = (u.floor() as usize).min(self.mesh_size[d] - 1);
            start[d] = cell;
            weights[d] = Self::cubic_weights(u - cell as f64);
        }
        Some((start, weights))
    }

    /// 物理点处的位移向量. 域外为零.
    pub fn displacement(&self, p: &Vector3<f64>) -> Vector3<f64> {
        let Some((start, w)) = self.support(p) else {
            return Vector3::zeros();
        };
        let n = self.nodes();
        let [ncx, ncy, _] = self.ncp;
        let mut disp = Vector3::zeros();
        for (k, wz) in w[2].iter().enumerate() {
            for (j, wy) in w[1].iter().enumerate() {
                for (i, wx) in w[0].iter().enumerate() {
                    let flat = ((start[2] + k) * ncy + start[1] + j) * ncx + start[0] + i;
                    let weight = wx * wy * wz;
                    for d in 0..3 {
                        disp[d] += weight * self.coefficients[d * n + flat];
                    }
                }
            }
        }
        disp
    }
}

impl ParamTransform for BsplineFfd {
    fn num_params(&self) -> usize {
        self.coefficients.len()
    }

    fn params(&self) -> Vec<f64> {
        self.coefficients.clone()
    }

    fn set_params(&mut self, p: &[f64]) {
        debug_assert_eq!(p.len(), self.coefficients.len());
        self.coefficients.copy_from_slice(p);
    }

    fn apply(&self, p: &Vector3<f64>) -> Vector3<f64> {
        p + self.displacement(p)
    }

    fn param_jacobian(&self, p: &Vector3<f64>) -> Vec<(usize, Vector3<f64>)> {
        let Some((start, w)) = self.support(p) else {
            return Vec::new();
        };
        let n = self.nodes();
        let [ncx, ncy, _] = self.ncp;
        let mut out = Vec::with_capacity(3 * 64);
        for (k, wz) in w[2].iter().enumerate() {
            for (j, wy) in w[1].iter().enumerate() {
                for (i, wx) in w[0].iter().enumerate() {
                    let flat = ((start[2] + k) * ncy + start[1] + j) * ncx + start[0] + i;
                    let weight = wx * wy * wz;
                    for d in 0..3 {
                        let mut e = Vector3::zeros();
                        e[d] = weight;
                        out.push((d * n + flat, e));
                    }
                }
            }
        }
        out
    }
}

/// 先做 FFD 再做 (冻结的) 仿射的复合变换. 只有 FFD 系数参与优化.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeTransform {
    /// 粗配准得到的仿射部分, 优化期间保持不变.
    pub affine: Affine3,
    /// 可变形部分.
    pub ffd: BsplineFfd,
}

impl ParamTransform for CompositeTransform {
    fn num_params(&self) -> usize {
        self.ffd.num_params()
    }

    fn params(&self) -> Vec<f64> {
        self.ffd.params()
    }

    fn set_params(&mut self, p: &[f64]) {
        self.ffd.set_params(p);
    }

    fn apply(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.affine.apply(&self.ffd.apply(p))
    }

    fn param_jacobian(&self, p: &Vector3<f64>) -> Vec<(usize, Vector3<f64>)> {
        self.ffd
            .param_jacobian(p)
            .into_iter()
            .map(|(idx, dv)| (idx, self.affine.matrix * dv))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Geometry, Region3};
    use crate::register::Rigid3;

    fn reference() -> Grid3<f32> {
        Grid3::zeros(
            Region3::from_shape((11, 11, 11)),
            Geometry::identity([1.0; 3]),
        )
    }

    #[test]
    fn zero_coefficients_is_identity() {
        let ffd = BsplineFfd::for_domain(&reference(), 5);
        assert_eq!(ffd.num_params(), 375);
        for p in [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(5.0, 5.0, 5.0),
            Vector3::new(10.0, 10.0, 10.0),
            Vector3::new(3.3, 7.1, 0.4),
        ] {
            assert!((ffd.apply(&p) - p).norm() < 1e-12);
        }
    }

    #[test]
    fn support_is_local_and_zero_outside_domain() {
        let mut ffd = BsplineFfd::for_domain(&reference(), 5);
        // 抬高最后一个控制点的 x 位移.
        let n = ffd.nodes();
        let flat_last = n - 1;
        let mut p = ffd.params();
        p[flat_last] = 3.0;
        ffd.set_params(&p);

        // 域角附近 (参数都落在第一个单元) 不含最后一个控制点.
        assert!(ffd.displacement(&Vector3::new(1.0, 1.0, 1.0)).norm() < 1e-12);
        // 域的远角受其影响.
        let far = ffd.displacement(&Vector3::new(10.0, 10.0, 10.0));
        assert!(far.x > 0.0);
        assert_eq!(far.y, 0.0);
        // 域外恒为单位变换.
        let outside = Vector3::new(12.0, 5.0, 5.0);
        assert_eq!(ffd.apply(&outside), outside);
        assert!(ffd.param_jacobian(&outside).is_empty());
    }

    #[test]
    fn weights_sum_to_one() {
        for t in [0.0, 0.25, 0.5, 0.99, 1.0] {
            let w = BsplineFfd::cubic_weights(t);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let mut ffd = BsplineFfd::for_domain(&reference(), 5);
        let p = Vector3::new(4.2, 6.8, 2.5);
        let base = ffd.params();
        for (idx, dv) in ffd.param_jacobian(&p) {
            let mut pf = base.clone();
            let mut pb = base.clone();
            pf[idx] += 1e-5;
            pb[idx] -= 1e-5;
            ffd.set_params(&pf);
            let f = ffd.apply(&p);
            ffd.set_params(&pb);
            let b = ffd.apply(&p);
            let num = (f - b) / 2e-5;
            assert!((dv - num).norm() < 1e-8, "参数 {idx}");
        }
        ffd.set_params(&base);
    }

    #[test]
    fn composite_applies_ffd_before_affine() {
        let mut rigid = Rigid3::identity(Vector3::zeros());
        rigid.translation = Vector3::new(1.0, 0.0, 0.0);
        let affine = Affine3::from_rigid(&rigid);
        let mut composite = CompositeTransform {
            affine,
            ffd: BsplineFfd::for_domain(&reference(), 5),
        };
        // 零系数时只剩仿射.
        let p = Vector3::new(2.0, 3.0, 4.0);
        assert!((composite.apply(&p) - Vector3::new(3.0, 3.0, 4.0)).norm() < 1e-12);

        // 域外点只受仿射作用.
        let outside = Vector3::new(-5.0, 0.0, 0.0);
        let mut params = composite.params();
        params.iter_mut().for_each(|v| *v = 2.0);
        composite.set_params(&params);
        assert!((composite.apply(&outside) - Vector3::new(-4.0, 0.0, 0.0)).norm() < 1e-12);
    }
}
