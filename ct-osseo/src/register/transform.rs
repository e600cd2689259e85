//! 参数化空间变换.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::RegisterError;

/// 可被梯度下降优化的空间变换.
///
/// 变换作用于 LPS 物理点, 方向为 fixed -> moving.
pub trait ParamTransform: Sync {
    /// 参数个数.
    fn num_params(&self) -> usize;

    /// 当前参数向量.
    fn params(&self) -> Vec<f64>;

    /// 以参数向量覆盖当前状态.
    fn set_params(&mut self, p: &[f64]);

    /// 变换一个物理点.
    fn apply(&self, p: &Vector3<f64>) -> Vector3<f64>;

    /// 输出点对各参数的偏导. 只返回非零项 `(参数下标, 偏导向量)`.
    fn param_jacobian(&self, p: &Vector3<f64>) -> Vec<(usize, Vector3<f64>)>;
}

/// 旋转参数有限差分的扰动量.
const ROT_FD_EPS: f64 = 1e-6;

/// 绕固定中心的刚体变换. 参数为 [旋转向量; 平移].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rigid3 {
    /// 旋转中心 (物理坐标).
    pub center: Vector3<f64>,
    /// scaled-axis 旋转向量.
    pub rotvec: Vector3<f64>,
    /// 平移.
    pub translation: Vector3<f64>,
}

impl Rigid3 {
    /// 单位变换, 旋转中心为 `center`.
    pub fn identity(center: Vector3<f64>) -> Self {
        Self {
            center,
            rotvec: Vector3::zeros(),
            translation: Vector3::zeros(),
        }
    }

    /// 当前旋转矩阵.
    #[inline]
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rotvec)
    }
}

impl ParamTransform for Rigid3 {
    fn num_params(&self) -> usize {
        6
    }

    fn params(&self) -> Vec<f64> {
        vec![
            self.rotvec.x,
            self.rotvec.y,
            self.rotvec.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]
    }

    fn set_params(&mut self, p: &[f64]) {
        debug_assert_eq!(p.len(), 6);
        self.rotvec = Vector3::new(p[0], p[1], p[2]);
        self.translation = Vector3::new(p[3], p[4], p[5]);
    }

    fn apply(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation() * (p - self.center) + self.center + self.translation
    }

    fn param_jacobian(&self, p: &Vector3<f64>) -> Vec<(usize, Vector3<f64>)> {
        let mut out = Vec::with_capacity(6);
        // 旋转向量到旋转矩阵的映射没有便于手写的闭式导数, 用中心差分.
        for k in 0..3 {
            let mut fwd = *self;
            let mut bwd = *self;
            fwd.rotvec[k] += ROT_FD_EPS;
            bwd.rotvec[k] -= ROT_FD_EPS;
            out.push((k, (fwd.apply(p) - bwd.apply(p)) / (2.0 * ROT_FD_EPS)));
        }
        for k in 0..3 {
            let mut e = Vector3::zeros();
            e[k] = 1.0;
            out.push((3 + k, e));
        }
        out
    }
}

/// 绕固定中心的仿射变换. 参数为 [矩阵按行展开; 平移].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Affine3 {
    /// 变换中心 (物理坐标).
    pub center: Vector3<f64>,
    /// 线性部分.
    pub matrix: Matrix3<f64>,
    /// 平移.
    pub translation: Vector3<f64>,
}

impl Affine3 {
    /// 由刚体变换嵌入, 中心与平移保持不变.
    pub fn from_rigid(r: &Rigid3) -> Self {
        Self {
            center: r.center,
            matrix: *r.rotation().matrix(),
            translation: r.translation,
        }
    }
}

impl ParamTransform for Affine3 {
    fn num_params(&self) -> usize {
        12
    }

    fn params(&self) -> Vec<f64> {
        let mut p = Vec::with_capacity(12);
        for i in 0..3 {
            for j in 0..3 {
                p.push(self.matrix[(i, j)]);
            }
        }
        p.extend_from_slice(self.translation.as_slice());
        p
    }

    fn set_params(&mut self, p: &[f64]) {
        debug_assert_eq!(p.len(), 12);
        for i in 0..3 {
            for j in 0..3 {
                self.matrix[(i, j)] = p[3 * i + j];
            }
        }
        self.translation = Vector3::new(p[9], p[10], p[11]);
    }

    fn apply(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * (p - self.center) + self.center + self.translation
    }

    fn param_jacobian(&self, p: &Vector3<f64>) -> Vec<(usize, Vector3<f64>)> {
        let d = p - self.center;
        let mut out = Vec::with_capacity(12);
        for k in 0..9 {
            let mut e = Vector3::zeros();
            // 矩阵元 (i, j) 只影响输出的第 i 个分量, 系数为 d[j].
            e[k / 3] = d[k % 3];
            out.push((k, e));
        }
        for k in 0..3 {
            let mut e = Vector3::zeros();
            e[k] = 1.0;
            out.push((9 + k, e));
        }
        out
    }
}

/// 可序列化的变换种类, 用于落盘.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransformKind {
    /// 刚体变换.
    Rigid(Rigid3),
    /// 仿射变换.
    Affine(Affine3),
    /// B-spline 与仿射的复合变换.
    Composite(super::CompositeTransform),
}

/// 把变换写入二进制文件.
pub fn save_transform<P: AsRef<Path>>(path: P, t: &TransformKind) -> Result<(), RegisterError> {
    let f = BufWriter::new(File::create(path)?);
    bincode::serialize_into(f, t)?;
    Ok(())
}

/// 从二进制文件读回变换.
pub fn load_transform<P: AsRef<Path>>(path: P) -> Result<TransformKind, RegisterError> {
    let f = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(f)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_eq(a: &Vector3<f64>, b: &Vector3<f64>, tol: f64) {
        assert!((a - b).norm() < tol, "{a:?} != {b:?}");
    }

    #[test]
    fn rigid_rotates_around_center() {
        let mut r = Rigid3::identity(Vector3::new(1.0, 1.0, 0.0));
        // 绕 z 轴转 90 度.
        r.rotvec = Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        vec_eq(&r.apply(&r.center), &r.center, 1e-12);
        vec_eq(
            &r.apply(&Vector3::new(2.0, 1.0, 0.0)),
            &Vector3::new(1.0, 2.0, 0.0),
            1e-12,
        );
    }

    #[test]
    fn rigid_params_round_trip() {
        let mut r = Rigid3::identity(Vector3::new(0.5, -1.0, 3.0));
        r.set_params(&[0.1, -0.2, 0.3, 4.0, 5.0, 6.0]);
        assert_eq!(r.params(), vec![0.1, -0.2, 0.3, 4.0, 5.0, 6.0]);
        assert_eq!(r.num_params(), 6);
    }

    #[test]
    fn rigid_jacobian_matches_finite_differences() {
        let mut r = Rigid3::identity(Vector3::zeros());
        r.set_params(&[0.2, 0.1, -0.3, 1.0, 0.0, 2.0]);
        let p = Vector3::new(3.0, -2.0, 1.0);
        let jac = r.param_jacobian(&p);
        assert_eq!(jac.len(), 6);
        let params = r.params();
        for (k, dv) in jac {
            let mut fwd = r;
            let mut bwd = r;
            let mut pf = params.clone();
            let mut pb = params.clone();
            pf[k] += 1e-5;
            pb[k] -= 1e-5;
            fwd.set_params(&pf);
            bwd.set_params(&pb);
            let num = (fwd.apply(&p) - bwd.apply(&p)) / 2e-5;
            vec_eq(&dv, &num, 1e-5);
        }
    }

    #[test]
    fn affine_embeds_rigid_exactly() {
        let mut r = Rigid3::identity(Vector3::new(1.0, 2.0, 3.0));
        r.set_params(&[0.3, -0.1, 0.2, -4.0, 0.5, 1.5]);
        let a = Affine3::from_rigid(&r);
        for p in [
            Vector3::zeros(),
            Vector3::new(10.0, -5.0, 2.0),
            Vector3::new(-1.0, 0.0, 7.0),
        ] {
            vec_eq(&a.apply(&p), &r.apply(&p), 1e-12);
        }
    }

    #[test]
    fn affine_jacobian_is_exact() {
        let mut a = Affine3::from_rigid(&Rigid3::identity(Vector3::new(1.0, 0.0, -1.0)));
        a.set_params(&[1.1, 0.0, 0.2, 0.0, 0.9, 0.0, 0.1, 0.0, 1.0, 2.0, -1.0, 0.5]);
        let p = Vector3::new(2.0, 3.0, 4.0);
        for (k, dv) in a.param_jacobian(&p) {
            let params = a.params();
            let mut fwd = a;
            let mut bwd = a;
            let mut pf = params.clone();
            let mut pb = params;
            pf[k] += 1e-6;
            pb[k] -= 1e-6;
            fwd.set_params(&pf);
            bwd.set_params(&pb);
            let num = (fwd.apply(&p) - bwd.apply(&p)) / 2e-6;
            vec_eq(&dv, &num, 1e-6);
        }
    }

    #[test]
    fn transform_files_round_trip() {
        let dir = std::env::temp_dir().join("ct-osseo-transform-io");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rigid.bin");

        let mut r = Rigid3::identity(Vector3::new(1.0, 2.0, 3.0));
        r.set_params(&[0.1, 0.2, 0.3, -1.0, -2.0, -3.0]);
        save_transform(&path, &TransformKind::Rigid(r)).unwrap();
        match load_transform(&path).unwrap() {
            TransformKind::Rigid(back) => {
                assert_eq!(back.params(), r.params());
                vec_eq(&back.center, &r.center, 1e-15);
            }
            other => panic!("期望 Rigid, 实际 {other:?}"),
        }
    }
}
