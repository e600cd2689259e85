//! 随机采样的均方差 metric.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::data::Grid3;

use super::{interp_linear, ParamTransform};

/// 在 fixed 图像上随机采样的均方差 metric.
///
/// 采样点在构造时固定 (确定性种子), 多次求值之间可比.
/// 变换后落在 moving 之外的采样点不参与求和.
pub struct SampledMetric<'a> {
    moving: &'a Grid3<f32>,
    /// (fixed 物理点, fixed 灰度).
    samples: Vec<(Vector3<f64>, f64)>,
}

impl<'a> SampledMetric<'a> {
    /// 在 `fixed` 上均匀随机采 `count` 个体素.
    pub fn new(fixed: &'a Grid3<f32>, moving: &'a Grid3<f32>, count: usize, seed: u64) -> Self {
        let (nz, nh, nw) = fixed.shape();
        let mut rng = StdRng::seed_from_u64(seed);
        let data = fixed.data();
        let samples = (0..count)
            .map(|_| {
                let idx = (
                    rng.gen_range(0..nz),
                    rng.gen_range(0..nh),
                    rng.gen_range(0..nw),
                );
                (fixed.point_at(idx), data[idx] as f64)
            })
            .collect();
        Self { moving, samples }
    }

    /// 采样点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// 是否没有采样点?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 当前变换下的均方差.
    pub fn value(&self, transform: &dyn ParamTransform) -> f64 {
        let (sse, _, used) = self.accumulate(transform, 0);
        if used == 0 {
            0.0
        } else {
            sse / used as f64
        }
    }

    /// 均方差与其对变换参数的梯度.
    pub fn value_and_gradient(&self, transform: &dyn ParamTransform) -> (f64, Vec<f64>) {
        let np = transform.num_params();
        let (sse, mut grad, used) = self.accumulate(transform, np);
        if used == 0 {
            return (0.0, grad);
        }
        let inv = 1.0 / used as f64;
        grad.iter_mut().for_each(|g| *g *= inv);
        (sse * inv, grad)
    }

    /// 并行累积误差平方和 (与梯度, `np > 0` 时).
    fn accumulate(&self, transform: &dyn ParamTransform, np: usize) -> (f64, Vec<f64>, usize) {
        let sp = self.moving.geom().spacing();
        // 物理轴 (x, y, z) 上的差分步长.
        let h = [0.5 * sp[2], 0.5 * sp[1], 0.5 * sp[0]];
        self.samples
            .par_iter()
            .fold(
                || (0.0f64, vec![0.0f64; np], 0usize),
                |(mut sse, mut grad, mut used), (p, fv)| {
                    let mp = transform.apply(p);
                    let Some(mv) = interp_linear(self.moving, &mp) else {
                        return (sse, grad, used);
                    };
                    let diff = mv - fv;
                    sse += diff * diff;
                    used += 1;
                    if np > 0 {
                        // moving 灰度在物理空间的中心差分梯度.
                        let mut mgrad = Vector3::zeros();
                        for axis in 0..3 {
                            let mut fwd = mp;
                            let mut bwd = mp;
                            fwd[axis] += h[axis];
                            bwd[axis] -= h[axis];
                            if let (Some(f), Some(b)) = (
                                interp_linear(self.moving, &fwd),
                                interp_linear(self.moving, &bwd),
                            ) {
                                mgrad[axis] = (f - b) / (2.0 * h[axis]);
                            }
                        }
                        for (idx, dv) in transform.param_jacobian(p) {
                            grad[idx] += 2.0 * diff * mgrad.dot(&dv);
                        }
                    }
                    (sse, grad, used)
                },
            )
            .reduce(
                || (0.0, vec![0.0; np], 0),
                |(s1, mut g1, u1), (s2, g2, u2)| {
                    for (a, b) in g1.iter_mut().zip(g2) {
                        *a += b;
                    }
                    (s1 + s2, g1, u1 + u2)
                },
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Geometry, Region3};
    use crate::register::Rigid3;

    fn smooth_volume() -> Grid3<f32> {
        Grid3::from_shape_fn(
            Region3::from_shape((12, 12, 12)),
            Geometry::identity([1.0; 3]),
            |(z, h, w)| (z as f32) * 3.0 + (h as f32) * 2.0 + w as f32,
        )
    }

    #[test]
    fn identical_volumes_have_zero_value_and_gradient() {
        let fixed = smooth_volume();
        let moving = fixed.clone();
        let metric = SampledMetric::new(&fixed, &moving, 500, 7);
        assert_eq!(metric.len(), 500);
        let t = Rigid3::identity(Vector3::new(5.5, 5.5, 5.5));
        assert_eq!(metric.value(&t), 0.0);
        let (v, g) = metric.value_and_gradient(&t);
        assert_eq!(v, 0.0);
        assert!(g.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let fixed = smooth_volume();
        let moving = fixed.clone();
        let mut t = Rigid3::identity(Vector3::zeros());
        t.translation = Vector3::new(0.7, 0.0, 0.0);
        let a = SampledMetric::new(&fixed, &moving, 200, 42).value(&t);
        let b = SampledMetric::new(&fixed, &moving, 200, 42).value(&t);
        assert_eq!(a, b);
    }

    #[test]
    fn gradient_matches_finite_differences_of_value() {
        let fixed = smooth_volume();
        // moving 向外扩 4 格, 保证差分探针不越界.
        let moving = Grid3::from_shape_fn(
            Region3::new([-4; 3], [20; 3]),
            Geometry::identity([1.0; 3]),
            |(z, h, w)| {
                (z as f32 - 4.0) * 3.0 + (h as f32 - 4.0) * 2.0 + (w as f32 - 4.0)
            },
        );
        let metric = SampledMetric::new(&fixed, &moving, 300, 3);
        let mut t = Rigid3::identity(Vector3::new(5.0, 5.0, 5.0));
        t.translation = Vector3::new(0.4, -0.3, 0.2);

        let (_, grad) = metric.value_and_gradient(&t);
        let base = t.params();
        // 平移参数上线性体数据的 metric 是光滑的, 差分应与解析梯度一致.
        for k in 3..6 {
            let mut pf = base.clone();
            let mut pb = base.clone();
            pf[k] += 1e-4;
            pb[k] -= 1e-4;
            let mut tf = t;
            let mut tb = t;
            tf.set_params(&pf);
            tb.set_params(&pb);
            let num = (metric.value(&tf) - metric.value(&tb)) / 2e-4;
            assert!(
                (grad[k] - num).abs() < 1e-2 * (1.0 + num.abs()),
                "参数 {k}: {} != {num}",
                grad[k]
            );
        }
    }

    #[test]
    fn samples_outside_moving_are_excluded() {
        let fixed = smooth_volume();
        let moving = fixed.clone();
        let metric = SampledMetric::new(&fixed, &moving, 100, 9);
        // 平移远超 moving 范围, 所有采样点都无效.
        let mut t = Rigid3::identity(Vector3::zeros());
        t.translation = Vector3::new(1000.0, 0.0, 0.0);
        assert_eq!(metric.value(&t), 0.0);
    }
}
