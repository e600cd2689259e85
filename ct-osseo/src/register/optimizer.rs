//! 规则步长梯度下降.

use std::fmt;

use log::debug;

use super::{ParamTransform, SampledMetric};

/// 停止原因.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// 归一化梯度模长低于容差.
    GradientTolerance,
    /// 步长衰减到下限.
    StepTooSmall,
    /// 达到最大迭代数.
    MaxIterations,
}

impl fmt::Display for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GradientTolerance => write!(f, "梯度收敛"),
            Self::StepTooSmall => write!(f, "步长到达下限"),
            Self::MaxIterations => write!(f, "达到最大迭代数"),
        }
    }
}

/// 优化结果.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeOutcome {
    /// 停止时的 metric 值.
    pub value: f64,
    /// 已执行的迭代数.
    pub iterations: usize,
    /// 停止原因.
    pub stop: StopCondition,
}

/// 规则步长梯度下降.
///
/// 梯度先按 `scales` 归一化; 方向反转时步长乘 `relaxation` 收缩,
/// 步长以归一化梯度的单位向量推进.
#[derive(Debug, Clone)]
pub struct RegularStepDescent {
    /// 初始 (最大) 步长.
    pub max_step: f64,
    /// 步长下限, 低于即停止.
    pub min_step: f64,
    /// 最大迭代数.
    pub max_iterations: usize,
    /// 步长收缩因子.
    pub relaxation: f64,
    /// 梯度收敛容差.
    pub gradient_tolerance: f64,
    /// 各参数的尺度 (大尺度参数步进更小).
    pub scales: Vec<f64>,
}

impl RegularStepDescent {
    /// 最小化 `metric`, 就地更新 `transform` 的参数.
    pub fn run(
        &self,
        metric: &SampledMetric<'_>,
        transform: &mut dyn ParamTransform,
    ) -> OptimizeOutcome {
        let np = transform.num_params();
        assert_eq!(self.scales.len(), np, "尺度向量长度与参数个数不一致");

        let mut step = self.max_step;
        let mut prev: Option<Vec<f64>> = None;
        let mut value = 0.0;

        for iter in 0..self.max_iterations {
            let (v, grad) = metric.value_and_gradient(transform);
            value = v;

            let scaled: Vec<f64> = grad
                .iter()
                .zip(&self.scales)
                .map(|(g, s)| g / s)
                .collect();
            let mag = scaled.iter().map(|g| g * g).sum::<f64>().sqrt();
            debug!("迭代 {iter}: metric = {v:.6}, |梯度| = {mag:.6}, 步长 = {step:.6}");
            if mag < self.gradient_tolerance {
                return OptimizeOutcome {
                    value,
                    iterations: iter,
                    stop: StopCondition::GradientTolerance,
                };
            }

            if let Some(prev) = &prev {
                let dot: f64 = scaled.iter().zip(prev).map(|(a, b)| a * b).sum();
                if dot < 0.0 {
                    step *= self.relaxation;
                }
            }
            if step < self.min_step {
                return OptimizeOutcome {
                    value,
                    iterations: iter,
                    stop: StopCondition::StepTooSmall,
                };
            }

            let mut params = transform.params();
            for ((p, g), s) in params.iter_mut().zip(&scaled).zip(&self.scales) {
                *p -= step / mag * g / s;
            }
            transform.set_params(&params);
            prev = Some(scaled);
        }

        OptimizeOutcome {
            value,
            iterations: self.max_iterations,
            stop: StopCondition::MaxIterations,
        }
    }
}
