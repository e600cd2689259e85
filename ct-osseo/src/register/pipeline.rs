//! 多阶段图谱配准流程.
//!
//! 地标初始化 -> rigid -> affine -> B-spline 可变形. 前两个梯度阶段
//! 在距离场代理上进行, 可变形阶段回到 (斜坡化的) 原始灰度.

use log::info;
use nalgebra::Vector3;
use ndarray::Zip;

use crate::consts::register as cfg;
use crate::data::Grid3;
use crate::error::RegisterError;
use crate::morph::sdf;
use crate::progress::StageTimer;

use super::{
    landmark_rigid, Affine3, BsplineFfd, CompositeTransform, OptimizeOutcome, ParamTransform,
    RegularStepDescent, Rigid3, SampledMetric,
};

/// 配准流程参数. 默认值即生产配置.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// 为真时跳过可变形阶段.
    pub stop_at_affine: bool,
    /// 采样种子.
    pub seed: u64,
    /// rigid 阶段采样数.
    pub rigid_samples: usize,
    /// affine 阶段采样数.
    pub affine_samples: usize,
    /// rigid/affine 阶段最大步长.
    pub linear_max_step: f64,
    /// rigid/affine 阶段最小步长.
    pub linear_min_step: f64,
    /// rigid/affine 阶段最大迭代数.
    pub linear_iterations: usize,
    /// B-spline 每维控制点数.
    pub grid_nodes: usize,
    /// 可变形阶段最大步长.
    pub deformable_max_step: f64,
    /// 可变形阶段最小步长.
    pub deformable_min_step: f64,
    /// 可变形阶段步长松弛因子.
    pub deformable_relaxation: f64,
    /// 可变形阶段最大迭代数.
    pub deformable_iterations: usize,
    /// 可变形阶段每参数采样数.
    pub samples_per_parameter: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            stop_at_affine: false,
            seed: cfg::METRIC_SEED,
            rigid_samples: cfg::RIGID_SAMPLES,
            affine_samples: cfg::AFFINE_SAMPLES,
            linear_max_step: cfg::LINEAR_MAX_STEP,
            linear_min_step: cfg::LINEAR_MIN_STEP,
            linear_iterations: cfg::LINEAR_ITERATIONS,
            grid_nodes: cfg::GRID_NODES_PER_DIM,
            deformable_max_step: cfg::DEFORMABLE_MAX_STEP,
            deformable_min_step: cfg::DEFORMABLE_MIN_STEP,
            deformable_relaxation: cfg::DEFORMABLE_RELAXATION,
            deformable_iterations: cfg::DEFORMABLE_ITERATIONS,
            samples_per_parameter: cfg::SAMPLES_PER_PARAMETER,
        }
    }
}

/// 各阶段的配准结果.
#[derive(Debug)]
pub struct AtlasRegistration {
    /// 地标初始化得到的刚体变换.
    pub landmark: Rigid3,
    /// 优化后的刚体变换.
    pub rigid: Rigid3,
    /// rigid 阶段的优化结果.
    pub rigid_stop: OptimizeOutcome,
    /// 优化后的仿射变换.
    pub affine: Affine3,
    /// affine 阶段的优化结果.
    pub affine_stop: OptimizeOutcome,
    /// 可变形阶段 (跳过时为 `None`).
    pub deformable: Option<(CompositeTransform, OptimizeOutcome)>,
}

/// 用标签生成距离场代理, 并就地斜坡化骨体数据.
///
/// 整骨掩码取标签 `1..=max_label`; 掩码外的灰度被改写为
/// `负距离 x DF_RAMP`, 形成指向骨骼的单调斜坡, 掩码内灰度不变.
/// 返回 (骨内为正的) 距离场.
///
/// 标签网格可以比骨体数据更大 (骨体数据是其物理子集), 按物理点对齐;
/// 覆盖不住骨体数据时返回 [`RegisterError::LabelCoverage`].
pub fn distance_field_proxy(
    bone: &mut Grid3<f32>,
    labels: &Grid3<u8>,
    max_label: u8,
) -> Result<Grid3<f32>, RegisterError> {
    let ci = labels.continuous_index(&bone.point_at((0, 0, 0)));
    let off = [
        ci[0].round() as i64,
        ci[1].round() as i64,
        ci[2].round() as i64,
    ];
    let (bz, bh, bw) = bone.shape();
    let (lz, lh, lw) = labels.shape();
    for (d, (b, l)) in [(bz, lz), (bh, lh), (bw, lw)].into_iter().enumerate() {
        if off[d] < 0 || off[d] + b as i64 > l as i64 {
            return Err(RegisterError::LabelCoverage { axis: d });
        }
    }

    let ldata = labels.data();
    let mut mask = Grid3::<u8>::zeros(bone.region(), *bone.geom());
    Zip::indexed(mask.data_mut()).par_for_each(|(z, h, w), m| {
        let l = ldata[(
            (z as i64 + off[0]) as usize,
            (h as i64 + off[1]) as usize,
            (w as i64 + off[2]) as usize,
        )];
        *m = u8::from(l >= 1 && l <= max_label);
    });
    let dist = sdf(&mask, true);
    Zip::from(bone.data_mut())
        .and(dist.data())
        .par_for_each(|b, &d| {
            if d < 0.0 {
                *b = d * cfg::DF_RAMP;
            }
        });
    Ok(dist)
}

/// 多阶段配准: fixed 为输入, moving 为图谱, 变换方向 输入 -> 图谱.
///
/// `input_bone`/`atlas_bone` 会被就地斜坡化 (见 [`distance_field_proxy`]).
/// rigid/affine 阶段在距离场上优化, 可变形阶段在斜坡化灰度上优化,
/// 仿射部分此后保持冻结.
#[allow(clippy::too_many_arguments)]
pub fn register_atlas(
    input_bone: &mut Grid3<f32>,
    input_labels: &Grid3<u8>,
    atlas_bone: &mut Grid3<f32>,
    atlas_labels: &Grid3<u8>,
    input_landmarks: &[Vector3<f64>],
    atlas_landmarks: &[Vector3<f64>],
    config: &RegistrationConfig,
    timer: &StageTimer,
) -> Result<AtlasRegistration, RegisterError> {
    let landmark = landmark_rigid(input_landmarks, atlas_landmarks)?;
    timer.stage("地标初始化");

    // 输入标签是整骨编号, 图谱标签是三类编码, 掩码上限不同.
    let input_df = distance_field_proxy(input_bone, input_labels, 3)?;
    let atlas_df = distance_field_proxy(atlas_bone, atlas_labels, u8::MAX)?;
    timer.stage("距离场代理");

    let ts = 1.0
        / (cfg::TRANSLATION_SCALE_DENOM * input_bone.geom().geometric_mean_spacing());

    let mut rigid = landmark;
    let rigid_stop = {
        let metric = SampledMetric::new(&input_df, &atlas_df, config.rigid_samples, config.seed);
        let opt = RegularStepDescent {
            max_step: config.linear_max_step,
            min_step: config.linear_min_step,
            max_iterations: config.linear_iterations,
            relaxation: cfg::LINEAR_RELAXATION,
            gradient_tolerance: cfg::GRADIENT_TOLERANCE,
            scales: vec![1.0, 1.0, 1.0, ts, ts, ts],
        };
        opt.run(&metric, &mut rigid)
    };
    info!(
        "rigid: {} 轮后 metric = {:.4} ({})",
        rigid_stop.iterations, rigid_stop.value, rigid_stop.stop
    );
    timer.stage("rigid 配准");

    let mut affine = Affine3::from_rigid(&rigid);
    let affine_stop = {
        let metric = SampledMetric::new(&input_df, &atlas_df, config.affine_samples, config.seed);
        let mut scales = vec![1.0; 9];
        scales.extend_from_slice(&[ts, ts, ts]);
        let opt = RegularStepDescent {
            max_step: config.linear_max_step,
            min_step: config.linear_min_step,
            max_iterations: config.linear_iterations,
            relaxation: cfg::LINEAR_RELAXATION,
            gradient_tolerance: cfg::GRADIENT_TOLERANCE,
            scales,
        };
        opt.run(&metric, &mut affine)
    };
    info!(
        "affine: {} 轮后 metric = {:.4} ({})",
        affine_stop.iterations, affine_stop.value, affine_stop.stop
    );
    timer.stage("affine 配准");

    drop(input_df);
    drop(atlas_df);

    let deformable = if config.stop_at_affine {
        None
    } else {
        let mut composite = CompositeTransform {
            affine,
            ffd: BsplineFfd::for_domain(input_bone, config.grid_nodes),
        };
        let samples = config.samples_per_parameter * composite.num_params();
        let metric = SampledMetric::new(input_bone, atlas_bone, samples, config.seed);
        let opt = RegularStepDescent {
            max_step: config.deformable_max_step,
            min_step: config.deformable_min_step,
            max_iterations: config.deformable_iterations,
            relaxation: config.deformable_relaxation,
            gradient_tolerance: cfg::GRADIENT_TOLERANCE,
            scales: vec![1.0; composite.num_params()],
        };
        let outcome = opt.run(&metric, &mut composite);
        info!(
            "B-spline: {} 轮后 metric = {:.4} ({})",
            outcome.iterations, outcome.value, outcome.stop
        );
        timer.stage("可变形配准");
        Some((composite, outcome))
    };

    Ok(AtlasRegistration {
        landmark,
        rigid,
        rigid_stop,
        affine,
        affine_stop,
        deformable,
    })
}
