//! 通用常量.

/// 标签值与三标签编码.
pub mod label {
    /// 背景体素值.
    pub const BACKGROUND: u8 = 0;

    /// 单卷能容纳的最大骨骼数. 每块骨需要皮质骨/松质骨/骨髓三个标签,
    /// `3 * 85 = 255` 恰好占满 u8 标签空间.
    pub const MAX_BONES: usize = 85;

    /// 第 `bone` 块骨 (1 起) 的皮质骨标签.
    #[inline]
    pub const fn cortical(bone: u8) -> u8 {
        3 * bone - 2
    }

    /// 第 `bone` 块骨 (1 起) 的松质骨标签.
    #[inline]
    pub const fn trabecular(bone: u8) -> u8 {
        3 * bone - 1
    }

    /// 第 `bone` 块骨 (1 起) 的骨髓标签.
    #[inline]
    pub const fn marrow(bone: u8) -> u8 {
        3 * bone
    }

    /// 三标签模式下, 标签值对应的骨骼序号 (1 起). 背景返回 0.
    #[inline]
    pub const fn bone_of(label: u8) -> u8 {
        // 拓宽后再加, 标签 255 时 `label + 2` 会溢出 u8.
        ((label as u16 + 2) / 3) as u8
    }

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }
}

/// 逐骨分割的阈值与形态学参数.
pub mod segment {
    /// Gaussian 平滑后的骨密度阈值.
    pub const GAUSS_THRESHOLD: f32 = 2000.0;

    /// Descoteaux sheetness 测度阈值.
    pub const SHEETNESS_THRESHOLD: f32 = 0.1;

    /// 严格骨阈值. 从高阈值出发, 保证相邻骨骼分得开.
    pub const STRICT_BONE_THRESHOLD: f32 = 5000.0;

    /// 区域生长下阈值. 取比严格阈值低的值以覆盖更多松质骨.
    pub const REGION_GROW_THRESHOLD: f32 = 1500.0;

    /// basin 之外的背景哨兵灰度.
    pub const BACKGROUND_SENTINEL: f32 = -4096.0;

    /// 连通域剔除的最小体素数.
    pub const MIN_COMPONENT_SIZE: usize = 1000;

    /// 形态学操作最大半径 = 该倍数 x 皮质骨厚度.
    /// 为中间步骤的不精确性留出余量.
    pub const MAX_RADIUS_FACTOR: f64 = 8.0;

    /// 距离比较容差 = 该倍数 x 几何平均体素分辨率.
    pub const EPS_FACTOR: f64 = 0.001;

    /// 松质骨膨胀半径倍数.
    pub const TRABECULAR_DILATE: f64 = 3.0;

    /// 松质骨腐蚀半径倍数.
    pub const TRABECULAR_ERODE: f64 = 4.0;

    /// 松质骨二次膨胀半径倍数.
    pub const TRABECULAR_REDILATE: f64 = 1.0;

    /// 骨髓膨胀半径倍数.
    pub const MARROW_DILATE: f64 = 5.0;

    /// 骨髓腐蚀半径倍数.
    pub const MARROW_ERODE: f64 = 6.0;
}

/// 配准流程的采样与优化参数.
pub mod register {
    /// 空间采样的确定性随机种子.
    pub const METRIC_SEED: u64 = 76926294;

    /// rigid 阶段空间采样数.
    pub const RIGID_SAMPLES: usize = 100_000;

    /// affine 阶段空间采样数. 参数更多, 需要更多采样以稳定梯度估计.
    pub const AFFINE_SAMPLES: usize = 500_000;

    /// rigid/affine 阶段最大步长.
    pub const LINEAR_MAX_STEP: f64 = 0.2;

    /// rigid/affine 阶段最小步长 (停止条件).
    pub const LINEAR_MIN_STEP: f64 = 0.0001;

    /// rigid/affine 阶段最大迭代数.
    pub const LINEAR_ITERATIONS: usize = 200;

    /// rigid/affine 阶段步长松弛因子.
    pub const LINEAR_RELAXATION: f64 = 0.5;

    /// 归一化梯度模长低于该值时认为已收敛.
    pub const GRADIENT_TOLERANCE: f64 = 1e-4;

    /// 平移参数归一化分母倍数: `1 / (该值 x 几何平均体素分辨率)`.
    pub const TRANSLATION_SCALE_DENOM: f64 = 1000.0;

    /// B-spline 变换域每维节点数.
    pub const GRID_NODES_PER_DIM: usize = 5;

    /// B-spline 阶数.
    pub const SPLINE_ORDER: usize = 3;

    /// 可变形阶段最大步长.
    pub const DEFORMABLE_MAX_STEP: f64 = 10.0;

    /// 可变形阶段最小步长.
    pub const DEFORMABLE_MIN_STEP: f64 = 0.01;

    /// 可变形阶段步长松弛因子.
    pub const DEFORMABLE_RELAXATION: f64 = 0.7;

    /// 可变形阶段最大迭代数.
    pub const DEFORMABLE_ITERATIONS: usize = 20;

    /// 可变形阶段每参数的空间采样数.
    pub const SAMPLES_PER_PARAMETER: usize = 1000;

    /// 距离场代理斜坡系数: 骨外体素灰度被改写为 `系数 x 负距离`,
    /// 防止松质骨纹理干扰粗配准.
    pub const DF_RAMP: f32 = 1024.0;
}

#[cfg(test)]
mod tests {
    use super::label;

    #[test]
    fn sub_labels_map_back_to_their_bone() {
        for bone in [1u8, 2, 40, label::MAX_BONES as u8] {
            assert_eq!(label::bone_of(label::cortical(bone)), bone);
            assert_eq!(label::bone_of(label::trabecular(bone)), bone);
            assert_eq!(label::bone_of(label::marrow(bone)), bone);
        }
        // 标签 255 (第 85 块骨的骨髓) 不得溢出.
        assert_eq!(label::bone_of(u8::MAX), label::MAX_BONES as u8);
        assert_eq!(label::bone_of(label::BACKGROUND), 0);
    }

    #[test]
    fn background_predicate() {
        assert!(label::is_background(label::BACKGROUND));
        assert!(!label::is_background(1));
        assert!(!label::is_background(u8::MAX));
    }
}
