//! 地标初始化.

use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::error::RegisterError;

use super::Rigid3;

/// 需要的地标个数.
const LANDMARK_COUNT: usize = 3;

/// 由成对地标求最小二乘刚体变换 (输入 -> 图谱).
///
/// 旋转用 Kabsch/SVD 解出; 旋转中心取输入的第一个地标,
/// 平移取两侧第一个地标之差, 保证该地标被精确对上.
pub fn landmark_rigid(
    input: &[Vector3<f64>],
    atlas: &[Vector3<f64>],
) -> Result<Rigid3, RegisterError> {
    if input.len() != LANDMARK_COUNT {
        return Err(RegisterError::LandmarkCount {
            side: "输入",
            found: input.len(),
        });
    }
    if atlas.len() != LANDMARK_COUNT {
        return Err(RegisterError::LandmarkCount {
            side: "图谱",
            found: atlas.len(),
        });
    }

    let ci: Vector3<f64> = input.iter().sum::<Vector3<f64>>() / LANDMARK_COUNT as f64;
    let ca: Vector3<f64> = atlas.iter().sum::<Vector3<f64>>() / LANDMARK_COUNT as f64;

    let mut h = Matrix3::<f64>::zeros();
    for (x, y) in input.iter().zip(atlas) {
        h += (x - ci) * (y - ca).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.expect("SVD 未计算 U");
    let v = svd.v_t.expect("SVD 未计算 V^T").transpose();
    // 处理反射: 保证 det(R) = +1.
    let d = (v * u.transpose()).determinant().signum();
    let r = v * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d)) * u.transpose();
    let rotvec = Rotation3::from_matrix(&r).scaled_axis();

    Ok(Rigid3 {
        center: input[0],
        rotvec,
        translation: atlas[0] - input[0],
    })
}
