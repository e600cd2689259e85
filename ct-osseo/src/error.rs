//! 运行时错误.

use std::fmt;

/// 逐骨分割的运行时错误.
#[derive(Debug)]
pub enum SegmentError {
    /// 连通域数量超过 u8 标签空间所能容纳的骨骼数.
    ///
    /// 参数为实际检出的骨骼数.
    TooManyBones(usize),

    /// 输入体数据为空.
    EmptyInput,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyBones(n) => {
                write!(f, "检出 {n} 块骨, 超过 u8 标签空间上限 (85)")
            }
            Self::EmptyInput => write!(f, "输入体数据为空"),
        }
    }
}

impl std::error::Error for SegmentError {}

/// 配准流程的运行时错误.
#[derive(Debug)]
pub enum RegisterError {
    /// landmark 数量不是 3.
    LandmarkCount {
        /// 出错的一侧 (`"input"` 或 `"atlas"`).
        side: &'static str,
        /// 实际读到的 landmark 数量.
        found: usize,
    },

    /// fiducial 文件使用了不支持的坐标系 (例如 IJK 索引坐标).
    UnsupportedCoordinateSystem(String),

    /// 标签网格没有覆盖骨体数据的物理范围.
    LabelCoverage {
        /// 不被覆盖的轴 (0 = z, 1 = h, 2 = w).
        axis: usize,
    },

    /// fiducial 文件格式错误.
    MalformedFiducial {
        /// 出错的行号 (1 起).
        line: usize,
        /// 错误原因.
        reason: String,
    },

    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// 变换序列化/反序列化错误.
    Transform(bincode::Error),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LandmarkCount { side, found } => {
                write!(f, "{side} 侧 landmark 必须恰好 3 个, 实际 {found} 个")
            }
            Self::UnsupportedCoordinateSystem(cs) => {
                write!(f, "不支持的 fiducial 坐标系: {cs}")
            }
            Self::LabelCoverage { axis } => {
                write!(f, "标签网格在轴 {axis} 上不覆盖骨体数据")
            }
            Self::MalformedFiducial { line, reason } => {
                write!(f, "fiducial 文件第 {line} 行格式错误: {reason}")
            }
            Self::Io(e) => write!(f, "I/O 错误: {e}"),
            Self::Transform(e) => write!(f, "变换序列化错误: {e}"),
        }
    }
}

impl std::error::Error for RegisterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Transform(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RegisterError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<bincode::Error> for RegisterError {
    fn from(e: bincode::Error) -> Self {
        Self::Transform(e)
    }
}
