//! 显微 CT 骨骼分割: 预处理滤波, 片状度增强与逐骨形态学分离.

mod filters;
mod region_grow;
mod separator;
mod sheetness;

pub use filters::{binary_threshold, gaussian_smooth, median_filter};
pub use region_grow::connected_threshold;
pub use separator::{separate_bones, SeparatedBones, SeparatorConfig};
pub use sheetness::descoteaux_sheetness;
