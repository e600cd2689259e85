//! 三维数学形态学: 距离场, 膨胀/腐蚀, 孔洞填充与连通域标记.

mod labeling;
mod ops;
mod sdf;

pub use labeling::{label_components, ComponentLabels};
pub use ops::{fill_holes, logical_not, sdf_dilate, sdf_erode, zero_pad};
pub use sdf::{sdf, sdf_squared};
