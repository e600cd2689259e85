//! 图谱配准: 地标初始化, rigid/affine 粗配准, B-spline 可变形配准
//! 与标签重采样.

mod bspline;
mod fiducials;
mod landmark;
mod metric;
mod optimizer;
mod pipeline;
mod resample;
mod transform;

pub use bspline::{BsplineFfd, CompositeTransform};
pub use fiducials::read_fcsv;
pub use landmark::landmark_rigid;
pub use metric::SampledMetric;
pub use optimizer::{OptimizeOutcome, RegularStepDescent, StopCondition};
pub use pipeline::{
    distance_field_proxy, register_atlas, AtlasRegistration, RegistrationConfig,
};
pub use resample::{interp_linear, resample_labels};
pub use transform::{
    load_transform, save_transform, Affine3, ParamTransform, Rigid3, TransformKind,
};
