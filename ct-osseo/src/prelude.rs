//! 常用类型一站式导入.
//!
//! ```
//! use ct_osseo::prelude::*;
//! ```

pub use crate::data::{CtLabel, CtScan, Geometry, Grid3, NiftiHeaderAttr, Region3};
pub use crate::error::{RegisterError, SegmentError};
pub use crate::progress::{LogProgress, NullProgress, ProgressSink, StageTimer};
pub use crate::register::{
    read_fcsv, register_atlas, resample_labels, save_transform, AtlasRegistration,
    ParamTransform, RegistrationConfig, TransformKind,
};
pub use crate::segment::{median_filter, separate_bones, SeparatedBones, SeparatorConfig};
pub use crate::Idx3d;
