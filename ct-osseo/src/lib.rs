#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 micro-CT 骨骼扫描的逐骨形态学分割, 以及基于 atlas
//! 标注的多阶段配准与标签迁移算法.
//!
//! 该 crate 目前仅提供 `safe` 接口. 将来可能为部分高性能场景关键路径提供 `unsafe` 接口.
//!
//! # 注意
//!
//! 1. 体数据一律以 `(z, h, w)` 顺序存储, 物理坐标一律采用 LPS 约定
//!    (读入 nii 文件时完成 RAS 到 LPS 的转换).
//! 2. 在非期望情况下, 程序会直接 panic, 而不会导致内存错误. As what Rust promises.
//!
//! # 功能总览
//!
//! ### 带全局索引偏移的体素网格 ✅
//!
//! `Grid3` 支持 zero-pad 之后以负索引原点表示扩展区域,
//! 保证 pad 前后物理坐标一致.
//!
//! 实现位于 `ct-osseo/src/data/grid.rs`.
//!
//! ### 精确 Euclidean 距离场 ✅
//!
//! 逐轴下包络 (Felzenszwalb & Huttenlocher) 变换, 支持各向异性体素,
//! 输出带符号的平方距离.
//!
//! 实现位于 `ct-osseo/src/morph/sdf.rs`.
//!
//! ### 距离场形态学 ✅
//!
//! 以距离场阈值实现膨胀/腐蚀, 避免显式结构元卷积.
//!
//! 实现位于 `ct-osseo/src/morph/ops.rs`.
//!
//! ### 连通域标注 ✅
//!
//! 6-连通 BFS + 按体素数降序重标号 + 小连通域剔除.
//!
//! 实现位于 `ct-osseo/src/morph/labeling.rs`.
//!
//! ### 逐骨分割 ✅
//!
//! 皮质骨/松质骨/骨髓三标签分解, 以各骨距离场的 basin 划分避免相邻骨粘连.
//!
//! 实现位于 `ct-osseo/src/segment/separator.rs`.
//!
//! ### 多阶段 atlas 配准 ✅
//!
//! landmark 闭式初始化, rigid/affine 梯度下降, B-spline FFD 可变形配准,
//! 以及最近邻标签重采样.
//!
//! 实现位于 `ct-osseo/src/register/*`.

/// 三维索引, 按 (z, h, w) 排列, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D CT nii 文件基础数据结构与几何信息.
mod data;

pub use data::{CtLabel, CtScan, Geometry, Grid3, NiftiHeaderAttr, Region3};

pub mod consts;

pub mod error;

pub mod morph;

pub mod progress;

pub mod register;

pub mod segment;

pub mod prelude;
