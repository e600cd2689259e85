//! 带全局索引偏移和几何信息的稠密体素网格.

use nalgebra::Vector3;
use ndarray::{s, Array3, ArrayView3, ArrayViewMut3};
use num::Zero;

use super::{Geometry, Region3};
use crate::Idx3d;

/// 三维体素网格.
///
/// 数据按 (z, h, w) 顺序稠密存储; `origin` 是该块数据在全局索引空间的
/// 偏移, zero-pad 之后可以为负. 物理映射始终以全局索引为准,
/// 因此裁剪/扩展不改变物理坐标.
#[derive(Debug, Clone)]
pub struct Grid3<T> {
    data: Array3<T>,
    origin: [i64; 3],
    geom: Geometry,
}

impl<T> Grid3<T> {
    /// 由数据块, 全局索引原点和几何信息直接构造.
    #[inline]
    pub fn from_parts(data: Array3<T>, origin: [i64; 3], geom: Geometry) -> Self {
        Self { data, origin, geom }
    }

    /// 获取数据形状大小, 按 (z, h, w) 排列.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取该网格覆盖的全局索引区域.
    #[inline]
    pub fn region(&self) -> Region3 {
        let (z, h, w) = self.shape();
        Region3::new(self.origin, [z, h, w])
    }

    /// 获取全局索引原点.
    #[inline]
    pub fn index_origin(&self) -> [i64; 3] {
        self.origin
    }

    /// 获取几何信息.
    #[inline]
    pub fn geom(&self) -> &Geometry {
        &self.geom
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, T> {
        self.data.view_mut()
    }

    /// 取出内部数据块.
    #[inline]
    pub fn into_data(self) -> Array3<T> {
        self.data
    }

    /// 按全局索引取体素. 越界时返回 `None`.
    pub fn get(&self, gi: [i64; 3]) -> Option<&T> {
        if !self.region().contains(gi) {
            return None;
        }
        let l = self.to_local(gi);
        Some(&self.data[l])
    }

    /// 全局索引转本地索引. 调用方保证不越界.
    #[inline]
    fn to_local(&self, gi: [i64; 3]) -> Idx3d {
        (
            (gi[0] - self.origin[0]) as usize,
            (gi[1] - self.origin[1]) as usize,
            (gi[2] - self.origin[2]) as usize,
        )
    }

    /// 本地索引对应的体素中心物理点.
    #[inline]
    pub fn point_at(&self, (z, h, w): Idx3d) -> Vector3<f64> {
        self.geom.index_to_point([
            (z as i64 + self.origin[0]) as f64,
            (h as i64 + self.origin[1]) as f64,
            (w as i64 + self.origin[2]) as f64,
        ])
    }

    /// 物理点对应的本地连续索引, 按 (z, h, w) 排列. 可以越界.
    #[inline]
    pub fn continuous_index(&self, p: &Vector3<f64>) -> [f64; 3] {
        let gi = self.geom.point_to_index(p);
        [
            gi[0] - self.origin[0] as f64,
            gi[1] - self.origin[1] as f64,
            gi[2] - self.origin[2] as f64,
        ]
    }

    /// 获取 `region` (全局索引, 必须包含于网格区域) 的子视图.
    pub fn slice_region(&self, region: &Region3) -> ArrayView3<'_, T> {
        assert!(self.region().contains_region(region), "子区域越界");
        let o = self.to_local(region.origin);
        self.data.slice(s![
            o.0..o.0 + region.size[0],
            o.1..o.1 + region.size[1],
            o.2..o.2 + region.size[2],
        ])
    }

    /// 获取 `region` (全局索引, 必须包含于网格区域) 的可变子视图.
    pub fn slice_region_mut(&mut self, region: &Region3) -> ArrayViewMut3<'_, T> {
        assert!(self.region().contains_region(region), "子区域越界");
        let o = self.to_local(region.origin);
        self.data.slice_mut(s![
            o.0..o.0 + region.size[0],
            o.1..o.1 + region.size[1],
            o.2..o.2 + region.size[2],
        ])
    }
}

impl<T: Clone> Grid3<T> {
    /// 创建充满 `elem` 的网格.
    pub fn from_elem(region: Region3, geom: Geometry, elem: T) -> Self {
        let [z, h, w] = region.size;
        Self::from_parts(Array3::from_elem((z, h, w), elem), region.origin, geom)
    }

    /// 按本地索引逐体素生成网格.
    pub fn from_shape_fn<F: FnMut(Idx3d) -> T>(region: Region3, geom: Geometry, f: F) -> Self {
        let [z, h, w] = region.size;
        Self::from_parts(Array3::from_shape_fn((z, h, w), f), region.origin, geom)
    }
}

impl<T: Clone + Zero> Grid3<T> {
    /// 创建零初始化的网格.
    pub fn zeros(region: Region3, geom: Geometry) -> Self {
        let [z, h, w] = region.size;
        Self::from_parts(Array3::zeros((z, h, w)), region.origin, geom)
    }
}
